//! Deterministic selection logic over evaluated candidates and tree nodes.

use crate::core::arena::{NodeId, Tree};
use crate::core::types::Severity;

/// Group evaluated candidates by severity and return the best (lowest
/// severity) non-empty bucket, preserving evaluation order within it.
///
/// Returns `None` when no candidate was evaluated (e.g. the whole toolbox
/// failed to produce usable output).
pub fn best_bucket(evaluated: &[(NodeId, Severity)]) -> Option<(Severity, Vec<NodeId>)> {
    let best = evaluated.iter().map(|(_, severity)| *severity).min()?;
    let bucket = evaluated
        .iter()
        .filter(|(_, severity)| *severity == best)
        .map(|(id, _)| *id)
        .collect();
    Some((best, bucket))
}

/// True when every branch reachable from `node` under the remaining plan has
/// already been tried: the number of remaining planned subtasks equals the
/// number of distinct subtasks attempted as children.
pub fn fully_expanded(tree: &Tree, node: NodeId, remaining_plan_len: usize) -> bool {
    remaining_plan_len == tree.node(node).children.len()
}
