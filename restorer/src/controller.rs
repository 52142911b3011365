//! Rollback and reschedule: the state machine over the current position and
//! the remaining plan.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::arena::NodeId;
use crate::core::plan::{check_partition, force_compliant_first};
use crate::core::selector::fully_expanded;
use crate::core::tournament::pick_best;
use crate::core::types::Subtask;
use crate::io::memory::WorkingMemory;
use crate::io::oracle::{Judge, Scheduler};

/// Violation of a search invariant.
///
/// Always indicates a defect in the rollback/reschedule logic itself, never a
/// transient condition; it is fatal and never retried.
#[derive(Debug)]
pub struct SearchInvariantError {
    pub detail: String,
}

impl fmt::Display for SearchInvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search invariant violated: {}", self.detail)
    }
}

impl std::error::Error for SearchInvariantError {}

fn invariant(detail: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(SearchInvariantError {
        detail: detail.into(),
    })
}

/// How a subtask failed, from the controller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedStep {
    /// The gate rejected the winning candidate; the current position stands
    /// on that failed child.
    Child,
    /// The whole toolbox failed to produce usable output; the current
    /// position never moved.
    Exhausted(Subtask),
}

/// Where rollback left the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Backtracked to a non-fully-expanded ancestor; reschedule next.
    Backtracked,
    /// The root was fully expanded; jumped to its best descendant.
    Compromised,
}

/// Roll back after a failed subtask.
///
/// Backtracks once, then keeps backtracking while the current position is
/// fully expanded, caching each abandoned node's best descendant by
/// tournament on the way up. A fully expanded root forces the compromise
/// jump: the current position moves to the root's best descendant and the
/// plan shrinks to the subtasks not yet satisfied on the path to it.
pub fn roll_back(
    memory: &mut WorkingMemory,
    judge: &mut dyn Judge,
    failed: FailedStep,
) -> Result<RollbackOutcome> {
    match failed {
        FailedStep::Child => {
            let failed_child = memory.current;
            // A freshly failed leaf is its own best descendant.
            memory.tree.set_best_descendant(failed_child, failed_child)?;
            backtrack(memory)?;
        }
        FailedStep::Exhausted(subtask) => {
            memory.plan.insert(0, subtask);
        }
    }

    let mut steps = 1u32;
    let outcome = loop {
        if !fully_expanded(&memory.tree, memory.current, memory.plan.len()) {
            break RollbackOutcome::Backtracked;
        }
        info!(
            node = %memory.tree.label(memory.current),
            "all execution paths from here lead to severe degradation"
        );
        cache_best_descendant(memory, judge)?;
        if memory.current == memory.tree.root() {
            compromise(memory)?;
            break RollbackOutcome::Compromised;
        }
        backtrack(memory)?;
        steps += 1;
    };
    info!(
        steps,
        node = %memory.tree.label(memory.current),
        plan = ?memory.plan.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "rolled back"
    );

    verify_partition(memory)?;
    Ok(outcome)
}

/// Move to the parent, re-inserting the undone subtask at the plan front.
fn backtrack(memory: &mut WorkingMemory) -> Result<()> {
    let edge = memory
        .tree
        .node(memory.current)
        .parent
        .clone()
        .ok_or_else(|| invariant("backtrack from the root"))?;
    memory.plan.insert(0, edge.subtask);
    memory.current = edge.parent;
    info!(node = %memory.tree.label(memory.current), "backtracked");
    Ok(())
}

/// Tournament over the children's recorded best descendants; caches the
/// winner on the current node.
fn cache_best_descendant(memory: &mut WorkingMemory, judge: &mut dyn Judge) -> Result<()> {
    let node = memory.tree.node(memory.current);
    let mut candidates: Vec<NodeId> = Vec::new();
    for (subtask, slot) in &node.children {
        let best_tool = slot
            .best_tool
            .as_ref()
            .ok_or_else(|| invariant(format!("no best tool recorded for {subtask}")))?;
        let child = slot.tools[best_tool];
        let descendant = memory
            .tree
            .node(child)
            .best_descendant
            .ok_or_else(|| {
                invariant(format!("child {} has no best descendant", memory.tree.label(child)))
            })?;
        candidates.push(descendant);
    }

    let winner = if candidates.len() == 1 {
        candidates[0]
    } else {
        info!("searching for the best descendant by tournament");
        pick_best(&candidates, |champion, contender| {
            judge.compare(
                &memory.tree.node(champion).image,
                &memory.tree.node(contender).image,
            )
        })?
    };
    memory.tree.set_best_descendant(memory.current, winner)?;
    Ok(())
}

/// Jump to the root's best descendant and shrink the plan to the subtasks
/// not already satisfied on the path to it.
fn compromise(memory: &mut WorkingMemory) -> Result<()> {
    let target = memory
        .tree
        .node(memory.tree.root())
        .best_descendant
        .ok_or_else(|| invariant("fully-expanded root offers no compromise target"))?;
    memory.current = target;
    let done: BTreeSet<Subtask> = memory.tree.done_subtasks(target).into_iter().collect();
    memory.plan.retain(|subtask| !done.contains(subtask));
    warn!(
        node = %memory.tree.label(target),
        plan = ?memory.plan.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "all execution paths lead to severe degradation; compromising"
    );
    if !memory.plan.is_empty()
        && fully_expanded(&memory.tree, memory.current, memory.plan.len())
    {
        return Err(invariant(
            "invalid compromise: cannot go on or terminate",
        ));
    }
    Ok(())
}

/// Reorder the remaining plan after rollback.
///
/// Three cases: a node with no children reuses the recorded failed plan for
/// the same done set; a single untried subtask is deterministically the next
/// step; otherwise the ordering oracle is re-invoked with a negative
/// constraint naming the subtasks already tried here.
pub fn reschedule(
    memory: &mut WorkingMemory,
    scheduler: &mut dyn Scheduler,
    experience: Option<&str>,
) -> Result<()> {
    if memory.plan.is_empty() {
        return Ok(());
    }

    let mut tried: Vec<Subtask> = memory
        .tree
        .node(memory.current)
        .children
        .keys()
        .copied()
        .collect();
    // An exhausted toolbox counts as tried at this node even though it left
    // no children behind; its subtask may still run at a different node.
    for subtask in memory.exhausted_here() {
        if !tried.contains(&subtask) {
            tried.push(subtask);
        }
    }
    if !tried.is_empty() && memory.plan.iter().all(|subtask| tried.contains(subtask)) {
        return Err(invariant(format!(
            "every remaining subtask was already tried at {}",
            memory.tree.label(memory.current)
        )));
    }

    if tried.is_empty() {
        // After a compromise jump nothing was tried here; pick up the plan
        // recorded when this very node failed.
        let done = memory.done();
        let reused = memory
            .adjustments
            .iter()
            .find(|adjustment| adjustment.failed_done == done)
            .map(|adjustment| adjustment.failed_remaining.clone())
            .ok_or_else(|| {
                invariant(format!(
                    "no recorded plan adjustment matches done set [{}]",
                    done.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ))
            })?;
        info!(
            plan = ?reused.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            "picking up the previously failed plan"
        );
        memory.plan = reused;
    } else if memory.plan.len() == tried.len() + 1 {
        // Exactly one subtask is untried here; it is deterministically next.
        let missing = memory
            .plan
            .iter()
            .position(|subtask| !tried.contains(subtask))
            .ok_or_else(|| invariant("plan and attempted children disagree"))?;
        let next = memory.plan.remove(missing);
        memory.plan.insert(0, next);
        info!(next = %next, "single untried subtask goes first");
    } else {
        let reordered = scheduler.order(&memory.plan, experience, &tried)?;
        memory.plan = reordered;
        if let Some(offender) = force_compliant_first(&mut memory.plan, &tried) {
            warn!(
                %offender,
                first = %memory.plan[0],
                "scheduler placed an already-failed subtask first; swapped it out"
            );
        }
    }

    verify_partition(memory)?;
    let done = memory.done();
    if let Some(adjustment) = memory.adjustments.last_mut()
        && adjustment.new_remaining.is_none()
    {
        adjustment.new_done = Some(done);
        adjustment.new_remaining = Some(memory.plan.clone());
    }
    info!(
        plan = ?memory.plan.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "adjusted plan"
    );
    Ok(())
}

fn verify_partition(memory: &WorkingMemory) -> Result<()> {
    let errors = check_partition(&memory.initial_plan, &memory.done(), &memory.plan);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(invariant(errors.join("; ")))
    }
}
