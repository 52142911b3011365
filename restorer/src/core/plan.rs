//! Plan algebra: the done/remaining partition invariant and plan adjustments.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::Subtask;

/// One recorded plan adjustment: the failed done/remaining split and the
/// replacement chosen after rollback. `new_remaining` is `None` while the
/// reschedule that repairs this failure is still pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAdjustment {
    pub failed_done: Vec<Subtask>,
    pub failed_remaining: Vec<Subtask>,
    pub new_done: Option<Vec<Subtask>>,
    pub new_remaining: Option<Vec<Subtask>>,
}

impl PlanAdjustment {
    pub fn failed(done: Vec<Subtask>, remaining: Vec<Subtask>) -> Self {
        Self {
            failed_done: done,
            failed_remaining: remaining,
            new_done: None,
            new_remaining: None,
        }
    }
}

/// Check the plan partition invariant: after every mutation,
/// `done ∪ plan == initial` and `done ∩ plan == ∅`.
///
/// Returns human-readable violations; empty means the invariant holds.
pub fn check_partition(initial: &[Subtask], done: &[Subtask], plan: &[Subtask]) -> Vec<String> {
    let initial_set: BTreeSet<Subtask> = initial.iter().copied().collect();
    let done_set: BTreeSet<Subtask> = done.iter().copied().collect();
    let plan_set: BTreeSet<Subtask> = plan.iter().copied().collect();

    let mut errors = Vec::new();

    let overlap: Vec<String> = done_set
        .intersection(&plan_set)
        .map(|subtask| subtask.to_string())
        .collect();
    if !overlap.is_empty() {
        errors.push(format!(
            "done and plan overlap on {{{}}}",
            overlap.join(", ")
        ));
    }

    let union: BTreeSet<Subtask> = done_set.union(&plan_set).copied().collect();
    if union != initial_set {
        let missing: Vec<String> = initial_set
            .difference(&union)
            .map(|subtask| subtask.to_string())
            .collect();
        let extra: Vec<String> = union
            .difference(&initial_set)
            .map(|subtask| subtask.to_string())
            .collect();
        if !missing.is_empty() {
            errors.push(format!(
                "initial subtasks missing from done ∪ plan: {{{}}}",
                missing.join(", ")
            ));
        }
        if !extra.is_empty() {
            errors.push(format!(
                "done ∪ plan contains subtasks outside the initial plan: {{{}}}",
                extra.join(", ")
            ));
        }
    }

    errors
}

/// Move the first subtask not in `tried` to the front of `plan`.
///
/// Used when the ordering oracle ignores the negative constraint and places
/// an already-failed subtask first. Returns the subtask that was swapped out,
/// or `None` if the plan was already compliant (or no compliant entry exists).
pub fn force_compliant_first(plan: &mut [Subtask], tried: &[Subtask]) -> Option<Subtask> {
    if plan.is_empty() || !tried.contains(&plan[0]) {
        return None;
    }
    let offending = plan[0];
    let compliant = plan.iter().position(|subtask| !tried.contains(subtask))?;
    plan.swap(0, compliant);
    Some(offending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Subtask::{Brightening, Dehazing, Denoising, Deraining};

    #[test]
    fn check_partition_accepts_valid_split() {
        let initial = [Denoising, Dehazing, Brightening];
        let done = [Denoising];
        let plan = [Brightening, Dehazing];
        assert!(check_partition(&initial, &done, &plan).is_empty());
    }

    #[test]
    fn check_partition_reports_overlap() {
        let initial = [Denoising, Dehazing];
        let done = [Denoising];
        let plan = [Denoising, Dehazing];
        let errors = check_partition(&initial, &done, &plan);
        assert!(errors.iter().any(|err| err.contains("overlap")));
    }

    #[test]
    fn check_partition_reports_missing_and_extra() {
        let initial = [Denoising, Dehazing];
        let done = [Denoising];
        let plan = [Deraining];
        let errors = check_partition(&initial, &done, &plan);
        assert!(errors.iter().any(|err| err.contains("missing")));
        assert!(errors.iter().any(|err| err.contains("outside")));
    }

    #[test]
    fn force_compliant_first_swaps_offender() {
        let mut plan = vec![Denoising, Dehazing, Deraining];
        let swapped = force_compliant_first(&mut plan, &[Denoising, Deraining]);
        assert_eq!(swapped, Some(Denoising));
        assert_eq!(plan, vec![Dehazing, Denoising, Deraining]);
    }

    #[test]
    fn force_compliant_first_keeps_compliant_plan() {
        let mut plan = vec![Dehazing, Denoising];
        assert_eq!(force_compliant_first(&mut plan, &[Denoising]), None);
        assert_eq!(plan, vec![Dehazing, Denoising]);
    }
}
