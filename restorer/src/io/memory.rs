//! Working memory: the run's full mutable state, snapshotted to disk after
//! every mutation so a crash leaves an inspectable record.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::arena::{NodeId, Tree};
use crate::core::plan::PlanAdjustment;
use crate::core::types::Subtask;

/// Everything the search mutates, in one serializable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    /// The agreed initial plan; done and remaining always partition it.
    pub initial_plan: Vec<Subtask>,
    /// Remaining subtasks, in execution order.
    pub plan: Vec<Subtask>,
    /// Node the search currently stands on.
    pub current: NodeId,
    /// Failed done/remaining splits and their reschedule replacements.
    pub adjustments: Vec<PlanAdjustment>,
    /// Human-readable step history, for run forensics.
    pub execution_log: Vec<String>,
    /// Tool invocations so far; also keys invocation directories.
    pub n_invocations: u32,
    /// Nodes where a subtask's whole toolbox failed to produce usable
    /// output. Those subtasks are never retried at the same node.
    #[serde(default)]
    pub exhausted: Vec<(NodeId, Subtask)>,
    pub tree: Tree,
}

impl WorkingMemory {
    pub fn new(tree: Tree, initial_plan: Vec<Subtask>) -> Self {
        let current = tree.root();
        Self {
            initial_plan: initial_plan.clone(),
            plan: initial_plan,
            current,
            adjustments: Vec::new(),
            execution_log: Vec::new(),
            n_invocations: 0,
            exhausted: Vec::new(),
            tree,
        }
    }

    /// Subtasks completed on the path from the root to the current node.
    pub fn done(&self) -> Vec<Subtask> {
        self.tree.done_subtasks(self.current)
    }

    /// Subtasks whose toolbox exhausted at the current node.
    pub fn exhausted_here(&self) -> Vec<Subtask> {
        self.exhausted
            .iter()
            .filter(|(node, _)| *node == self.current)
            .map(|(_, subtask)| *subtask)
            .collect()
    }

    /// Atomically persist this snapshot (temp file + rename).
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self).context("serialize working memory")?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, body)
            .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("replace snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse snapshot {}", path.display()))
    }
}
