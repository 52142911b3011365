//! Test-only scripted fakes for the engine's external seams.
//!
//! Scripted fakes return predetermined answers in FIFO order and record what
//! they were asked, so orchestration tests can drive full searches without
//! subprocesses or real images.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::{Degradation, Preference, Severity, Subtask, ToolName};
use crate::io::oracle::{Judge, Scheduler};
use crate::io::tool::{ToolRequest, Toolbox};

/// Build a full seven-kind severity report; unlisted kinds are `VeryLow`.
pub fn report(entries: &[(Degradation, Severity)]) -> BTreeMap<Degradation, Severity> {
    let mut report: BTreeMap<Degradation, Severity> = Degradation::JUDGEABLE
        .into_iter()
        .map(|kind| (kind, Severity::VeryLow))
        .collect();
    for (kind, severity) in entries {
        report.insert(*kind, *severity);
    }
    report
}

/// [`Judge`] answering from scripted queues.
#[derive(Default)]
pub struct ScriptedJudge {
    assessments: VecDeque<BTreeMap<Degradation, Severity>>,
    comparisons: VecDeque<Preference>,
    /// Images assessed, in call order.
    pub assessed: Vec<PathBuf>,
    /// Image pairs compared, in call order.
    pub compared: Vec<(PathBuf, PathBuf)>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assessment(mut self, report: BTreeMap<Degradation, Severity>) -> Self {
        self.assessments.push_back(report);
        self
    }

    pub fn with_comparison(mut self, choice: Preference) -> Self {
        self.comparisons.push_back(choice);
        self
    }
}

impl Judge for ScriptedJudge {
    fn assess(&mut self, image: &Path) -> Result<BTreeMap<Degradation, Severity>> {
        self.assessed.push(image.to_path_buf());
        self.assessments
            .pop_front()
            .ok_or_else(|| anyhow!("scripted judge ran out of assessments"))
    }

    fn evaluate(&mut self, image: &Path, degradation: Degradation) -> Result<Severity> {
        self.assessed.push(image.to_path_buf());
        self.assessments
            .pop_front()
            .map(|report| report.get(&degradation).copied().unwrap_or(Severity::VeryLow))
            .ok_or_else(|| anyhow!("scripted judge ran out of assessments"))
    }

    fn compare(&mut self, former: &Path, latter: &Path) -> Result<Preference> {
        self.compared.push((former.to_path_buf(), latter.to_path_buf()));
        self.comparisons
            .pop_front()
            .ok_or_else(|| anyhow!("scripted judge ran out of comparisons"))
    }
}

/// One recorded scheduling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerCall {
    pub agenda: Vec<Subtask>,
    pub experience: Option<String>,
    pub avoid_first: Vec<Subtask>,
}

/// [`Scheduler`] answering from a scripted queue; echoes the agenda once the
/// queue is drained.
#[derive(Default)]
pub struct ScriptedScheduler {
    orders: VecDeque<Vec<Subtask>>,
    pub calls: Vec<SchedulerCall>,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: Vec<Subtask>) -> Self {
        self.orders.push_back(order);
        self
    }
}

impl Scheduler for ScriptedScheduler {
    fn order(
        &mut self,
        agenda: &[Subtask],
        experience: Option<&str>,
        avoid_first: &[Subtask],
    ) -> Result<Vec<Subtask>> {
        self.calls.push(SchedulerCall {
            agenda: agenda.to_vec(),
            experience: experience.map(str::to_string),
            avoid_first: avoid_first.to_vec(),
        });
        Ok(self.orders.pop_front().unwrap_or_else(|| agenda.to_vec()))
    }
}

/// [`Toolbox`] that writes marker files instead of spawning tools.
///
/// Each successful invocation writes `output.png` whose contents name the
/// `(subtask, tool)` pair, keeping node images distinguishable in tests.
#[derive(Default)]
pub struct ScriptedToolbox {
    tools: BTreeMap<Subtask, Vec<ToolName>>,
    failing: BTreeSet<(Subtask, ToolName)>,
    /// Invocations in call order. `RefCell` because [`Toolbox`] takes `&self`.
    pub invocations: RefCell<Vec<(Subtask, ToolName)>>,
}

impl ScriptedToolbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, subtask: Subtask, tools: &[&str]) -> Self {
        self.tools
            .insert(subtask, tools.iter().map(|tool| tool.to_string()).collect());
        self
    }

    /// Mark one tool as always failing its invocation.
    pub fn failing(mut self, subtask: Subtask, tool: &str) -> Self {
        self.failing.insert((subtask, tool.to_string()));
        self
    }
}

impl Toolbox for ScriptedToolbox {
    fn tools(&self, subtask: Subtask) -> Vec<ToolName> {
        self.tools.get(&subtask).cloned().unwrap_or_default()
    }

    fn invoke(&self, subtask: Subtask, tool: &str, request: &ToolRequest) -> Result<PathBuf> {
        self.invocations
            .borrow_mut()
            .push((subtask, tool.to_string()));
        if self.failing.contains(&(subtask, tool.to_string())) {
            return Err(anyhow!("scripted failure of '{tool}' for {subtask}"));
        }
        fs::create_dir_all(&request.output_dir)?;
        let image = request.output_dir.join("output.png");
        fs::write(&image, format!("{subtask}@{tool}"))?;
        Ok(image)
    }
}
