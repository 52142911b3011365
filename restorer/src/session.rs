//! One restoration run, end to end: propose, execute, roll back, reschedule,
//! repeat until the plan is empty.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::controller::{FailedStep, RollbackOutcome, SearchInvariantError, roll_back, reschedule};
use crate::core::arena::Tree;
use crate::core::plan::PlanAdjustment;
use crate::core::types::{Severity, Subtask, ToolName};
use crate::executor::{ExecuteContext, StepOutcome, execute_subtask};
use crate::io::config::EngineConfig;
use crate::io::experience::load_distilled;
use crate::io::media::needs_super_resolution;
use crate::io::memory::WorkingMemory;
use crate::io::oracle::{Judge, Scheduler};
use crate::io::tool::Toolbox;
use crate::io::workspace::RunPaths;
use crate::planner::propose;

/// Final state of a completed run.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Copy of the chosen result image inside the run directory.
    pub result_image: PathBuf,
    /// True when the run ended on the compromise policy rather than a result
    /// that passed every gate.
    pub compromised: bool,
    /// The `(subtask, tool)` decisions from the input to the result.
    pub execution_path: Vec<(Subtask, ToolName)>,
    pub run_dir: PathBuf,
}

/// Run a full restoration session.
///
/// A preset plan skips the planner and disables rollback: the caller asked
/// for exactly that sequence, so there is nothing to reschedule.
pub fn run(
    config: &EngineConfig,
    judge: &mut dyn Judge,
    scheduler: &mut dyn Scheduler,
    toolbox: &dyn Toolbox,
    input_image: &Path,
    output_dir: &Path,
    preset_plan: Option<Vec<Subtask>>,
) -> Result<SessionOutcome> {
    let paths = RunPaths::create(output_dir, input_image)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let rollback_enabled = config.rollback && preset_plan.is_none();

    let experience = if preset_plan.is_none() && config.retrieval {
        Some(load_distilled(&config.experience_path)?)
    } else {
        None
    };

    let plan = match preset_plan {
        Some(plan) => {
            info!(plan = ?plan.iter().map(|s| s.as_str()).collect::<Vec<_>>(), "using preset plan");
            plan
        }
        None => {
            let add_super_resolution =
                needs_super_resolution(paths.input_copy(), config.min_short_side_px)?;
            propose(
                judge,
                scheduler,
                &mut rng,
                paths.input_copy(),
                add_super_resolution,
                experience.as_deref(),
            )?
            .plan
        }
    };
    for subtask in &plan {
        if toolbox.tools(*subtask).is_empty() {
            bail!("planned subtask {subtask} has no registered tools");
        }
    }

    let mut memory = WorkingMemory::new(Tree::new(paths.input_copy().to_path_buf()), plan);
    memory.snapshot(&paths.memory_path())?;

    let ctx = ExecuteContext {
        toolbox,
        paths: &paths,
        reflection: config.reflection,
        success_threshold: config.success_threshold,
    };
    let mut compromised = false;

    while !memory.plan.is_empty() {
        let subtask = memory.plan.remove(0);
        let outcome = execute_subtask(&mut memory, judge, &mut rng, &ctx, subtask)?;
        match outcome {
            StepOutcome::Advanced {
                tool,
                severity,
                success: true,
                ..
            } => {
                memory
                    .execution_log
                    .push(step_record(subtask, &tool, severity, true));
                memory.snapshot(&paths.memory_path())?;
            }
            StepOutcome::Advanced {
                tool,
                severity,
                success: false,
                ..
            } => {
                memory
                    .execution_log
                    .push(step_record(subtask, &tool, severity, false));
                if !rollback_enabled {
                    warn!(%subtask, "accepting unsatisfactory result; rollback is disabled");
                    memory.snapshot(&paths.memory_path())?;
                    continue;
                }
                memory
                    .adjustments
                    .push(PlanAdjustment::failed(memory.done(), memory.plan.clone()));
                memory.snapshot(&paths.memory_path())?;

                if roll_back(&mut memory, judge, FailedStep::Child)?
                    == RollbackOutcome::Compromised
                {
                    compromised = true;
                }
                memory.snapshot(&paths.memory_path())?;
                reschedule(&mut memory, scheduler, experience.as_deref())?;
                memory.snapshot(&paths.memory_path())?;
            }
            StepOutcome::Exhausted { subtask } => {
                if !rollback_enabled {
                    bail!("no tool produced a usable result for {subtask}");
                }
                if memory.exhausted.contains(&(memory.current, subtask)) {
                    return Err(anyhow::Error::new(SearchInvariantError {
                        detail: format!(
                            "toolbox for {subtask} exhausted twice at {}",
                            memory.tree.label(memory.current)
                        ),
                    }));
                }
                memory.exhausted.push((memory.current, subtask));
                let failed_remaining: Vec<Subtask> =
                    std::iter::once(subtask).chain(memory.plan.iter().copied()).collect();
                memory
                    .adjustments
                    .push(PlanAdjustment::failed(memory.done(), failed_remaining));
                memory.snapshot(&paths.memory_path())?;

                if roll_back(&mut memory, judge, FailedStep::Exhausted(subtask))?
                    == RollbackOutcome::Compromised
                {
                    compromised = true;
                }
                memory.snapshot(&paths.memory_path())?;
                reschedule(&mut memory, scheduler, experience.as_deref())?;
                memory.snapshot(&paths.memory_path())?;
            }
        }
    }

    let result_node = memory.current;
    let result_image = paths.result_path();
    fs::copy(&memory.tree.node(result_node).image, &result_image).with_context(|| {
        format!(
            "copy result {} to {}",
            memory.tree.node(result_node).image.display(),
            result_image.display()
        )
    })?;
    memory.snapshot(&paths.memory_path())?;

    let execution_path = memory.tree.path_to(result_node);
    info!(
        result = %memory.tree.label(result_node),
        compromised,
        "restoration finished"
    );
    Ok(SessionOutcome {
        result_image,
        compromised,
        execution_path,
        run_dir: paths.run_dir().to_path_buf(),
    })
}

fn step_record(
    subtask: Subtask,
    tool: &str,
    severity: Option<Severity>,
    success: bool,
) -> String {
    let severity = severity.map(|s| s.as_str()).unwrap_or("unjudged");
    let verdict = if success { "ok" } else { "failed" };
    format!("{subtask}@{tool}: {severity} ({verdict})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Degradation::{Haze, Noise};
    use crate::core::types::Subtask::{Dehazing, Denoising, Deraining, SuperResolution};
    use crate::test_support::{ScriptedJudge, ScriptedScheduler, ScriptedToolbox, report};

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::new(width, height).save(path).expect("write png");
    }

    fn config() -> EngineConfig {
        EngineConfig {
            retrieval: false,
            ..EngineConfig::default()
        }
    }

    /// Two degradations, judge accepts the first tool tried per subtask:
    /// two steps, two invocations, no compromise.
    #[test]
    fn two_step_scenario_completes_cleanly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new()
            .with_tools(Denoising, &["dncnn", "restormer"])
            .with_tools(Dehazing, &["dehamer"]);
        let mut judge = ScriptedJudge::new()
            .with_assessment(report(&[(Noise, Severity::High), (Haze, Severity::Medium)]))
            .with_assessment(report(&[]))
            .with_assessment(report(&[]));
        let mut scheduler = ScriptedScheduler::new();

        let outcome = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            None,
        )
        .expect("run");

        assert!(!outcome.compromised);
        assert_eq!(outcome.execution_path.len(), 2);
        assert!(outcome.result_image.is_file());

        let memory =
            WorkingMemory::load(&outcome.run_dir.join("memory.json")).expect("load memory");
        assert_eq!(memory.n_invocations, 2);
        assert!(memory.plan.is_empty());
        assert_eq!(memory.initial_plan.len(), 2);
        assert!(memory.adjustments.is_empty());
        assert_eq!(memory.execution_log.len(), 2);
    }

    /// A clean input yields an empty plan and the input itself as result.
    #[test]
    fn clean_image_needs_no_restoration() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new();
        let mut judge = ScriptedJudge::new().with_assessment(report(&[]));
        let mut scheduler = ScriptedScheduler::new();

        let outcome = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            None,
        )
        .expect("run");

        assert!(outcome.execution_path.is_empty());
        assert!(!outcome.compromised);
        assert!(toolbox.invocations.borrow().is_empty());
    }

    /// Every tool result judged badly: the run must still terminate with a
    /// compromise result instead of looping.
    #[test]
    fn hopeless_search_terminates_with_a_compromise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new().with_tools(Denoising, &["dncnn"]);
        let mut judge = ScriptedJudge::new()
            .with_assessment(report(&[(Noise, Severity::High)]))
            .with_assessment(report(&[(Noise, Severity::High)]));
        let mut scheduler = ScriptedScheduler::new();

        let outcome = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            None,
        )
        .expect("run");

        assert!(outcome.compromised);
        assert_eq!(outcome.execution_path.len(), 1);
        assert!(outcome.result_image.is_file());

        let memory =
            WorkingMemory::load(&outcome.run_dir.join("memory.json")).expect("load memory");
        assert_eq!(memory.adjustments.len(), 1);
        assert_eq!(memory.adjustments[0].failed_done, vec![Denoising]);
    }

    /// An always-failing toolbox fails the run after one pass over its
    /// tools; nothing is re-invoked at the same node.
    #[test]
    fn exhausted_toolbox_is_not_retried_at_the_same_node() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new()
            .with_tools(Denoising, &["dncnn"])
            .failing(Denoising, "dncnn");
        let mut judge =
            ScriptedJudge::new().with_assessment(report(&[(Noise, Severity::High)]));
        let mut scheduler = ScriptedScheduler::new();

        let err = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            None,
        )
        .unwrap_err();

        assert!(err.to_string().contains("already tried"));
        assert_eq!(
            *toolbox.invocations.borrow(),
            vec![(Denoising, "dncnn".to_string())]
        );
    }

    /// A preset plan disables rollback: failed gates are accepted as-is.
    #[test]
    fn preset_plan_accepts_unsatisfactory_results() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new().with_tools(Denoising, &["dncnn"]);
        let mut judge =
            ScriptedJudge::new().with_assessment(report(&[(Noise, Severity::High)]));
        let mut scheduler = ScriptedScheduler::new();

        let outcome = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            Some(vec![Denoising]),
        )
        .expect("run");

        assert!(!outcome.compromised);
        assert_eq!(outcome.execution_path.len(), 1);
        // Preset plans never consult the planner, so the only assessment is
        // the tool-result one.
        assert_eq!(judge.assessed.len(), 1);
    }

    /// The pixel policy schedules super-resolution for a small input, and the
    /// step runs single-shot.
    #[test]
    fn small_input_gets_super_resolution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 100, 100);

        let toolbox = ScriptedToolbox::new().with_tools(SuperResolution, &["hat"]);
        let mut judge = ScriptedJudge::new().with_assessment(report(&[]));
        let mut scheduler = ScriptedScheduler::new();

        let outcome = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            None,
        )
        .expect("run");

        assert_eq!(outcome.execution_path.len(), 1);
        assert_eq!(outcome.execution_path[0].0, SuperResolution);
        // Only the planner's initial assessment; super-resolution output is
        // not judged by the severity oracle.
        assert_eq!(judge.assessed.len(), 1);
        assert_eq!(toolbox.invocations.borrow().len(), 1);
    }

    /// A planned subtask without a registered toolbox is a config error.
    #[test]
    fn missing_toolbox_for_planned_subtask_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        write_png(&input, 320, 320);

        let toolbox = ScriptedToolbox::new();
        let mut judge = ScriptedJudge::new();
        let mut scheduler = ScriptedScheduler::new();

        let err = run(
            &config(),
            &mut judge,
            &mut scheduler,
            &toolbox,
            &input,
            temp.path(),
            Some(vec![Deraining]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no registered tools"));
    }
}
