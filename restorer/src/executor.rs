//! Subtask execution: try a toolbox against the quality gate, pick a winner.

use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::core::arena::NodeId;
use crate::core::selector::best_bucket;
use crate::core::tournament::pick_best;
use crate::core::types::{Severity, Subtask, ToolName};
use crate::io::memory::WorkingMemory;
use crate::io::oracle::Judge;
use crate::io::tool::{ToolRequest, Toolbox};
use crate::io::workspace::RunPaths;

/// Fixed collaborators of one subtask execution.
pub struct ExecuteContext<'a> {
    pub toolbox: &'a dyn Toolbox,
    pub paths: &'a RunPaths,
    /// When false, the first usable tool output is accepted unconditionally
    /// (single-shot mode).
    pub reflection: bool,
    /// Worst severity still counted as subtask success.
    pub success_threshold: Severity,
}

/// Result of one subtask execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A winning child was chosen and the current position moved into it.
    /// `success` reports the quality gate; a failed step still advances so
    /// the rollback controller can backtrack from the failed child.
    Advanced {
        child: NodeId,
        tool: ToolName,
        severity: Option<Severity>,
        success: bool,
    },
    /// No tool produced usable output; the current position is unchanged and
    /// no child was created.
    Exhausted { subtask: Subtask },
}

/// Execute `subtask` on the current node's image.
///
/// The toolbox is shuffled once, then evaluated in that fixed order. Each
/// usable output becomes a child node; a "very-low" judgment accepts
/// immediately and skips the remaining tools. Otherwise the best severity
/// bucket wins, with ties broken by a pairwise tournament rather than the
/// absolute severity score.
pub fn execute_subtask(
    memory: &mut WorkingMemory,
    judge: &mut dyn Judge,
    rng: &mut StdRng,
    ctx: &ExecuteContext<'_>,
    subtask: Subtask,
) -> Result<StepOutcome> {
    let mut tools = ctx.toolbox.tools(subtask);
    if tools.is_empty() {
        bail!("no tools registered for {subtask}");
    }
    tools.shuffle(rng);

    let parent = memory.current;
    let input_image = memory.tree.node(parent).image.clone();
    info!(%subtask, node = %memory.tree.label(parent), "executing subtask");

    // Super-resolution is gated by the pixel policy, not the severity oracle;
    // it runs single-shot even with reflection on.
    let reflect = ctx.reflection && subtask != Subtask::SuperResolution;

    let mut evaluated: Vec<(NodeId, Severity)> = Vec::new();
    for tool in &tools {
        let invocation = ctx.paths.invocation(memory.n_invocations);
        memory.n_invocations += 1;

        let request = ToolRequest {
            input_image: input_image.clone(),
            output_dir: invocation.output_dir,
            log_path: invocation.log_path,
        };
        let image = match ctx.toolbox.invoke(subtask, tool, &request) {
            Ok(image) => image,
            Err(err) => {
                warn!(%subtask, tool, err = %err, "tool produced no usable result");
                continue;
            }
        };

        if !reflect {
            let child = memory.tree.create_child(parent, subtask, tool, image, None)?;
            memory.tree.set_best_tool(parent, subtask, tool)?;
            memory.current = child;
            return Ok(StepOutcome::Advanced {
                child,
                tool: tool.clone(),
                severity: None,
                success: true,
            });
        }

        let severity = judge.evaluate(&image, subtask.degradation())?;
        let child = memory
            .tree
            .create_child(parent, subtask, tool, image, Some(severity))?;
        info!(%subtask, tool, %severity, "evaluated tool result");

        if severity == Severity::VeryLow {
            memory.tree.set_best_tool(parent, subtask, tool)?;
            memory.current = child;
            return Ok(StepOutcome::Advanced {
                child,
                tool: tool.clone(),
                severity: Some(severity),
                success: true,
            });
        }
        evaluated.push((child, severity));
    }

    let Some((severity, bucket)) = best_bucket(&evaluated) else {
        warn!(%subtask, "whole toolbox failed to produce usable output");
        return Ok(StepOutcome::Exhausted { subtask });
    };

    let winner = if bucket.len() == 1 {
        bucket[0]
    } else {
        info!(%subtask, candidates = bucket.len(), "breaking severity tie by tournament");
        pick_best(&bucket, |champion, contender| {
            judge.compare(
                &memory.tree.node(champion).image,
                &memory.tree.node(contender).image,
            )
        })?
    };

    let tool = memory
        .tree
        .node(winner)
        .parent
        .as_ref()
        .map(|edge| edge.tool.clone())
        .context("winning child has no parent edge")?;
    memory.tree.set_best_tool(parent, subtask, &tool)?;
    memory.current = winner;

    let success = severity <= ctx.success_threshold;
    info!(%subtask, tool, %severity, success, "subtask concluded");
    Ok(StepOutcome::Advanced {
        child: winner,
        tool,
        severity: Some(severity),
        success,
    })
}
