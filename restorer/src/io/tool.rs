//! Toolbox abstraction for external restoration tools.
//!
//! The [`Toolbox`] trait decouples subtask execution from how tools actually
//! run (currently arbitrary commands). Tests use scripted toolboxes that
//! write predetermined outputs without spawning processes.
//!
//! Contract per invocation: the input location holds exactly one image, the
//! output location is empty beforehand and holds exactly one image afterward
//! (normalized to `output.png`). Any violation fails that tool attempt only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::types::{Subtask, ToolName};
use crate::io::config::{ToolConfig, ToolSpec};
use crate::io::process::run_command_with_timeout;

/// Parameters for one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// The image to restore.
    pub input_image: PathBuf,
    /// Empty directory the tool must write its single output image into.
    pub output_dir: PathBuf,
    /// Path to write the tool's stdout/stderr log.
    pub log_path: PathBuf,
}

/// Abstraction over per-subtask tool registries.
pub trait Toolbox {
    /// Registered tool names for `subtask`, in registration order.
    fn tools(&self, subtask: Subtask) -> Vec<ToolName>;

    /// Invoke one tool. Returns the output image location on success; any
    /// error means "this tool did not produce a usable result".
    fn invoke(&self, subtask: Subtask, tool: &str, request: &ToolRequest) -> Result<PathBuf>;
}

/// Toolbox that spawns configured commands with `{input}`/`{output}`
/// placeholder substitution.
pub struct CommandToolbox {
    specs: BTreeMap<Subtask, Vec<ToolSpec>>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandToolbox {
    pub fn new(specs: BTreeMap<Subtask, Vec<ToolSpec>>, config: &ToolConfig) -> Self {
        Self {
            specs,
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn spec(&self, subtask: Subtask, tool: &str) -> Result<&ToolSpec> {
        self.specs
            .get(&subtask)
            .and_then(|toolbox| toolbox.iter().find(|spec| spec.name == tool))
            .ok_or_else(|| anyhow!("no tool '{tool}' registered for {subtask}"))
    }
}

impl Toolbox for CommandToolbox {
    fn tools(&self, subtask: Subtask) -> Vec<ToolName> {
        self.specs
            .get(&subtask)
            .map(|toolbox| toolbox.iter().map(|spec| spec.name.clone()).collect())
            .unwrap_or_default()
    }

    fn invoke(&self, subtask: Subtask, tool: &str, request: &ToolRequest) -> Result<PathBuf> {
        let spec = self.spec(subtask, tool)?;
        precheck(request)?;

        info!(%subtask, tool, input = %request.input_image.display(), "invoking tool");
        let mut args = spec.command.iter().map(|arg| {
            arg.replace("{input}", &request.input_image.display().to_string())
                .replace("{output}", &request.output_dir.display().to_string())
        });
        let mut cmd = Command::new(args.next().expect("validated non-empty command"));
        cmd.args(args);

        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run tool '{tool}'"))?;
        write_tool_log(&request.log_path, &output.render_log(tool))?;

        if output.timed_out {
            return Err(anyhow!("tool '{tool}' timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "tool '{tool}' failed with status {:?}",
                output.status.code()
            ));
        }

        let image = postcheck(&request.output_dir)?;
        debug!(tool, output = %image.display(), "tool produced output");
        Ok(image)
    }
}

/// The output location must exist and be empty before the call.
fn precheck(request: &ToolRequest) -> Result<()> {
    if !request.input_image.is_file() {
        return Err(anyhow!(
            "input image {} does not exist",
            request.input_image.display()
        ));
    }
    fs::create_dir_all(&request.output_dir)
        .with_context(|| format!("create output dir {}", request.output_dir.display()))?;
    let mut entries = fs::read_dir(&request.output_dir)
        .with_context(|| format!("read output dir {}", request.output_dir.display()))?;
    if entries.next().is_some() {
        return Err(anyhow!(
            "output dir {} is not empty",
            request.output_dir.display()
        ));
    }
    Ok(())
}

/// The output location must hold exactly one image afterward; it is renamed
/// to `output.png` so node image paths stay uniform.
pub fn postcheck(output_dir: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = fs::read_dir(output_dir)
        .with_context(|| format!("read output dir {}", output_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .context("list output dir")?
        .into_iter()
        .map(|entry| entry.path())
        .collect();

    match entries.as_slice() {
        [] => Err(anyhow!("tool produced no output in {}", output_dir.display())),
        [only] => {
            let normalized = output_dir.join("output.png");
            if *only != normalized {
                fs::rename(only, &normalized)
                    .with_context(|| format!("normalize output to {}", normalized.display()))?;
            }
            Ok(normalized)
        }
        many => Err(anyhow!(
            "tool produced {} files in {}, expected exactly one",
            many.len(),
            output_dir.display()
        )),
    }
}

fn write_tool_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create tool log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write tool log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolbox(command: Vec<&str>) -> CommandToolbox {
        let mut specs = BTreeMap::new();
        specs.insert(
            Subtask::Denoising,
            vec![ToolSpec {
                name: "dncnn".to_string(),
                command: command.into_iter().map(str::to_string).collect(),
            }],
        );
        CommandToolbox::new(
            specs,
            &ToolConfig {
                timeout_secs: 10,
                output_limit_bytes: 10_000,
            },
        )
    }

    fn request(root: &Path) -> ToolRequest {
        let input = root.join("input.png");
        fs::write(&input, b"img").expect("write input");
        ToolRequest {
            input_image: input,
            output_dir: root.join("out"),
            log_path: root.join("tool.log"),
        }
    }

    /// A cooperative tool writes one file, which is normalized to output.png.
    #[test]
    fn invoke_normalizes_single_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let toolbox = toolbox(vec!["sh", "-c", "cp {input} {output}/restored.png"]);

        let image = toolbox
            .invoke(Subtask::Denoising, "dncnn", &request)
            .expect("invoke");
        assert_eq!(image, request.output_dir.join("output.png"));
        assert!(image.is_file());
        assert!(request.log_path.is_file());
    }

    /// Zero output files is a recoverable tool-attempt failure.
    #[test]
    fn invoke_rejects_empty_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let toolbox = toolbox(vec!["true"]);

        let err = toolbox
            .invoke(Subtask::Denoising, "dncnn", &request)
            .unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    /// More than one output file is a recoverable tool-attempt failure.
    #[test]
    fn invoke_rejects_multiple_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let toolbox = toolbox(vec!["sh", "-c", "touch {output}/a.png {output}/b.png"]);

        let err = toolbox
            .invoke(Subtask::Denoising, "dncnn", &request)
            .unwrap_err();
        assert!(err.to_string().contains("expected exactly one"));
    }

    #[test]
    fn invoke_rejects_non_zero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let toolbox = toolbox(vec!["sh", "-c", "exit 3"]);

        let err = toolbox
            .invoke(Subtask::Denoising, "dncnn", &request)
            .unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn invoke_rejects_dirty_output_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        fs::create_dir_all(&request.output_dir).expect("mkdir");
        fs::write(request.output_dir.join("stale.png"), b"x").expect("write");
        let toolbox = toolbox(vec!["true"]);

        let err = toolbox
            .invoke(Subtask::Denoising, "dncnn", &request)
            .unwrap_err();
        assert!(err.to_string().contains("not empty"));
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = request(temp.path());
        let toolbox = toolbox(vec!["true"]);

        let err = toolbox
            .invoke(Subtask::Denoising, "ghost", &request)
            .unwrap_err();
        assert!(err.to_string().contains("no tool 'ghost'"));
    }
}
