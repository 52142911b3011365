//! On-disk layout of one restoration run.
//!
//! Each run gets its own timestamped directory under the caller's output
//! directory. The input image is staged into it so every node image, tool
//! log, and memory snapshot of the run lives under one root:
//!
//! ```text
//! <output_dir>/<stem>-<yymmdd_HHMMSS>/
//!     input.png
//!     memory.json
//!     result.png
//!     invocations/inv-<n>/{out/, tool.log}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tracing::info;

/// Paths of one run's workspace.
#[derive(Debug, Clone)]
pub struct RunPaths {
    run_dir: PathBuf,
    input_copy: PathBuf,
}

/// Locations for one tool invocation.
#[derive(Debug, Clone)]
pub struct InvocationPaths {
    pub output_dir: PathBuf,
    pub log_path: PathBuf,
}

impl RunPaths {
    /// Create the run directory and stage the input image into it.
    pub fn create(output_dir: &Path, input_image: &Path) -> Result<Self> {
        let stem = input_image
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("input {} has no usable stem", input_image.display()))?;
        let run_id = format!("{stem}-{}", Local::now().format("%y%m%d_%H%M%S"));
        let run_dir = output_dir.join(run_id);
        if run_dir.exists() {
            return Err(anyhow!("run directory {} already exists", run_dir.display()));
        }
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run directory {}", run_dir.display()))?;

        let input_copy = run_dir.join("input.png");
        fs::copy(input_image, &input_copy).with_context(|| {
            format!(
                "stage input {} into {}",
                input_image.display(),
                input_copy.display()
            )
        })?;

        info!(run_dir = %run_dir.display(), "created run workspace");
        Ok(Self {
            run_dir,
            input_copy,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Staged copy of the original input image; the tree root points here.
    pub fn input_copy(&self) -> &Path {
        &self.input_copy
    }

    pub fn memory_path(&self) -> PathBuf {
        self.run_dir.join("memory.json")
    }

    /// Final restored image, copied from the winning node on completion.
    pub fn result_path(&self) -> PathBuf {
        self.run_dir.join("result.png")
    }

    /// Locations for the `n`-th tool invocation of the run.
    pub fn invocation(&self, n: u32) -> InvocationPaths {
        let dir = self.run_dir.join("invocations").join(format!("inv-{n}"));
        InvocationPaths {
            output_dir: dir.join("out"),
            log_path: dir.join("tool.log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_stages_input_under_timestamped_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        fs::write(&input, b"img").expect("write input");
        let output_dir = temp.path().join("runs");

        let paths = RunPaths::create(&output_dir, &input).expect("create");
        let dir_name = paths
            .run_dir()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("dir name");
        assert!(dir_name.starts_with("photo-"));
        assert!(paths.input_copy().is_file());
        assert_eq!(fs::read(paths.input_copy()).expect("read"), b"img");
    }

    #[test]
    fn invocation_paths_are_keyed_by_counter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("photo.png");
        fs::write(&input, b"img").expect("write input");

        let paths = RunPaths::create(temp.path(), &input).expect("create");
        let inv = paths.invocation(3);
        assert!(inv.output_dir.ends_with("invocations/inv-3/out"));
        assert!(inv.log_path.ends_with("invocations/inv-3/tool.log"));
    }

    #[test]
    fn missing_input_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = RunPaths::create(temp.path(), &temp.path().join("missing.png")).unwrap_err();
        assert!(format!("{err:#}").contains("stage input"));
    }
}
