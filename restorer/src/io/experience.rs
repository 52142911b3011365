//! Scheduling experience hub.
//!
//! The hub is a JSON file holding raw cross-run scheduling observations and a
//! distilled summary of them. Retrieval-mode scheduling injects the distilled
//! text into the ordering prompt.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceHub {
    /// Raw per-plan observations the distillation was built from.
    pub raw: String,
    /// Distilled scheduling guidance.
    pub distilled: String,
}

/// Load the distilled experience text for retrieval-mode scheduling.
pub fn load_distilled(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read experience hub {}", path.display()))?;
    let hub: ExperienceHub = serde_json::from_str(&contents)
        .with_context(|| format!("parse experience hub {}", path.display()))?;
    if hub.distilled.trim().is_empty() {
        return Err(anyhow!("experience hub {} has no distilled text", path.display()));
    }
    Ok(hub.distilled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_distilled_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("schedule_experience.json");
        fs::write(
            &path,
            r#"{"raw":"when conducting first denoising...","distilled":"denoise before dehazing"}"#,
        )
        .expect("write");
        let distilled = load_distilled(&path).expect("load");
        assert_eq!(distilled, "denoise before dehazing");
    }

    #[test]
    fn missing_hub_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_distilled(&temp.path().join("missing.json")).unwrap_err();
        assert!(format!("{err:#}").contains("read experience hub"));
    }

    #[test]
    fn empty_distilled_text_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("schedule_experience.json");
        fs::write(&path, r#"{"raw":"obs","distilled":"  "}"#).expect("write");
        let err = load_distilled(&path).unwrap_err();
        assert!(err.to_string().contains("no distilled text"));
    }
}
