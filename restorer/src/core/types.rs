//! Shared deterministic types for the restoration engine.
//!
//! These types define stable contracts between components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of a registered restoration tool.
pub type ToolName = String;

/// One of the eight degradation kinds the engine knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Degradation {
    MotionBlur,
    DefocusBlur,
    Rain,
    Haze,
    Dark,
    Noise,
    JpegArtifact,
    LowResolution,
}

impl Degradation {
    pub const ALL: [Degradation; 8] = [
        Degradation::MotionBlur,
        Degradation::DefocusBlur,
        Degradation::Rain,
        Degradation::Haze,
        Degradation::Dark,
        Degradation::Noise,
        Degradation::JpegArtifact,
        Degradation::LowResolution,
    ];

    /// The seven kinds the severity oracle judges. Low resolution is detected
    /// by the pixel-size policy, not the oracle.
    pub const JUDGEABLE: [Degradation; 7] = [
        Degradation::MotionBlur,
        Degradation::DefocusBlur,
        Degradation::Rain,
        Degradation::Haze,
        Degradation::Dark,
        Degradation::Noise,
        Degradation::JpegArtifact,
    ];

    /// The restoration subtask that addresses this degradation.
    pub fn subtask(self) -> Subtask {
        match self {
            Degradation::MotionBlur => Subtask::MotionDeblurring,
            Degradation::DefocusBlur => Subtask::DefocusDeblurring,
            Degradation::Rain => Subtask::Deraining,
            Degradation::Haze => Subtask::Dehazing,
            Degradation::Dark => Subtask::Brightening,
            Degradation::Noise => Subtask::Denoising,
            Degradation::JpegArtifact => Subtask::JpegArtifactRemoval,
            Degradation::LowResolution => Subtask::SuperResolution,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Degradation::MotionBlur => "motion-blur",
            Degradation::DefocusBlur => "defocus-blur",
            Degradation::Rain => "rain",
            Degradation::Haze => "haze",
            Degradation::Dark => "dark",
            Degradation::Noise => "noise",
            Degradation::JpegArtifact => "jpeg-artifact",
            Degradation::LowResolution => "low-resolution",
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A restoration task targeting one [`Degradation`] kind. Bijective with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subtask {
    MotionDeblurring,
    DefocusDeblurring,
    Deraining,
    Dehazing,
    Brightening,
    Denoising,
    JpegArtifactRemoval,
    SuperResolution,
}

impl Subtask {
    /// The degradation this subtask addresses.
    pub fn degradation(self) -> Degradation {
        match self {
            Subtask::MotionDeblurring => Degradation::MotionBlur,
            Subtask::DefocusDeblurring => Degradation::DefocusBlur,
            Subtask::Deraining => Degradation::Rain,
            Subtask::Dehazing => Degradation::Haze,
            Subtask::Brightening => Degradation::Dark,
            Subtask::Denoising => Degradation::Noise,
            Subtask::JpegArtifactRemoval => Degradation::JpegArtifact,
            Subtask::SuperResolution => Degradation::LowResolution,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Subtask::MotionDeblurring => "motion-deblurring",
            Subtask::DefocusDeblurring => "defocus-deblurring",
            Subtask::Deraining => "deraining",
            Subtask::Dehazing => "dehazing",
            Subtask::Brightening => "brightening",
            Subtask::Denoising => "denoising",
            Subtask::JpegArtifactRemoval => "jpeg-artifact-removal",
            Subtask::SuperResolution => "super-resolution",
        }
    }
}

impl fmt::Display for Subtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subtask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion-deblurring" => Ok(Subtask::MotionDeblurring),
            "defocus-deblurring" => Ok(Subtask::DefocusDeblurring),
            "deraining" => Ok(Subtask::Deraining),
            "dehazing" => Ok(Subtask::Dehazing),
            "brightening" => Ok(Subtask::Brightening),
            "denoising" => Ok(Subtask::Denoising),
            "jpeg-artifact-removal" => Ok(Subtask::JpegArtifactRemoval),
            "super-resolution" => Ok(Subtask::SuperResolution),
            other => Err(format!("unknown subtask '{other}'")),
        }
    }
}

/// Degradation intensity on the oracle's 5-point scale.
///
/// `VeryLow` means the degradation is barely present (good quality).
/// `Ord` follows declaration order, so lower is better; every comparison and
/// sort in the engine rests on this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::VeryLow,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::VeryHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::VeryLow => "very-low",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::VeryHigh => "very-high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pairwise comparator verdict over an ordered image pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    /// The first image is better.
    Former,
    /// The second image is better.
    Latter,
    /// No meaningful difference.
    Neither,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degradation_subtask_bijection_round_trips() {
        for degradation in Degradation::ALL {
            assert_eq!(degradation.subtask().degradation(), degradation);
        }
    }

    #[test]
    fn severity_orders_worst_last() {
        assert!(Severity::VeryLow < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::VeryHigh);
    }

    #[test]
    fn subtask_serde_uses_kebab_case() {
        let json = serde_json::to_string(&Subtask::JpegArtifactRemoval).expect("serialize");
        assert_eq!(json, "\"jpeg-artifact-removal\"");
        let parsed: Subtask = serde_json::from_str("\"super-resolution\"").expect("deserialize");
        assert_eq!(parsed, Subtask::SuperResolution);
    }

    #[test]
    fn subtask_from_str_matches_display() {
        for degradation in Degradation::ALL {
            let subtask = degradation.subtask();
            assert_eq!(subtask.as_str().parse::<Subtask>(), Ok(subtask));
        }
    }
}
