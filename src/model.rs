use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Duration assumed for a narration segment whose script entry carries none.
pub const DEFAULT_SEGMENT_SECS: f64 = 5.0;

/// One spoken beat of the script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    /// Text handed to the voice synthesizer.
    #[serde(rename = "narration", default)]
    pub narration_text: String,
    /// What the animation should show while the narration plays.
    #[serde(default)]
    pub visual_description: String,
    /// Script's estimate of how long this beat lasts.
    #[serde(
        rename = "duration_seconds",
        default = "default_segment_secs",
        deserialize_with = "duration_or_default"
    )]
    pub target_duration_seconds: f64,
}

/// Script produced by the script generator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub segments: Vec<NarrationSegment>,
}

impl Script {
    /// Sum of the script's per-segment duration estimates.
    pub fn total_duration_seconds(&self) -> f64 {
        self.segments.iter().map(|s| s.target_duration_seconds).sum()
    }

    /// File name offered to the user when downloading the final video.
    pub fn download_name(&self, extension: &str) -> String {
        let stem = if self.title.trim().is_empty() {
            "explainer".to_string()
        } else {
            self.title.trim().replace(' ', "_")
        };
        format!("{stem}.{extension}")
    }
}

/// Synthesized narration for one [`NarrationSegment`], in the same position of the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    #[serde(rename = "path")]
    pub source_path: PathBuf,
    #[serde(
        rename = "duration_seconds",
        default = "default_segment_secs",
        deserialize_with = "duration_or_default"
    )]
    pub target_duration_seconds: f64,
}

impl AudioSegment {
    pub fn new(source_path: impl Into<PathBuf>, target_duration_seconds: f64) -> Self {
        Self {
            source_path: source_path.into(),
            target_duration_seconds,
        }
    }
}

/// Half-open time range `[start, end)` in seconds on the rendered video's timeline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn width(self) -> f64 {
        self.end - self.start
    }

    /// `true` when `end` is strictly after `start` and both are finite.
    pub fn is_valid(self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.4}s, {:.4}s)", self.start, self.end)
    }
}

fn default_segment_secs() -> f64 {
    DEFAULT_SEGMENT_SECS
}

// Generators are loose about numbers: accept ints, floats, numeric strings and null.
fn duration_or_default<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let secs = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(secs
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_SEGMENT_SECS))
}
