use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    foundation::error::{ExplicateError, ExplicateResult},
    lifecycle::RetryPolicy,
};

/// How narration is attached to the rendered video.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeStrategy {
    /// Cut the video into one window per segment and fit each clip to its window.
    #[default]
    PerSegment,
    /// Concatenate the clips unmodified and lay them over the whole video once.
    WholeTrack,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sync: SyncConfig,
    pub render: RenderConfig,
    pub voice: VoiceConfig,
    pub placeholder: PlaceholderConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub strategy: ComposeStrategy,
    /// Frame rate used when the source exposes none.
    pub default_fps: f64,
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub encoder_threads: u32,
    pub sample_rate: u32,
    /// Directory the final artifact is written to (system temp dir when unset).
    pub output_dir: Option<PathBuf>,
    /// Parent of the per-run working directory (system temp dir when unset).
    pub temp_root: Option<PathBuf>,
    /// Delete the narration files once the run is over.
    pub consume_audio_sources: bool,
    pub delete_attempts: u32,
    pub delete_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: ComposeStrategy::PerSegment,
            default_fps: 24.0,
            container: "mp4".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            encoder_threads: 4,
            sample_rate: crate::audio::MIX_SAMPLE_RATE,
            output_dir: None,
            temp_root: None,
            consume_audio_sources: true,
            delete_attempts: 3,
            delete_backoff_ms: 100,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.delete_attempts,
            backoff: Duration::from_millis(self.delete_backoff_ms),
        }
    }

    pub fn validate(&self) -> ExplicateResult<()> {
        if !self.default_fps.is_finite() || self.default_fps <= 0.0 {
            return Err(ExplicateError::validation("sync default_fps must be positive"));
        }
        if self.container.trim().is_empty() {
            return Err(ExplicateError::validation("sync container must be set"));
        }
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(ExplicateError::validation("sync codecs must be set"));
        }
        if self.encoder_threads == 0 {
            return Err(ExplicateError::validation(
                "sync encoder_threads must be non-zero",
            ));
        }
        if self.sample_rate == 0 {
            return Err(ExplicateError::validation("sync sample_rate must be non-zero"));
        }
        if self.delete_attempts == 0 {
            return Err(ExplicateError::validation(
                "sync delete_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Interpreter used to run the renderer module.
    pub python: String,
    pub module: String,
    pub quality_flag: String,
    pub scene: String,
    /// Base name of the rendered file, without extension.
    pub output_name: String,
    /// Total render attempts, counting the first.
    pub max_attempts: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            module: "manim".to_string(),
            quality_flag: "-ql".to_string(),
            scene: "ExplanationScene".to_string(),
            output_name: "explanation_video".to_string(),
            max_attempts: 4,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> ExplicateResult<()> {
        if self.max_attempts == 0 {
            return Err(ExplicateError::validation(
                "render max_attempts must be at least 1",
            ));
        }
        if self.scene.trim().is_empty() {
            return Err(ExplicateError::validation("render scene must be set"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub program: String,
    /// Arguments; `{text}` and `{out}` are substituted per segment.
    pub args: Vec<String>,
    /// Extension of the files the program writes.
    pub extension: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            args: vec!["-w".to_string(), "{out}".to_string(), "{text}".to_string()],
            extension: "wav".to_string(),
        }
    }
}

impl VoiceConfig {
    pub fn validate(&self) -> ExplicateResult<()> {
        if self.program.trim().is_empty() {
            return Err(ExplicateError::validation("voice program must be set"));
        }
        if !self.args.iter().any(|a| a.contains("{out}")) {
            return Err(ExplicateError::validation(
                "voice args must contain an {out} placeholder",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_sec: f64,
    /// Any colour name or hex value ffmpeg's `color` source accepts.
    pub color: String,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 24,
            duration_sec: 2.0,
            color: "black".to_string(),
        }
    }
}

impl PlaceholderConfig {
    pub fn validate(&self) -> ExplicateResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExplicateError::validation(
                "placeholder width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(ExplicateError::validation(
                "placeholder width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if self.fps == 0 {
            return Err(ExplicateError::validation("placeholder fps must be non-zero"));
        }
        if !self.duration_sec.is_finite() || self.duration_sec <= 0.0 {
            return Err(ExplicateError::validation(
                "placeholder duration_sec must be positive",
            ));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> ExplicateResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| ExplicateError::validation(format!("invalid config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_json(path: &Path) -> ExplicateResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExplicateError::validation(format!(
                "failed to read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> ExplicateResult<()> {
        self.sync.validate()?;
        self.render.validate()?;
        self.voice.validate()?;
        self.placeholder.validate()
    }
}
