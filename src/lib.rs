#![forbid(unsafe_code)]

pub mod audio;
pub mod config;
pub mod foundation;
pub mod generate;
pub mod lifecycle;
pub mod media;
pub mod model;
pub mod outcome;
pub mod pipeline;
pub mod render;
pub mod sync;
pub mod video;

pub use audio::{AudioPcm, FitAction, FittedAudio, fit_to_duration};
pub use config::{
    ComposeStrategy, PipelineConfig, PlaceholderConfig, RenderConfig, SyncConfig, VoiceConfig,
};
pub use foundation::error::{ExplicateError, ExplicateResult};
pub use generate::{
    CodeGenerator, CommandVoice, ProgramFile, ScriptFile, ScriptGenerator, VoiceSynthesizer,
    clean_program_response, parse_script_response,
};
pub use lifecycle::{ChildGuard, ResourceKey, ResourceRegistry, RetryPolicy, cleanup_paths};
pub use media::{MediaInfo, probe_media};
pub use model::{AudioSegment, NarrationSegment, Script, TimeWindow};
pub use outcome::{Degradation, Outcome};
pub use pipeline::{LogProgress, Pipeline, PipelineOutput, ProgressSink, Stage};
pub use render::{CommandRenderer, RenderedVideo, Renderer, find_rendered_video, render_with_repair};
pub use sync::{SyncArtifact, Synchronizer, TimelinePlan, plan_windows, scale_factor};
pub use video::{TrimBackend, VideoSegmenter, clamp_window, write_placeholder};
