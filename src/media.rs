//! Thin wrappers over the system `ffmpeg`/`ffprobe` binaries.

pub mod ffmpeg;
pub mod probe;

pub use ffmpeg::{FfmpegCommand, ensure_parent_dir, is_ffmpeg_on_path, is_ffprobe_on_path};
pub use probe::{MediaInfo, probe_media};
