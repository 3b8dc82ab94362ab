//! Rendered-video side of alignment: window extraction and the placeholder clip.

pub mod placeholder;
pub mod segment;

pub use placeholder::write_placeholder;
pub use segment::{ExtractedClip, TrimBackend, VideoSegmenter, clamp_window};
