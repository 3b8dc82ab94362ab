//! Narration audio: decoding, fitting clips to windows, and building continuous tracks.

pub mod adapt;
pub mod pcm;
pub mod track;

pub use adapt::{FitAction, FittedAudio, fit_to_duration};
pub use pcm::{AudioPcm, MIX_SAMPLE_RATE, decode_audio, write_f32le};
pub use track::{concat_tracks, trim_tail};
