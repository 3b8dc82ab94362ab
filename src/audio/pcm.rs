use std::path::Path;

use crate::{
    foundation::error::{ExplicateError, ExplicateResult},
    media::{FfmpegCommand, ensure_parent_dir, probe_media},
};

/// Sample rate every narration clip is decoded to before alignment.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// Decoded audio, interleaved `f32` samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved_f32: Vec<f32>,
}

impl AudioPcm {
    pub fn silence(sample_rate: u32, channels: u16, duration_sec: f64) -> Self {
        let channels = channels.max(1);
        let frames = secs_to_frames(duration_sec, sample_rate);
        Self {
            sample_rate,
            channels,
            interleaved_f32: vec![0.0; frames * usize::from(channels)],
        }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.interleaved_f32.len() / usize::from(self.channels)
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Truncate or zero-extend to exactly `frames` sample frames.
    pub fn set_frames(&mut self, frames: usize) {
        self.interleaved_f32
            .resize(frames * usize::from(self.channels.max(1)), 0.0);
    }

    /// Keep sample frames `[start, start + len)`, clamped to what exists.
    pub fn slice_frames(&self, start: usize, len: usize) -> Self {
        let ch = usize::from(self.channels.max(1));
        let start = start.min(self.frames());
        let end = (start + len).min(self.frames());
        Self {
            sample_rate: self.sample_rate,
            channels: self.channels,
            interleaved_f32: self.interleaved_f32[start * ch..end * ch].to_vec(),
        }
    }

    /// Duplicate a mono signal into `channels` channels; other layouts pass through.
    pub fn upmixed(mut self, channels: u16) -> Self {
        if self.channels == 1 && channels > 1 {
            let ch = usize::from(channels);
            let mut out = Vec::with_capacity(self.interleaved_f32.len() * ch);
            for &s in &self.interleaved_f32 {
                out.extend(std::iter::repeat_n(s, ch));
            }
            self.interleaved_f32 = out;
            self.channels = channels;
        }
        self
    }
}

/// Round a duration to the nearest whole sample frame.
pub fn secs_to_frames(secs: f64, sample_rate: u32) -> usize {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * f64::from(sample_rate)).round() as usize
}

/// Decode `path` to interleaved `f32` PCM at `sample_rate`.
///
/// The source channel layout is kept (mono stays mono); layouts wider than stereo are folded to
/// stereo. When the channel count cannot be determined the clip is decoded as mono.
pub fn decode_audio(path: &Path, sample_rate: u32) -> ExplicateResult<AudioPcm> {
    if !path.is_file() {
        return Err(ExplicateError::audio_load(format!(
            "audio file '{}' does not exist",
            path.display()
        )));
    }
    let channels = probe_media(path)
        .ok()
        .and_then(|info| info.audio_channels)
        .unwrap_or(1)
        .clamp(1, 2);

    let stdout = FfmpegCommand::new()
        .input(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            &channels.to_string(),
            "-ar",
            &sample_rate.to_string(),
            "pipe:1",
        ])
        .run_capture()
        .map_err(|e| {
            ExplicateError::audio_load(format!("decode of '{}' failed: {e}", path.display()))
        })?;

    if !stdout.len().is_multiple_of(4) {
        return Err(ExplicateError::audio_load(
            "decoded audio byte length is not aligned to f32 samples",
        ));
    }
    let interleaved_f32 = stdout
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(AudioPcm {
        sample_rate,
        channels,
        interleaved_f32,
    })
}

/// Write interleaved samples as raw little-endian `f32le`.
pub fn write_f32le(pcm: &AudioPcm, out_path: &Path) -> ExplicateResult<()> {
    ensure_parent_dir(out_path)?;
    let mut bytes = Vec::<u8>::with_capacity(pcm.interleaved_f32.len() * 4);
    for &sample in &pcm.interleaved_f32 {
        bytes.extend_from_slice(&sample.clamp(-1.0, 1.0).to_le_bytes());
    }
    std::fs::write(out_path, bytes).map_err(|e| {
        ExplicateError::media(format!(
            "failed to write audio file '{}': {e}",
            out_path.display()
        ))
    })
}
