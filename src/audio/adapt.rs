//! Fit a narration clip to an exact window length.
//!
//! Policy, in order:
//! 1. within [`PASSTHROUGH_TOLERANCE_SECS`] of the target: keep the samples as they are;
//! 2. longer than the target with a speed factor inside
//!    [`MIN_SPEED_FACTOR`]`..=`[`MAX_SPEED_FACTOR`]: time-compress (pitch is not preserved);
//! 3. longer with a more extreme factor: keep a centered excerpt of target length;
//! 4. shorter: append silence.
//!
//! The result is then cut or zero-extended to the exact target frame count and, when it is at
//! least [`MIN_FADE_CLIP_SECS`] long, faded in and out to avoid clicks at window boundaries.

use crate::{
    audio::pcm::{AudioPcm, secs_to_frames},
    foundation::error::{ExplicateError, ExplicateResult},
};

pub const PASSTHROUGH_TOLERANCE_SECS: f64 = 0.1;
pub const MIN_SPEED_FACTOR: f64 = 0.8;
pub const MAX_SPEED_FACTOR: f64 = 1.5;
pub const MIN_FADE_CLIP_SECS: f64 = 0.3;
pub const MAX_FADE_SECS: f64 = 0.1;

/// Which correction was applied to reach the target duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FitAction {
    PassThrough,
    SpeedUp { factor: f64 },
    CenterTrim { offset_sec: f64 },
    PadSilence { silence_sec: f64 },
}

#[derive(Clone, Debug)]
pub struct FittedAudio {
    pub pcm: AudioPcm,
    pub action: FitAction,
    /// Fade length applied at each end, if any.
    pub fade_sec: Option<f64>,
}

/// Decide how a clip of `source_sec` is brought to `target_sec`.
pub fn plan_fit(source_sec: f64, target_sec: f64) -> FitAction {
    if (source_sec - target_sec).abs() <= PASSTHROUGH_TOLERANCE_SECS {
        return FitAction::PassThrough;
    }
    if source_sec > target_sec {
        let factor = source_sec / target_sec;
        if (MIN_SPEED_FACTOR..=MAX_SPEED_FACTOR).contains(&factor) {
            FitAction::SpeedUp { factor }
        } else {
            FitAction::CenterTrim {
                offset_sec: (source_sec - target_sec) / 2.0,
            }
        }
    } else {
        FitAction::PadSilence {
            silence_sec: target_sec - source_sec,
        }
    }
}

/// Fade length for a clip of `duration_sec`, or `None` when the clip is too short to fade.
pub fn fade_for(duration_sec: f64) -> Option<f64> {
    (duration_sec >= MIN_FADE_CLIP_SECS).then(|| MAX_FADE_SECS.min(duration_sec / 4.0))
}

/// Produce a clip of exactly `target_sec` (to the nearest sample frame) from `src`.
pub fn fit_to_duration(src: &AudioPcm, target_sec: f64) -> ExplicateResult<FittedAudio> {
    if !target_sec.is_finite() || target_sec <= 0.0 {
        return Err(ExplicateError::validation(format!(
            "audio target duration must be positive, got {target_sec}"
        )));
    }
    if src.sample_rate == 0 {
        return Err(ExplicateError::validation("audio sample_rate must be non-zero"));
    }

    let channels = src.channels.max(1);
    let target_frames = secs_to_frames(target_sec, src.sample_rate);
    let action = plan_fit(src.duration_sec(), target_sec);

    let mut pcm = match action {
        FitAction::PassThrough => src.clone(),
        FitAction::SpeedUp { factor } => time_compress(src, factor, target_frames),
        FitAction::CenterTrim { offset_sec } => {
            src.slice_frames(secs_to_frames(offset_sec, src.sample_rate), target_frames)
        }
        FitAction::PadSilence { .. } => src.clone(),
    };
    pcm.channels = channels;
    pcm.set_frames(target_frames);

    let fade_sec = fade_for(pcm.duration_sec());
    if let Some(fade) = fade_sec {
        apply_fades(&mut pcm, fade, fade);
    }

    Ok(FittedAudio {
        pcm,
        action,
        fade_sec,
    })
}

/// Resample so the clip plays `factor` times faster, producing `out_frames` frames.
fn time_compress(src: &AudioPcm, factor: f64, out_frames: usize) -> AudioPcm {
    let ch = usize::from(src.channels.max(1));
    let src_frames = src.frames();
    let mut out = Vec::with_capacity(out_frames * ch);

    for i in 0..out_frames {
        let src_pos = i as f64 * factor;
        let f0 = src_pos.floor() as usize;
        if f0 >= src_frames {
            break;
        }
        let f1 = (f0 + 1).min(src_frames - 1);
        let frac = (src_pos - f0 as f64) as f32;
        for c in 0..ch {
            let v0 = src.interleaved_f32[f0 * ch + c];
            let v1 = src.interleaved_f32[f1 * ch + c];
            out.push(v0 + (v1 - v0) * frac);
        }
    }

    AudioPcm {
        sample_rate: src.sample_rate,
        channels: src.channels.max(1),
        interleaved_f32: out,
    }
}

/// Linear gain ramps over the first `fade_in_sec` and last `fade_out_sec` of the clip.
pub fn apply_fades(pcm: &mut AudioPcm, fade_in_sec: f64, fade_out_sec: f64) {
    let ch = usize::from(pcm.channels.max(1));
    let frames = pcm.frames();
    if frames == 0 {
        return;
    }
    let len_sec = pcm.duration_sec();
    let rate = f64::from(pcm.sample_rate);

    for frame in 0..frames {
        let t = frame as f64 / rate;
        let gain = fade_gain(t, len_sec, fade_in_sec, fade_out_sec);
        if gain >= 1.0 {
            continue;
        }
        for s in &mut pcm.interleaved_f32[frame * ch..(frame + 1) * ch] {
            *s *= gain;
        }
    }
}

fn fade_gain(rel_sec: f64, len_sec: f64, fade_in_sec: f64, fade_out_sec: f64) -> f32 {
    let mut gain = 1.0f32;
    if fade_in_sec > 0.0 {
        gain *= (rel_sec / fade_in_sec).clamp(0.0, 1.0) as f32;
    }
    if fade_out_sec > 0.0 {
        let rem = (len_sec - rel_sec).max(0.0);
        gain *= (rem / fade_out_sec).clamp(0.0, 1.0) as f32;
    }
    gain
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8_000;

    fn tone(secs: f64, channels: u16) -> AudioPcm {
        let frames = secs_to_frames(secs, RATE);
        AudioPcm {
            sample_rate: RATE,
            channels,
            interleaved_f32: vec![0.5; frames * usize::from(channels)],
        }
    }

    #[test]
    fn small_mismatch_passes_through() {
        assert_eq!(plan_fit(3.05, 3.0), FitAction::PassThrough);
        assert_eq!(plan_fit(2.95, 3.0), FitAction::PassThrough);
    }

    #[test]
    fn moderate_overrun_is_sped_up() {
        let out = fit_to_duration(&tone(4.0, 1), 3.0).unwrap();
        match out.action {
            FitAction::SpeedUp { factor } => assert!((factor - 4.0 / 3.0).abs() < 1e-9),
            other => panic!("unexpected action {other:?}"),
        }
        assert!((out.pcm.duration_sec() - 3.0).abs() < 0.05);
    }

    #[test]
    fn extreme_overrun_keeps_the_center() {
        let frames = secs_to_frames(4.0, RATE);
        let src = AudioPcm {
            sample_rate: RATE,
            channels: 1,
            interleaved_f32: (0..frames).map(|i| i as f32 / frames as f32).collect(),
        };
        let out = fit_to_duration(&src, 1.0).unwrap();
        assert_eq!(out.action, FitAction::CenterTrim { offset_sec: 1.5 });
        assert!((out.pcm.duration_sec() - 1.0).abs() < 0.05);
        // Middle of the excerpt sits at the middle of the source; fades leave it untouched.
        let mid = out.pcm.interleaved_f32[out.pcm.frames() / 2];
        assert!((mid - 0.5).abs() < 0.01);
    }

    #[test]
    fn short_clip_is_padded_with_silence_and_faded() {
        let out = fit_to_duration(&tone(2.8, 2), 3.0).unwrap();
        match out.action {
            FitAction::PadSilence { silence_sec } => assert!((silence_sec - 0.2).abs() < 1e-9),
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(out.pcm.channels, 2);
        assert_eq!(out.pcm.frames(), secs_to_frames(3.0, RATE));
        assert_eq!(out.fade_sec, Some(0.1));
        // Padded tail is silent, faded head starts at zero.
        assert_eq!(*out.pcm.interleaved_f32.last().unwrap(), 0.0);
        assert_eq!(out.pcm.interleaved_f32[0], 0.0);
    }

    #[test]
    fn short_targets_skip_fades() {
        let out = fit_to_duration(&tone(0.2, 1), 0.25).unwrap();
        assert_eq!(out.fade_sec, None);
        assert_eq!(out.pcm.interleaved_f32[0], 0.5);
    }

    #[test]
    fn fade_length_is_capped_by_quarter_duration() {
        assert_eq!(fade_for(0.2), None);
        assert_eq!(fade_for(0.32), Some(0.08));
        assert_eq!(fade_for(10.0), Some(0.1));
    }

    #[test]
    fn output_length_tracks_target_for_many_inputs() {
        for &src in &[0.0, 0.05, 0.5, 1.0, 2.0, 2.95, 3.0, 3.2, 4.4, 4.6, 12.0] {
            for &tgt in &[0.02, 0.3, 1.0, 3.0, 7.5] {
                let out = fit_to_duration(&tone(src, 1), tgt).unwrap();
                assert!(
                    (out.pcm.duration_sec() - tgt).abs() <= 0.05,
                    "src={src} tgt={tgt} got={}",
                    out.pcm.duration_sec()
                );
            }
        }
    }

    #[test]
    fn non_positive_target_is_rejected() {
        assert!(fit_to_duration(&tone(1.0, 1), 0.0).is_err());
        assert!(fit_to_duration(&tone(1.0, 1), f64::NAN).is_err());
    }
}
