use crate::{
    audio::pcm::{AudioPcm, secs_to_frames},
    foundation::error::{ExplicateError, ExplicateResult},
};

/// Join clips end to end, in order.
///
/// All clips must share one sample rate. Mono clips are duplicated into stereo when any clip in
/// the list is stereo.
pub fn concat_tracks(clips: Vec<AudioPcm>) -> ExplicateResult<AudioPcm> {
    let Some(first) = clips.first() else {
        return Err(ExplicateError::validation(
            "cannot concatenate an empty list of audio clips",
        ));
    };
    let sample_rate = first.sample_rate;
    if let Some(bad) = clips.iter().find(|c| c.sample_rate != sample_rate) {
        return Err(ExplicateError::validation(format!(
            "audio clips disagree on sample rate ({} vs {})",
            sample_rate, bad.sample_rate
        )));
    }
    let channels = clips.iter().map(|c| c.channels.max(1)).max().unwrap_or(1);
    let total: usize = clips.iter().map(|c| c.frames()).sum();

    let mut out = Vec::with_capacity(total * usize::from(channels));
    for clip in clips {
        let clip = clip.upmixed(channels);
        out.extend_from_slice(&clip.interleaved_f32);
    }

    Ok(AudioPcm {
        sample_rate,
        channels,
        interleaved_f32: out,
    })
}

/// Drop everything after `max_sec`; shorter tracks are left as they are.
pub fn trim_tail(mut pcm: AudioPcm, max_sec: f64) -> AudioPcm {
    let max_frames = secs_to_frames(max_sec, pcm.sample_rate);
    if pcm.frames() > max_frames {
        pcm.set_frames(max_frames);
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(channels: u16, samples: Vec<f32>) -> AudioPcm {
        AudioPcm {
            sample_rate: 4,
            channels,
            interleaved_f32: samples,
        }
    }

    #[test]
    fn concat_preserves_order_and_upmixes_mono() {
        let out = concat_tracks(vec![
            clip(1, vec![0.1, 0.2]),
            clip(2, vec![0.3, 0.3, 0.4, 0.4]),
        ])
        .unwrap();
        assert_eq!(out.channels, 2);
        assert_eq!(out.frames(), 4);
        assert_eq!(
            out.interleaved_f32,
            vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]
        );
    }

    #[test]
    fn concat_rejects_mixed_rates_and_empty_input() {
        let mut other = clip(1, vec![0.0]);
        other.sample_rate = 8;
        assert!(concat_tracks(vec![clip(1, vec![0.0]), other]).is_err());
        assert!(concat_tracks(Vec::new()).is_err());
    }

    #[test]
    fn trim_tail_only_shortens() {
        let long = clip(1, vec![0.5; 12]);
        assert_eq!(trim_tail(long, 2.0).frames(), 8);
        let short = clip(1, vec![0.5; 4]);
        assert_eq!(trim_tail(short, 2.0).frames(), 4);
    }
}
