use std::path::{Path, PathBuf};

use crate::foundation::error::{ExplicateError, ExplicateResult};

/// What `ffprobe` reports about a media file.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration_sec: f64,
    /// Video frame rate, `None` when the container does not expose a usable one.
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
    pub audio_channels: Option<u16>,
    pub audio_sample_rate: Option<u32>,
}

impl MediaInfo {
    /// Frame rate, substituting `default_fps` when the source exposes none.
    pub fn fps_or(&self, default_fps: f64) -> f64 {
        self.fps.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(default_fps)
    }

    /// Frame size rounded down to even dimensions (yuv420p requirement).
    pub fn even_size(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.width?, self.height?);
        let (w, h) = (w & !1, h & !1);
        (w > 0 && h > 0).then_some((w, h))
    }
}

#[derive(serde::Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u16>,
    sample_rate: Option<String>,
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeOut {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

/// Probe `path` with `ffprobe -print_format json`.
pub fn probe_media(path: &Path) -> ExplicateResult<MediaInfo> {
    let out = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| ExplicateError::media(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(ExplicateError::media(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    parse_probe_json(path, &out.stdout)
}

pub(crate) fn parse_probe_json(path: &Path, json: &[u8]) -> ExplicateResult<MediaInfo> {
    let parsed: ProbeOut = serde_json::from_slice(json)
        .map_err(|e| ExplicateError::media(format!("ffprobe json parse failed: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let format_duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok());
    let stream_duration = parsed
        .streams
        .iter()
        .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));
    let duration_sec = format_duration
        .or(stream_duration)
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let fps = video.and_then(|v| {
        v.r_frame_rate
            .as_deref()
            .and_then(parse_ff_ratio)
            .or_else(|| v.avg_frame_rate.as_deref().and_then(parse_ff_ratio))
    });

    Ok(MediaInfo {
        path: path.to_path_buf(),
        duration_sec,
        fps,
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        audio_channels: audio.and_then(|a| a.channels),
        audio_sample_rate: audio
            .and_then(|a| a.sample_rate.as_deref())
            .and_then(|s| s.parse::<u32>().ok()),
    })
}

fn parse_ff_ratio(s: &str) -> Option<f64> {
    let mut parts = s.split('/');
    let a = parts.next()?.trim().parse::<f64>().ok()?;
    let b = match parts.next() {
        Some(d) => d.trim().parse::<f64>().ok()?,
        None => 1.0,
    };
    if b == 0.0 || a <= 0.0 {
        return None;
    }
    Some(a / b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parsing_rejects_zero_rates() {
        assert_eq!(parse_ff_ratio("30/1"), Some(30.0));
        assert!((parse_ff_ratio("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_ff_ratio("0/0"), None);
        assert_eq!(parse_ff_ratio("24"), Some(24.0));
        assert_eq!(parse_ff_ratio("x/1"), None);
    }

    #[test]
    fn probe_json_without_frame_rate_leaves_fps_unset() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 641, "height": 480, "r_frame_rate": "0/0"},
                {"codec_type": "audio", "channels": 1, "sample_rate": "44100", "duration": "3.5"}
            ],
            "format": {"duration": "4.000000"}
        }"#;
        let info = parse_probe_json(Path::new("v.mp4"), json).unwrap();
        assert_eq!(info.fps, None);
        assert_eq!(info.fps_or(24.0), 24.0);
        assert_eq!(info.duration_sec, 4.0);
        assert_eq!(info.even_size(), Some((640, 480)));
        assert!(info.has_audio);
        assert_eq!(info.audio_channels, Some(1));
        assert_eq!(info.audio_sample_rate, Some(44_100));
    }

    #[test]
    fn probe_json_falls_back_to_stream_duration() {
        let json = br#"{
            "streams": [{"codec_type": "audio", "channels": 2, "duration": "1.25"}],
            "format": {}
        }"#;
        let info = parse_probe_json(Path::new("a.wav"), json).unwrap();
        assert!(!info.has_video);
        assert_eq!(info.duration_sec, 1.25);
        assert_eq!(info.even_size(), None);
    }
}
