//! Cutting a time window out of a rendered video.
//!
//! Three extraction tiers are tried in order until one produces a clip:
//! - [`TrimBackend::TrimFilter`]: `trim`/`atrim` filter graph, frame-accurate;
//! - [`TrimBackend::SeekSubclip`]: input seek plus `-t`, for builds without the trim filters;
//! - [`TrimBackend::FrameResample`]: decode raw frames from the window at the target rate and
//!   re-encode them, for sources neither of the above can cut.
//!
//! The first tier that succeeds is remembered and tried first for later windows of the run.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::JoinHandle,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::SyncConfig,
    foundation::error::{ExplicateError, ExplicateResult},
    lifecycle::ChildGuard,
    media::{
        FfmpegCommand, MediaInfo, ensure_parent_dir,
        ffmpeg::{fps_arg, secs_arg},
    },
    model::TimeWindow,
};

/// Narrowest window handed to a backend after clamping.
pub const MIN_CLAMPED_WIDTH_SECS: f64 = 0.1;

/// Pull `window` into `[0, video_duration]`, keeping at least [`MIN_CLAMPED_WIDTH_SECS`].
///
/// A video shorter than the minimum width yields the whole video instead.
pub fn clamp_window(window: TimeWindow, video_duration: f64) -> TimeWindow {
    let limit = video_duration.max(0.0);
    let start = window
        .start
        .min(limit - MIN_CLAMPED_WIDTH_SECS)
        .max(0.0);
    let end = window
        .end
        .min(limit)
        .max(start + MIN_CLAMPED_WIDTH_SECS)
        .min(limit);
    TimeWindow::new(start, end)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimBackend {
    TrimFilter,
    SeekSubclip,
    FrameResample,
}

impl TrimBackend {
    pub const ALL: [TrimBackend; 3] = [
        TrimBackend::TrimFilter,
        TrimBackend::SeekSubclip,
        TrimBackend::FrameResample,
    ];
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedClip {
    pub path: PathBuf,
    /// Window actually extracted, after clamping.
    pub window: TimeWindow,
    pub fps: f64,
    pub has_audio: bool,
    pub backend: TrimBackend,
}

pub struct VideoSegmenter {
    backends: Vec<TrimBackend>,
    preferred: Option<TrimBackend>,
    default_fps: f64,
    video_codec: String,
    audio_codec: String,
    threads: u32,
}

impl VideoSegmenter {
    pub fn new(cfg: &SyncConfig) -> Self {
        Self::with_backends(cfg, TrimBackend::ALL.to_vec())
    }

    /// Restrict extraction to `backends`, tried in the given order.
    pub fn with_backends(cfg: &SyncConfig, backends: Vec<TrimBackend>) -> Self {
        Self {
            backends,
            preferred: None,
            default_fps: cfg.default_fps,
            video_codec: cfg.video_codec.clone(),
            audio_codec: cfg.audio_codec.clone(),
            threads: cfg.encoder_threads,
        }
    }

    /// Backend that last produced a clip, if any.
    pub fn preferred(&self) -> Option<TrimBackend> {
        self.preferred
    }

    fn attempt_order(&self) -> Vec<TrimBackend> {
        let mut order = Vec::with_capacity(self.backends.len());
        if let Some(p) = self.preferred {
            order.push(p);
        }
        order.extend(self.backends.iter().copied().filter(|b| Some(*b) != self.preferred));
        order
    }

    /// Write the part of `source` covered by `window` to `out`.
    pub fn extract(
        &mut self,
        source: &MediaInfo,
        window: TimeWindow,
        out: &Path,
    ) -> ExplicateResult<ExtractedClip> {
        let clamped = clamp_window(window, source.duration_sec);
        if clamped != window {
            debug!(requested = %window, clamped = %clamped, "clamped segment window");
        }
        let fps = source.fps_or(self.default_fps);
        ensure_parent_dir(out)?;

        let mut failures = Vec::new();
        for backend in self.attempt_order() {
            let result = match backend {
                TrimBackend::TrimFilter => self.trim_filter(source, clamped, fps, out),
                TrimBackend::SeekSubclip => self.seek_subclip(source, clamped, fps, out),
                TrimBackend::FrameResample => self.frame_resample(source, clamped, fps, out),
            };
            match result.and_then(|()| check_written(out)) {
                Ok(()) => {
                    self.preferred = Some(backend);
                    return Ok(ExtractedClip {
                        path: out.to_path_buf(),
                        window: clamped,
                        fps,
                        has_audio: source.has_audio,
                        backend,
                    });
                }
                Err(e) => {
                    warn!(?backend, window = %clamped, error = %e, "segment backend failed");
                    failures.push(format!("{backend:?}: {e}"));
                }
            }
        }

        Err(ExplicateError::alignment(format!(
            "could not extract {clamped} from '{}': {}",
            source.path.display(),
            failures.join("; ")
        )))
    }

    fn encode_args(&self, cmd: &mut FfmpegCommand, with_audio: bool) {
        cmd.args(["-c:v", &self.video_codec, "-pix_fmt", "yuv420p"]);
        if with_audio {
            cmd.args(["-c:a", &self.audio_codec]);
        } else {
            cmd.arg("-an");
        }
        cmd.args(["-threads", &self.threads.to_string()]);
    }

    fn trim_filter(
        &self,
        source: &MediaInfo,
        w: TimeWindow,
        fps: f64,
        out: &Path,
    ) -> ExplicateResult<()> {
        let (start, end) = (secs_arg(w.start), secs_arg(w.end));
        let mut graph = format!(
            "[0:v]trim=start={start}:end={end},setpts=PTS-STARTPTS,fps={}[v]",
            fps_arg(fps)
        );
        if source.has_audio {
            graph.push_str(&format!(
                ";[0:a]atrim=start={start}:end={end},asetpts=PTS-STARTPTS[a]"
            ));
        }

        let mut cmd = FfmpegCommand::new();
        cmd.input(&source.path)
            .args(["-filter_complex", &graph, "-map", "[v]"]);
        if source.has_audio {
            cmd.args(["-map", "[a]"]);
        }
        self.encode_args(&mut cmd, source.has_audio);
        cmd.args(["-r", &fps_arg(fps)]).arg(out).run()
    }

    fn seek_subclip(
        &self,
        source: &MediaInfo,
        w: TimeWindow,
        fps: f64,
        out: &Path,
    ) -> ExplicateResult<()> {
        let mut cmd = FfmpegCommand::new();
        cmd.args(["-ss", &secs_arg(w.start)])
            .input(&source.path)
            .args(["-t", &secs_arg(w.width()), "-r", &fps_arg(fps)]);
        self.encode_args(&mut cmd, source.has_audio);
        cmd.arg(out).run()
    }

    fn frame_resample(
        &self,
        source: &MediaInfo,
        w: TimeWindow,
        fps: f64,
        out: &Path,
    ) -> ExplicateResult<()> {
        let (width, height) = source.even_size().ok_or_else(|| {
            ExplicateError::media(format!(
                "'{}' has no usable frame size for resampling",
                source.path.display()
            ))
        })?;
        let frame_len = width as usize * height as usize * 4;

        let decoder = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &secs_arg(w.start)])
            .arg("-i")
            .arg(&source.path)
            .args([
                "-t",
                &secs_arg(w.width()),
                "-vf",
                &format!("fps={},scale={width}:{height}", fps_arg(fps)),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExplicateError::media(format!("failed to spawn ffmpeg decoder: {e}")))?;
        let mut decoder = ChildGuard::new(decoder, "ffmpeg decoder");

        let mut encode = Command::new("ffmpeg");
        encode
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .args(["-s", &format!("{width}x{height}"), "-r", &fps_arg(fps)])
            .args(["-i", "pipe:0"]);
        if source.has_audio {
            encode
                .args(["-ss", &secs_arg(w.start), "-t", &secs_arg(w.width())])
                .arg("-i")
                .arg(&source.path)
                .args(["-map", "0:v", "-map", "1:a?", "-c:a", &self.audio_codec]);
        } else {
            encode.arg("-an");
        }
        encode
            .args(["-c:v", &self.video_codec, "-pix_fmt", "yuv420p"])
            .args(["-threads", &self.threads.to_string(), "-shortest"])
            .arg(out)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let encoder = encode
            .spawn()
            .map_err(|e| ExplicateError::media(format!("failed to spawn ffmpeg encoder: {e}")))?;
        let mut encoder = ChildGuard::new(encoder, "ffmpeg encoder");

        let decoder_err = drain_stderr(&mut decoder);
        let encoder_err = drain_stderr(&mut encoder);

        let mut frames_in = decoder
            .take_stdout()
            .ok_or_else(|| ExplicateError::media("failed to open decoder stdout (unexpected)"))?;
        let mut frames_out = encoder
            .take_stdin()
            .ok_or_else(|| ExplicateError::media("failed to open encoder stdin (unexpected)"))?;

        let mut buf = vec![0u8; frame_len];
        let mut frames = 0u64;
        loop {
            match read_frame(&mut frames_in, &mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    return Err(ExplicateError::media(format!(
                        "failed to read decoded frame: {e}"
                    )));
                }
            }
            frames_out.write_all(&buf).map_err(|e| {
                ExplicateError::media(format!("failed to write frame to encoder: {e}"))
            })?;
            frames += 1;
        }
        drop(frames_out);
        drop(frames_in);

        let decoder_status = decoder.wait()?;
        let encoder_status = encoder.wait()?;
        let decoder_msg = join_stderr(decoder_err);
        let encoder_msg = join_stderr(encoder_err);

        if !decoder_status.success() {
            return Err(ExplicateError::media(format!(
                "ffmpeg decoder exited with status {decoder_status}: {decoder_msg}"
            )));
        }
        if !encoder_status.success() {
            return Err(ExplicateError::media(format!(
                "ffmpeg encoder exited with status {encoder_status}: {encoder_msg}"
            )));
        }
        if frames == 0 {
            return Err(ExplicateError::media(format!(
                "no frames decoded for {w} of '{}'",
                source.path.display()
            )));
        }
        debug!(frames, window = %w, "resampled segment frames");
        Ok(())
    }
}

// Fill `buf` with one whole frame. `Ok(false)` on a clean end of stream.
fn read_frame(src: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated frame",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn drain_stderr(child: &mut ChildGuard) -> Option<JoinHandle<String>> {
    let mut stderr = child.take_stderr()?;
    Some(std::thread::spawn(move || {
        let mut s = String::new();
        let _ = stderr.read_to_string(&mut s);
        s
    }))
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn check_written(out: &Path) -> ExplicateResult<()> {
    match std::fs::metadata(out) {
        Ok(m) if m.len() > 0 => Ok(()),
        _ => Err(ExplicateError::media(format!(
            "'{}' is missing or empty after extraction",
            out.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_windows_are_untouched() {
        let w = TimeWindow::new(1.0, 3.0);
        assert_eq!(clamp_window(w, 10.0), w);
    }

    #[test]
    fn windows_are_pulled_inside_the_video() {
        let c = clamp_window(TimeWindow::new(-1.0, 12.0), 10.0);
        assert_eq!(c, TimeWindow::new(0.0, 10.0));

        let c = clamp_window(TimeWindow::new(9.99, 15.0), 10.0);
        assert!((c.start - 9.9).abs() < 1e-9);
        assert!((c.end - 10.0).abs() < 1e-9);
    }

    #[test]
    fn clamped_windows_keep_minimum_width() {
        let c = clamp_window(TimeWindow::new(4.0, 4.02), 10.0);
        assert_eq!(c.start, 4.0);
        assert!((c.width() - MIN_CLAMPED_WIDTH_SECS).abs() < 1e-9);
    }

    #[test]
    fn very_short_videos_never_overrun_their_end() {
        let c = clamp_window(TimeWindow::new(0.0, 1.0), 0.05);
        assert_eq!(c, TimeWindow::new(0.0, 0.05));

        let c = clamp_window(TimeWindow::new(0.02, 0.03), 0.05);
        assert_eq!(c.start, 0.0);
        assert!(c.end <= 0.05);
    }

    #[test]
    fn preferred_backend_is_tried_first() {
        let mut seg = VideoSegmenter::new(&SyncConfig::default());
        assert_eq!(seg.attempt_order(), TrimBackend::ALL.to_vec());
        seg.preferred = Some(TrimBackend::FrameResample);
        assert_eq!(
            seg.attempt_order(),
            vec![
                TrimBackend::FrameResample,
                TrimBackend::TrimFilter,
                TrimBackend::SeekSubclip
            ]
        );
    }

    #[test]
    fn read_frame_reports_clean_and_truncated_ends() {
        let mut buf = [0u8; 4];
        let mut whole = std::io::Cursor::new(vec![1u8; 8]);
        assert!(read_frame(&mut whole, &mut buf).unwrap());
        assert!(read_frame(&mut whole, &mut buf).unwrap());
        assert!(!read_frame(&mut whole, &mut buf).unwrap());

        let mut short = std::io::Cursor::new(vec![1u8; 6]);
        assert!(read_frame(&mut short, &mut buf).unwrap());
        assert!(read_frame(&mut short, &mut buf).is_err());
    }

    #[test]
    fn missing_source_fails_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let info = MediaInfo {
            path: dir.path().join("absent.mp4"),
            duration_sec: 4.0,
            fps: None,
            width: Some(64),
            height: Some(48),
            has_video: true,
            has_audio: false,
            audio_channels: None,
            audio_sample_rate: None,
        };
        let mut seg = VideoSegmenter::new(&SyncConfig::default());
        let err = seg
            .extract(&info, TimeWindow::new(0.0, 1.0), &dir.path().join("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, ExplicateError::Alignment(_)));
        assert_eq!(seg.preferred(), None);
    }
}
