//! ffmpeg invocations that stitch sub-clips and attach narration.

use std::path::{Path, PathBuf};

use crate::{
    audio::AudioPcm,
    config::SyncConfig,
    foundation::error::ExplicateResult,
    media::{
        FfmpegCommand,
        ffmpeg::fps_arg,
    },
    video::ExtractedClip,
};

/// Encoder settings shared by every write of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoding {
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub threads: u32,
    pub container: String,
}

impl Encoding {
    pub fn from_config(cfg: &SyncConfig, fps: f64) -> Self {
        Self {
            fps,
            video_codec: cfg.video_codec.clone(),
            audio_codec: cfg.audio_codec.clone(),
            threads: cfg.encoder_threads,
            container: cfg.container.clone(),
        }
    }

    fn apply(&self, cmd: &mut FfmpegCommand, with_audio: bool) {
        cmd.args(["-c:v", &self.video_codec, "-pix_fmt", "yuv420p"]);
        if with_audio {
            cmd.args(["-c:a", &self.audio_codec]);
        } else {
            cmd.arg("-an");
        }
        cmd.args(["-r", &fps_arg(self.fps)])
            .args(["-threads", &self.threads.to_string()]);
        if matches!(self.container.as_str(), "mp4" | "mov" | "m4v") {
            cmd.args(["-movflags", "+faststart"]);
        }
    }
}

/// Raw `f32le` narration written to the run's working directory.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAudio {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RawAudio {
    pub fn describe(path: impl Into<PathBuf>, pcm: &AudioPcm) -> Self {
        Self {
            path: path.into(),
            sample_rate: pcm.sample_rate,
            channels: pcm.channels.max(1),
        }
    }

    fn add_input(&self, cmd: &mut FfmpegCommand) {
        cmd.args([
            "-f",
            "f32le",
            "-ar",
            &self.sample_rate.to_string(),
            "-ac",
            &self.channels.to_string(),
        ])
        .input(&self.path);
    }
}

/// Filter graph joining `count` video inputs, normalising each so the concat filter accepts
/// clips whose encodings differ.
pub fn concat_filter(count: usize, fps: f64, frame: Option<(u32, u32)>) -> String {
    let mut graph = String::new();
    for i in 0..count {
        graph.push_str(&format!("[{i}:v]fps={}", fps_arg(fps)));
        if let Some((w, h)) = frame {
            graph.push_str(&format!(
                ",scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
            ));
        }
        graph.push_str(&format!(",setsar=1,format=yuv420p[v{i}];"));
    }
    for i in 0..count {
        graph.push_str(&format!("[v{i}]"));
    }
    graph.push_str(&format!("concat=n={count}:v=1:a=0[vout]"));
    graph
}

/// Join `clips` in order and, when given, lay `audio` under the result.
pub fn concat_clips(
    clips: &[ExtractedClip],
    frame: Option<(u32, u32)>,
    audio: Option<&RawAudio>,
    enc: &Encoding,
    out: &Path,
) -> ExplicateResult<()> {
    let mut cmd = FfmpegCommand::new();
    for clip in clips {
        cmd.input(&clip.path);
    }
    if let Some(a) = audio {
        a.add_input(&mut cmd);
    }
    cmd.args([
        "-filter_complex",
        &concat_filter(clips.len(), enc.fps, frame),
        "-map",
        "[vout]",
    ]);
    if audio.is_some() {
        cmd.args(["-map", &format!("{}:a", clips.len())]);
    }
    enc.apply(&mut cmd, audio.is_some());
    cmd.arg(out).run()
}

/// Re-encode `video` with `audio` as its only sound track (or none).
pub fn mux_track(
    video: &Path,
    audio: Option<&RawAudio>,
    enc: &Encoding,
    out: &Path,
) -> ExplicateResult<()> {
    let mut cmd = FfmpegCommand::new();
    cmd.input(video);
    if let Some(a) = audio {
        a.add_input(&mut cmd);
        cmd.args(["-map", "0:v:0", "-map", "1:a:0"]);
    } else {
        cmd.args(["-map", "0:v:0"]);
    }
    enc.apply(&mut cmd, audio.is_some());
    cmd.arg(out).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &FfmpegCommand) -> Vec<String> {
        cmd.as_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn concat_filter_normalises_each_input() {
        let graph = concat_filter(2, 24.0, Some((640, 480)));
        assert!(graph.starts_with("[0:v]fps=24,scale=640:480"));
        assert!(graph.contains("[1:v]fps=24"));
        assert!(graph.ends_with("[v0][v1]concat=n=2:v=1:a=0[vout]"));
    }

    #[test]
    fn concat_filter_without_frame_size_skips_scaling() {
        let graph = concat_filter(1, 30.0, None);
        assert_eq!(graph, "[0:v]fps=30,setsar=1,format=yuv420p[v0];[v0]concat=n=1:v=1:a=0[vout]");
    }

    #[test]
    fn encoding_always_sets_frame_rate() {
        let enc = Encoding::from_config(&SyncConfig::default(), 23.976);
        let mut cmd = FfmpegCommand::new();
        enc.apply(&mut cmd, true);
        let args = args_of(&cmd);
        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "23.976000");
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn silent_encoding_drops_audio() {
        let enc = Encoding::from_config(&SyncConfig::default(), 24.0);
        let mut cmd = FfmpegCommand::new();
        enc.apply(&mut cmd, false);
        let args = args_of(&cmd);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }
}
