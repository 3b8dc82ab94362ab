//! Prompt-to-video orchestration.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    config::PipelineConfig,
    foundation::error::{ExplicateError, ExplicateResult},
    generate::{CodeGenerator, ScriptGenerator, VoiceSynthesizer},
    lifecycle::cleanup_paths,
    model::{AudioSegment, Script},
    outcome::Degradation,
    render::{Renderer, render_with_repair},
    sync::Synchronizer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Script,
    Program,
    Audio,
    Render,
    Synchronize,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Script,
        Stage::Program,
        Stage::Audio,
        Stage::Render,
        Stage::Synchronize,
    ];

    /// Overall progress once this stage has finished.
    pub fn percent(self) -> u8 {
        match self {
            Self::Script => 20,
            Self::Program => 40,
            Self::Audio => 60,
            Self::Render => 80,
            Self::Synchronize => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Script => "generating script",
            Self::Program => "generating animation program",
            Self::Audio => "synthesizing narration",
            Self::Render => "rendering animation",
            Self::Synchronize => "synchronizing audio and video",
        }
    }
}

/// Receives stage transitions of a [`Pipeline::run`].
pub trait ProgressSink {
    fn stage_started(&mut self, stage: Stage);
    fn stage_finished(&mut self, stage: Stage);
}

/// Reports progress through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn stage_started(&mut self, stage: Stage) {
        info!(stage = stage.label(), "stage started");
    }

    fn stage_finished(&mut self, stage: Stage) {
        info!(stage = stage.label(), percent = stage.percent(), "stage finished");
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// Final video, outside every temporary directory; the caller owns it.
    pub video: PathBuf,
    pub script: Script,
    /// Program text of the last render attempt.
    pub program: String,
    /// Every fallback taken along the way, in stage order.
    pub degradations: Vec<Degradation>,
}

impl PipelineOutput {
    /// File name to offer when handing the video to a user.
    pub fn download_name(&self) -> String {
        let ext = self
            .video
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        self.script.download_name(ext)
    }
}

pub struct Pipeline {
    cfg: PipelineConfig,
    scripts: Box<dyn ScriptGenerator>,
    programs: Box<dyn CodeGenerator>,
    voice: Box<dyn VoiceSynthesizer>,
    renderer: Box<dyn Renderer>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        scripts: Box<dyn ScriptGenerator>,
        programs: Box<dyn CodeGenerator>,
        voice: Box<dyn VoiceSynthesizer>,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        Self {
            cfg,
            scripts,
            programs,
            voice,
            renderer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Turn `prompt` into a narrated video.
    ///
    /// Only generation failures and an unreadable rendered video end the run with an error;
    /// every other failure is absorbed and listed in [`PipelineOutput::degradations`].
    #[tracing::instrument(skip(self, progress))]
    pub fn run(
        &self,
        prompt: &str,
        progress: &mut dyn ProgressSink,
    ) -> ExplicateResult<PipelineOutput> {
        self.cfg.validate()?;
        let mut degradations = Vec::new();

        progress.stage_started(Stage::Script);
        let script = self.scripts.generate_script(prompt)?;
        info!(
            title = %script.title,
            segments = script.segments.len(),
            script_secs = script.total_duration_seconds(),
            "script ready"
        );
        progress.stage_finished(Stage::Script);

        progress.stage_started(Stage::Program);
        let program = self.programs.generate_program(&script)?;
        progress.stage_finished(Stage::Program);

        progress.stage_started(Stage::Audio);
        let audio = self.synthesize_all(&script, &mut degradations)?;
        progress.stage_finished(Stage::Audio);

        progress.stage_started(Stage::Render);
        let rendered = match render_with_repair(
            self.renderer.as_ref(),
            self.programs.as_ref(),
            program,
            &self.cfg.render,
            &self.cfg.placeholder,
        )
        .into_result()
        {
            Ok((rendered, d)) => {
                degradations.extend(d);
                rendered
            }
            Err(e) => {
                self.discard_audio(&audio);
                return Err(e);
            }
        };
        progress.stage_finished(Stage::Render);

        progress.stage_started(Stage::Synchronize);
        let synchronizer = Synchronizer::new(self.cfg.sync.clone());
        let synced = synchronizer.synchronize(&rendered.path, &audio);
        if !self.cfg.sync.consume_audio_sources {
            // Narration files are ours even when the synchronizer leaves them alone.
            self.discard_audio(&audio);
        }
        let (artifact, d) = synced.into_result()?;
        degradations.extend(d);
        progress.stage_finished(Stage::Synchronize);

        for d in &degradations {
            warn!(degradation = %d, "run degraded");
        }

        Ok(PipelineOutput {
            video: artifact.path,
            script,
            program: rendered.program,
            degradations,
        })
    }

    // One audio segment per narration segment, in order, even when synthesis fails: a missing
    // file makes that window silent downstream.
    fn synthesize_all(
        &self,
        script: &Script,
        degradations: &mut Vec<Degradation>,
    ) -> ExplicateResult<Vec<AudioSegment>> {
        let mut audio = Vec::with_capacity(script.segments.len());
        for (index, segment) in script.segments.iter().enumerate() {
            let path = match self.allocate_voice_file() {
                Ok(p) => p,
                Err(e) => {
                    self.discard_audio(&audio);
                    return Err(e);
                }
            };
            if let Err(e) = self.voice.synthesize(&segment.narration_text, &path) {
                warn!(index, error = %e, "narration synthesis failed");
                cleanup_paths([path.as_path()]);
                degradations.push(Degradation::VoiceFailed {
                    index,
                    reason: e.to_string(),
                });
            }
            audio.push(AudioSegment::new(path, segment.target_duration_seconds));
        }
        Ok(audio)
    }

    fn allocate_voice_file(&self) -> ExplicateResult<PathBuf> {
        let dir = self
            .cfg
            .sync
            .temp_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix("explicate-voice-")
                    .suffix(&format!(".{}", self.voice.extension()))
                    .tempfile_in(&dir)
            })
            .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| {
                ExplicateError::fatal_io(format!(
                    "failed to allocate narration file in '{}': {e}",
                    dir.display()
                ))
            })
    }

    fn discard_audio(&self, audio: &[AudioSegment]) {
        cleanup_paths(audio.iter().map(|a| a.source_path.as_path()));
    }
}

/// Delete the delivered video and anything else the caller kept, once it has been consumed.
pub fn cleanup_outputs(output: &PipelineOutput, extra: &[&Path]) {
    cleanup_paths(std::iter::once(output.video.as_path()).chain(extra.iter().copied()));
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<(Stage, bool)>);

    impl ProgressSink for Recorder {
        fn stage_started(&mut self, stage: Stage) {
            self.0.push((stage, false));
        }

        fn stage_finished(&mut self, stage: Stage) {
            self.0.push((stage, true));
        }
    }

    struct FailingScripts;

    impl ScriptGenerator for FailingScripts {
        fn generate_script(&self, _prompt: &str) -> ExplicateResult<Script> {
            Err(ExplicateError::generation("model refused"))
        }
    }

    struct FixedScript(Script);

    impl ScriptGenerator for FixedScript {
        fn generate_script(&self, _prompt: &str) -> ExplicateResult<Script> {
            Ok(self.0.clone())
        }
    }

    struct NoPrograms;

    impl CodeGenerator for NoPrograms {
        fn generate_program(&self, _script: &Script) -> ExplicateResult<String> {
            Err(ExplicateError::generation("no program"))
        }

        fn repair_program(&self, _program: &str, _diagnostics: &str) -> ExplicateResult<String> {
            Err(ExplicateError::generation("no program"))
        }
    }

    struct SilentVoice {
        spoken: Rc<RefCell<Vec<String>>>,
    }

    impl VoiceSynthesizer for SilentVoice {
        fn extension(&self) -> &str {
            "wav"
        }

        fn synthesize(&self, text: &str, _out: &Path) -> ExplicateResult<()> {
            self.spoken.borrow_mut().push(text.to_string());
            Err(ExplicateError::audio_load("voice offline"))
        }
    }

    struct UnusedRenderer;

    impl Renderer for UnusedRenderer {
        fn check_available(&self) -> ExplicateResult<String> {
            Err(ExplicateError::render("not installed"))
        }

        fn render(&self, _program_file: &Path, _workdir: &Path) -> ExplicateResult<()> {
            Err(ExplicateError::render("not installed"))
        }
    }

    fn script() -> Script {
        serde_json::from_str(
            r#"{"title":"Two Beats","segments":[{"narration":"one"},{"narration":"two","duration_seconds":3}]}"#,
        )
        .unwrap()
    }

    fn pipeline(scripts: Box<dyn ScriptGenerator>, spoken: Rc<RefCell<Vec<String>>>) -> Pipeline {
        Pipeline::new(
            PipelineConfig::default(),
            scripts,
            Box::new(NoPrograms),
            Box::new(SilentVoice { spoken }),
            Box::new(UnusedRenderer),
        )
    }

    #[test]
    fn stage_percentages_climb_to_completion() {
        let percents: Vec<u8> = Stage::ALL.iter().map(|s| s.percent()).collect();
        assert_eq!(percents, vec![20, 40, 60, 80, 100]);
    }

    #[test]
    fn generation_failure_aborts_before_audio() {
        let spoken = Rc::new(RefCell::new(Vec::new()));
        let p = pipeline(Box::new(FailingScripts), spoken.clone());
        let mut progress = Recorder::default();
        let err = p.run("explain tides", &mut progress).unwrap_err();
        assert!(err.is_terminal());
        assert!(matches!(err, ExplicateError::Generation(_)));
        assert_eq!(progress.0, vec![(Stage::Script, false)]);
        assert!(spoken.borrow().is_empty());
    }

    #[test]
    fn program_failure_is_surfaced() {
        let spoken = Rc::new(RefCell::new(Vec::new()));
        let p = pipeline(Box::new(FixedScript(script())), spoken.clone());
        let err = p.run("explain tides", &mut LogProgress).unwrap_err();
        assert!(matches!(err, ExplicateError::Generation(_)));
        assert!(spoken.borrow().is_empty());
    }

    #[test]
    fn failed_voices_keep_count_and_order() {
        let spoken = Rc::new(RefCell::new(Vec::new()));
        let p = pipeline(Box::new(FixedScript(script())), spoken.clone());
        let mut degradations = Vec::new();
        let audio = p.synthesize_all(&script(), &mut degradations).unwrap();
        assert_eq!(audio.len(), 2);
        assert_eq!(audio[0].target_duration_seconds, 5.0);
        assert_eq!(audio[1].target_duration_seconds, 3.0);
        assert!(audio.iter().all(|a| !a.source_path.exists()));
        assert_eq!(*spoken.borrow(), vec!["one", "two"]);
        assert!(matches!(
            degradations[1],
            Degradation::VoiceFailed { index: 1, .. }
        ));
    }

    struct StubProgram;

    impl CodeGenerator for StubProgram {
        fn generate_program(&self, _script: &Script) -> ExplicateResult<String> {
            Ok("class ExplanationScene: pass\n".to_string())
        }

        fn repair_program(&self, program: &str, _diagnostics: &str) -> ExplicateResult<String> {
            Ok(program.to_string())
        }
    }

    struct ToneVoice;

    impl VoiceSynthesizer for ToneVoice {
        fn extension(&self) -> &str {
            "wav"
        }

        fn synthesize(&self, _text: &str, out: &Path) -> ExplicateResult<()> {
            crate::media::FfmpegCommand::new()
                .args(["-f", "lavfi", "-i", "sine=frequency=440:sample_rate=22050"])
                .args(["-t", "1", "-c:a", "pcm_s16le"])
                .arg(out)
                .run()
        }
    }

    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn check_available(&self) -> ExplicateResult<String> {
            Ok("fake 1.0".to_string())
        }

        fn render(&self, _program_file: &Path, _workdir: &Path) -> ExplicateResult<()> {
            Err(ExplicateError::render("scene crashed"))
        }
    }

    #[test]
    fn failed_render_delivers_narrated_placeholder() {
        if !(crate::media::is_ffmpeg_on_path() && crate::media::is_ffprobe_on_path()) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.sync.output_dir = Some(dir.path().join("out"));
        cfg.sync.temp_root = Some(dir.path().join("tmp"));
        cfg.sync.delete_backoff_ms = 1;
        cfg.render.max_attempts = 2;

        let script: Script = serde_json::from_str(
            r#"{"title":"Blank","segments":[{"narration":"a","duration_seconds":1},{"narration":"b","duration_seconds":1}]}"#,
        )
        .unwrap();
        let p = Pipeline::new(
            cfg.clone(),
            Box::new(FixedScript(script)),
            Box::new(StubProgram),
            Box::new(ToneVoice),
            Box::new(BrokenRenderer),
        );

        let output = p.run("explain nothing", &mut LogProgress).unwrap();
        assert!(
            output
                .degradations
                .iter()
                .any(|d| matches!(d, Degradation::PlaceholderVideo { .. }))
        );

        let info = crate::media::probe_media(&output.video).unwrap();
        assert!(info.has_video);
        assert_eq!((info.width, info.height), (Some(640), Some(480)));
        assert!(
            (info.duration_sec - cfg.placeholder.duration_sec).abs() <= 0.3,
            "duration {}",
            info.duration_sec
        );

        cleanup_outputs(&output, &[]);
        assert!(!output.video.exists());
    }

    #[test]
    fn download_name_follows_video_extension() {
        let out = PipelineOutput {
            video: PathBuf::from("/tmp/explicate-abc.mp4"),
            script: script(),
            program: String::new(),
            degradations: Vec::new(),
        };
        assert_eq!(out.download_name(), "Two_Beats.mp4");
    }
}
