//! Aligning narration with the rendered video.
//!
//! [`Synchronizer::synchronize`] always yields a playable file unless the rendered video itself
//! cannot be opened. Failures inside alignment degrade the result instead:
//!
//! ```text
//! aligned video with narration
//!   -> aligned video, some windows silent      (clip missing or undecodable)
//!   -> aligned video, some windows left out    (no backend could cut them)
//!   -> video without audio                     (audio composition or mux failed)
//!   -> original rendered video, copied         (anything else)
//!   -> Fatal                                   (source unreadable or copy failed)
//! ```
//!
//! Each call owns a [`ResourceRegistry`]; every intermediate file, and the narration files when
//! [`SyncConfig::consume_audio_sources`] is set, is deleted before the call returns.

pub mod compose;
pub mod timeline;

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioPcm, concat_tracks, decode_audio, fit_to_duration, trim_tail, write_f32le},
    config::{ComposeStrategy, SyncConfig},
    foundation::error::{ExplicateError, ExplicateResult},
    lifecycle::{ResourceKey, ResourceRegistry, remove_file_with_retry},
    media::{MediaInfo, probe_media},
    model::AudioSegment,
    outcome::{Degradation, Outcome},
    video::{ExtractedClip, VideoSegmenter},
};

use compose::{Encoding, RawAudio, concat_clips, mux_track};
pub use timeline::{TimelinePlan, WindowDecision, plan_windows, scale_factor};

/// Final file produced by a synchronization run.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncArtifact {
    /// Durable location outside the run's working directory.
    pub path: PathBuf,
    /// Duration of the rendered video the artifact was built from.
    pub source_duration_sec: f64,
    pub strategy: ComposeStrategy,
    /// Window layout, for per-segment runs that got as far as planning.
    pub plan: Option<TimelinePlan>,
    /// Number of sub-clips stitched into the output.
    pub clips: usize,
}

pub struct Synchronizer {
    cfg: SyncConfig,
}

// Composed file still inside the working directory, plus what went wrong on the way.
struct Composed {
    key: ResourceKey,
    path: PathBuf,
    plan: Option<TimelinePlan>,
    clips: usize,
    degradations: Vec<Degradation>,
}

enum Composition {
    Written(Composed),
    /// Nothing could be cut; the source is delivered as it is.
    Empty {
        plan: Option<TimelinePlan>,
        degradations: Vec<Degradation>,
    },
}

impl Synchronizer {
    pub fn new(cfg: SyncConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    #[tracing::instrument(skip_all, fields(video = %video.display(), segments = segments.len()))]
    pub fn synchronize(&self, video: &Path, segments: &[AudioSegment]) -> Outcome<SyncArtifact> {
        let mut registry =
            match ResourceRegistry::new(self.cfg.temp_root.as_deref(), self.cfg.retry_policy()) {
                Ok(r) => r,
                Err(e) => {
                    self.discard_sources(segments);
                    return self.deliver_original(video, None, e);
                }
            };
        if self.cfg.consume_audio_sources {
            for seg in segments {
                registry.adopt(&seg.source_path);
            }
        }

        let info = match probe_media(video) {
            Ok(info) if info.has_video => info,
            Ok(_) => {
                return Outcome::Fatal(ExplicateError::fatal_io(format!(
                    "'{}' has no video stream",
                    video.display()
                )));
            }
            Err(e) => {
                error!(error = %e, "cannot open rendered video");
                return Outcome::Fatal(ExplicateError::fatal_io(format!(
                    "cannot open rendered video '{}': {e}",
                    video.display()
                )));
            }
        };
        info!(
            duration_sec = info.duration_sec,
            fps = ?info.fps,
            strategy = ?self.cfg.strategy,
            "loaded rendered video"
        );

        let outcome = match self.align(&mut registry, &info, segments) {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(error = %e, "alignment failed, delivering the rendered video untouched");
                self.deliver_original(video, Some(info.duration_sec), e)
            }
        };
        registry.release_all();
        outcome
    }

    fn align(
        &self,
        registry: &mut ResourceRegistry,
        info: &MediaInfo,
        segments: &[AudioSegment],
    ) -> ExplicateResult<Outcome<SyncArtifact>> {
        if segments.is_empty() {
            info!("no narration segments, copying rendered video");
            return self.copy_source(info, None, Vec::new());
        }

        let composition = match self.cfg.strategy {
            ComposeStrategy::PerSegment => self.compose_per_segment(registry, info, segments)?,
            ComposeStrategy::WholeTrack => {
                Composition::Written(self.compose_whole_track(registry, info, segments)?)
            }
        };
        let composed = match composition {
            Composition::Written(c) => c,
            Composition::Empty { plan, degradations } => {
                warn!("no segment produced a clip, copying rendered video");
                return self.copy_source(info, plan, degradations);
            }
        };

        let path = self.finalize(registry, composed.key, &composed.path)?;
        info!(path = %path.display(), clips = composed.clips, "synchronized video written");
        Ok(Outcome::degraded(
            SyncArtifact {
                path,
                source_duration_sec: info.duration_sec,
                strategy: self.cfg.strategy,
                plan: composed.plan,
                clips: composed.clips,
            },
            composed.degradations,
        ))
    }

    fn compose_per_segment(
        &self,
        registry: &mut ResourceRegistry,
        info: &MediaInfo,
        segments: &[AudioSegment],
    ) -> ExplicateResult<Composition> {
        let durations: Vec<f64> = segments.iter().map(|s| s.target_duration_seconds).collect();
        let plan = plan_windows(info.duration_sec, &durations);
        info!(
            scale_factor = plan.scale_factor,
            script_secs = durations.iter().sum::<f64>(),
            video_secs = info.duration_sec,
            "computed timeline scale"
        );

        let fps = info.fps_or(self.cfg.default_fps);
        let mut segmenter = VideoSegmenter::new(&self.cfg);
        let mut clips: Vec<ExtractedClip> = Vec::new();
        let mut narration: Vec<AudioPcm> = Vec::new();
        let mut silent = Vec::new();
        let mut dropped = Vec::new();

        for planned in &plan.segments {
            let index = planned.index;
            let window = match planned.decision {
                WindowDecision::Assigned(w) => w,
                WindowDecision::SkippedPastEnd { start } => {
                    warn!(index, start, "segment starts at or past the video end, skipping");
                    continue;
                }
                WindowDecision::SkippedDegenerate { start, end } => {
                    warn!(index, start, end, "segment window too narrow, skipping");
                    continue;
                }
            };

            let (_, clip_path) = registry.scratch_path("clip", &self.cfg.container);
            let clip = match segmenter.extract(info, window, &clip_path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(index, window = %window, error = %e, "segment extraction failed, skipping");
                    dropped.push(index);
                    continue;
                }
            };

            let target = clip.window.width();
            let source = &segments[index].source_path;
            let pcm = match decode_audio(source, self.cfg.sample_rate)
                .and_then(|src| fit_to_duration(&src, target))
            {
                Ok(fitted) => {
                    debug!(index, action = ?fitted.action, target, "fitted narration to window");
                    fitted.pcm
                }
                Err(e) => {
                    warn!(
                        index,
                        path = %source.display(),
                        window = %clip.window,
                        error = %e,
                        "narration unavailable, window plays silent"
                    );
                    silent.push(index);
                    AudioPcm::silence(self.cfg.sample_rate, 1, target)
                }
            };
            narration.push(pcm);
            clips.push(clip);
        }

        let mut degradations = Vec::new();
        if !dropped.is_empty() {
            degradations.push(Degradation::SkippedWindows { indices: dropped });
        }
        if clips.is_empty() {
            return Ok(Composition::Empty {
                plan: Some(plan),
                degradations,
            });
        }
        if !silent.is_empty() {
            degradations.push(Degradation::SilentSegments { indices: silent });
        }

        let enc = Encoding::from_config(&self.cfg, fps);
        let frame = info.even_size();
        let (out_key, out_path) = registry.scratch_path("aligned", &self.cfg.container);
        let (audio_key, audio_path) = registry.scratch_path("narration", "f32le");

        let with_audio = concat_tracks(narration).and_then(|track| {
            write_f32le(&track, &audio_path)?;
            let raw = RawAudio::describe(&audio_path, &track);
            concat_clips(&clips, frame, Some(&raw), &enc, &out_path)
        });
        registry.release(audio_key);

        if let Err(e) = with_audio {
            warn!(error = %e, "narration mux failed, writing video without audio");
            concat_clips(&clips, frame, None, &enc, &out_path)?;
            degradations.push(Degradation::AudioDropped {
                reason: e.to_string(),
            });
        }

        Ok(Composition::Written(Composed {
            key: out_key,
            path: out_path,
            clips: clips.len(),
            plan: Some(plan),
            degradations,
        }))
    }

    fn compose_whole_track(
        &self,
        registry: &mut ResourceRegistry,
        info: &MediaInfo,
        segments: &[AudioSegment],
    ) -> ExplicateResult<Composed> {
        let mut parts = Vec::with_capacity(segments.len());
        let mut silent = Vec::new();
        for (index, seg) in segments.iter().enumerate() {
            match decode_audio(&seg.source_path, self.cfg.sample_rate) {
                Ok(pcm) => parts.push(pcm),
                Err(e) => {
                    warn!(index, path = %seg.source_path.display(), error = %e, "narration unavailable, leaving it out");
                    silent.push(index);
                }
            }
        }

        let mut degradations = Vec::new();
        if !silent.is_empty() {
            degradations.push(Degradation::SilentSegments { indices: silent });
        }

        let enc = Encoding::from_config(&self.cfg, info.fps_or(self.cfg.default_fps));
        let (out_key, out_path) = registry.scratch_path("aligned", &self.cfg.container);
        let (audio_key, audio_path) = registry.scratch_path("narration", "f32le");

        let with_audio = concat_tracks(parts).and_then(|track| {
            let track_secs = track.duration_sec();
            let track = trim_tail(track, info.duration_sec);
            info!(
                track_secs,
                video_secs = info.duration_sec,
                "attaching narration as one track"
            );
            write_f32le(&track, &audio_path)?;
            let raw = RawAudio::describe(&audio_path, &track);
            mux_track(&info.path, Some(&raw), &enc, &out_path)
        });
        registry.release(audio_key);

        if let Err(e) = with_audio {
            warn!(error = %e, "narration mux failed, writing video without audio");
            mux_track(&info.path, None, &enc, &out_path)?;
            degradations.push(Degradation::AudioDropped {
                reason: e.to_string(),
            });
        }

        Ok(Composed {
            key: out_key,
            path: out_path,
            plan: None,
            clips: 1,
            degradations,
        })
    }

    fn copy_source(
        &self,
        info: &MediaInfo,
        plan: Option<TimelinePlan>,
        degradations: Vec<Degradation>,
    ) -> ExplicateResult<Outcome<SyncArtifact>> {
        let dest = self.durable_path()?;
        std::fs::copy(&info.path, &dest).map_err(|e| {
            remove_file_with_retry(&dest, self.cfg.retry_policy());
            ExplicateError::alignment(format!(
                "failed to copy '{}' to '{}': {e}",
                info.path.display(),
                dest.display()
            ))
        })?;
        Ok(Outcome::degraded(
            SyncArtifact {
                path: dest,
                source_duration_sec: info.duration_sec,
                strategy: self.cfg.strategy,
                plan,
                clips: 0,
            },
            degradations,
        ))
    }

    /// Move a composed file out of the working directory.
    fn finalize(
        &self,
        registry: &mut ResourceRegistry,
        key: ResourceKey,
        composed: &Path,
    ) -> ExplicateResult<PathBuf> {
        let dest = self.durable_path()?;
        if let Err(rename_err) = std::fs::rename(composed, &dest) {
            debug!(error = %rename_err, "rename across directories failed, copying instead");
            std::fs::copy(composed, &dest).map_err(|e| {
                remove_file_with_retry(&dest, self.cfg.retry_policy());
                ExplicateError::alignment(format!(
                    "failed to move '{}' to '{}': {e}",
                    composed.display(),
                    dest.display()
                ))
            })?;
        }
        registry.release(key);
        Ok(dest)
    }

    /// Allocate a fresh file that outlives the run's working directory.
    fn durable_path(&self) -> ExplicateResult<PathBuf> {
        let dir = self
            .cfg
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir).map_err(|e| {
            ExplicateError::fatal_io(format!(
                "failed to create output directory '{}': {e}",
                dir.display()
            ))
        })?;
        tempfile::Builder::new()
            .prefix("explicate-")
            .suffix(&format!(".{}", self.cfg.container))
            .tempfile_in(&dir)
            .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| {
                ExplicateError::fatal_io(format!(
                    "failed to allocate output file in '{}': {e}",
                    dir.display()
                ))
            })
    }

    /// Last resort: hand back the rendered video as it is.
    fn deliver_original(
        &self,
        video: &Path,
        duration_sec: Option<f64>,
        reason: ExplicateError,
    ) -> Outcome<SyncArtifact> {
        let copied = self.durable_path().and_then(|dest| {
            std::fs::copy(video, &dest).map_err(|e| {
                let _ = std::fs::remove_file(&dest);
                ExplicateError::fatal_io(format!(
                    "failed to copy rendered video '{}': {e}",
                    video.display()
                ))
            })?;
            Ok(dest)
        });
        match copied {
            Ok(path) => Outcome::Degraded(
                SyncArtifact {
                    path,
                    source_duration_sec: duration_sec.unwrap_or(0.0),
                    strategy: self.cfg.strategy,
                    plan: None,
                    clips: 0,
                },
                vec![Degradation::OriginalVideo {
                    reason: reason.to_string(),
                }],
            ),
            Err(e) => {
                error!(error = %e, original_error = %reason, "could not deliver rendered video");
                Outcome::Fatal(e)
            }
        }
    }

    fn discard_sources(&self, segments: &[AudioSegment]) {
        if !self.cfg.consume_audio_sources {
            return;
        }
        let policy = self.cfg.retry_policy();
        for seg in segments {
            remove_file_with_retry(&seg.source_path, policy);
        }
    }
}
