//! Driving the external animation renderer, with repair attempts and a placeholder fallback.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    config::{PlaceholderConfig, RenderConfig},
    foundation::error::{ExplicateError, ExplicateResult},
    generate::CodeGenerator,
    outcome::{Degradation, Outcome},
    video::write_placeholder,
};

/// Diagnostics containing this point at the TeX installation, not the program.
const SYSTEM_LATEX_FAILURE: &str = "latex error converting to dvi";

pub trait Renderer {
    /// Confirm the renderer can be launched; returns its version banner.
    fn check_available(&self) -> ExplicateResult<String>;

    /// Render `program_file` with `workdir` as the working directory.
    ///
    /// A failed render returns [`ExplicateError::Render`] carrying the renderer's diagnostics.
    fn render(&self, program_file: &Path, workdir: &Path) -> ExplicateResult<()>;
}

/// Runs the renderer as a Python module, e.g. `python3 -m manim -ql`.
pub struct CommandRenderer {
    cfg: RenderConfig,
}

impl CommandRenderer {
    pub fn new(cfg: RenderConfig) -> Self {
        Self { cfg }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.cfg.python);
        cmd.args(["-m", &self.cfg.module]).stdin(Stdio::null());
        cmd
    }
}

impl Renderer for CommandRenderer {
    fn check_available(&self) -> ExplicateResult<String> {
        let out = self
            .base_command()
            .arg("--version")
            .output()
            .map_err(|e| ExplicateError::render(format!("failed to launch renderer: {e}")))?;
        if !out.status.success() {
            return Err(ExplicateError::render(format!(
                "renderer version check failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn render(&self, program_file: &Path, workdir: &Path) -> ExplicateResult<()> {
        let out = self
            .base_command()
            .arg(&self.cfg.quality_flag)
            .arg(format!("--output_file={}", self.cfg.output_name))
            .arg(program_file)
            .arg(&self.cfg.scene)
            .current_dir(workdir)
            .output()
            .map_err(|e| ExplicateError::render(format!("failed to launch renderer: {e}")))?;
        if !out.status.success() {
            return Err(ExplicateError::render(format!(
                "renderer exited with status {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Renderer output, or the placeholder that replaced it.
#[derive(Debug)]
pub struct RenderedVideo {
    pub path: PathBuf,
    /// Program text of the last attempt.
    pub program: String,
    pub attempts: u32,
    // Holds `path` alive until the caller is done with it.
    workdir: TempDir,
}

impl RenderedVideo {
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

/// First `.mp4` the renderer left under `root`.
///
/// The renderer's own layout (`media/videos/<program stem>/…`) is searched first, then the whole
/// tree. Partial-movie fragments are never returned.
pub fn find_rendered_video(root: &Path, program_stem: &str) -> Option<PathBuf> {
    let expected = root.join("media").join("videos").join(program_stem);
    first_mp4(&expected).or_else(|| first_mp4(root))
}

fn first_mp4(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "partial_movie_files")
        .filter_map(Result::ok)
        .find(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
        })
        .map(|e| e.into_path())
}

fn program_stem(attempt: u32) -> String {
    if attempt <= 1 {
        "explanation_scene".to_string()
    } else {
        format!("fixed_explanation_scene_{attempt}")
    }
}

/// Render `program`, asking `generator` for a fix after each failure.
///
/// At most `cfg.max_attempts` renders run. Repair is not attempted for system LaTeX failures or
/// once the generator gives up. Whatever video exists afterwards is used; when there is none a
/// placeholder is substituted and the outcome is degraded.
#[tracing::instrument(skip_all, fields(max_attempts = cfg.max_attempts))]
pub fn render_with_repair(
    renderer: &dyn Renderer,
    generator: &dyn CodeGenerator,
    program: String,
    cfg: &RenderConfig,
    placeholder: &PlaceholderConfig,
) -> Outcome<RenderedVideo> {
    let workdir = match tempfile::Builder::new()
        .prefix("explicate-render-")
        .tempdir()
    {
        Ok(d) => d,
        Err(e) => {
            return Outcome::Fatal(ExplicateError::fatal_io(format!(
                "failed to create render directory: {e}"
            )));
        }
    };

    let mut program = program;
    let mut attempts = 0;
    let mut last_stem = program_stem(1);
    let mut failure = None;

    match renderer.check_available() {
        Ok(version) => {
            info!(version, "renderer available");
            let max_attempts = cfg.max_attempts.max(1);
            for attempt in 1..=max_attempts {
                attempts = attempt;
                last_stem = program_stem(attempt);
                let file = workdir.path().join(format!("{last_stem}.py"));
                if let Err(e) = std::fs::write(&file, &program) {
                    failure = Some(format!("failed to write '{}': {e}", file.display()));
                    break;
                }

                let Err(e) = renderer.render(&file, workdir.path()) else {
                    info!(attempt, "render succeeded");
                    failure = None;
                    break;
                };
                let diagnostics = e.to_string();
                warn!(attempt, error = %diagnostics, "render failed");
                failure = Some(diagnostics.clone());

                if attempt == max_attempts {
                    break;
                }
                if diagnostics.to_lowercase().contains(SYSTEM_LATEX_FAILURE) {
                    warn!("LaTeX toolchain failure, not asking for a fix");
                    break;
                }
                match generator.repair_program(&program, &diagnostics) {
                    Ok(fixed) => program = fixed,
                    Err(e) => {
                        warn!(error = %e, "no fix available, keeping last result");
                        break;
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "renderer unavailable");
            failure = Some(e.to_string());
        }
    }

    if let Some(path) = find_rendered_video(workdir.path(), &last_stem) {
        info!(path = %path.display(), attempts, "found rendered video");
        return Outcome::Success(RenderedVideo {
            path,
            program,
            attempts,
            workdir,
        });
    }

    let reason = failure.unwrap_or_else(|| "renderer produced no video file".to_string());
    warn!(reason, "no rendered video, substituting placeholder");
    let path = workdir.path().join("fallback.mp4");
    if let Err(e) = write_placeholder(placeholder, &path) {
        return Outcome::Fatal(e);
    }
    Outcome::Degraded(
        RenderedVideo {
            path,
            program,
            attempts,
            workdir,
        },
        vec![Degradation::PlaceholderVideo { reason }],
    )
}
