use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::{Command, Output, Stdio},
};

use tracing::debug;

use crate::foundation::error::{ExplicateError, ExplicateResult};

/// Argument builder for one invocation of the system `ffmpeg` binary.
///
/// The system binary is used instead of FFmpeg bindings so the crate has no native build
/// requirements. Every invocation runs with `-y -v error` so stderr carries only diagnostics.
#[derive(Clone, Debug)]
pub struct FfmpegCommand {
    args: Vec<OsString>,
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self {
            args: vec!["-y".into(), "-v".into(), "error".into()],
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for a in args {
            self.arg(a);
        }
        self
    }

    /// Append `-i <path>`.
    pub fn input(&mut self, path: &Path) -> &mut Self {
        self.arg("-i").arg(path)
    }

    pub fn as_args(&self) -> &[OsString] {
        &self.args
    }

    /// Run to completion, discarding stdout.
    pub fn run(&self) -> ExplicateResult<()> {
        self.output(Stdio::null()).map(|_| ())
    }

    /// Run to completion and return captured stdout.
    pub fn run_capture(&self) -> ExplicateResult<Vec<u8>> {
        self.output(Stdio::piped()).map(|out| out.stdout)
    }

    fn output(&self, stdout: Stdio) -> ExplicateResult<Output> {
        debug!(args = ?self.args, "running ffmpeg");
        let out = Command::new("ffmpeg")
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                ExplicateError::media(format!(
                    "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
                ))
            })?;
        if !out.status.success() {
            return Err(ExplicateError::media(format!(
                "ffmpeg exited with status {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out)
    }
}

/// Format seconds for ffmpeg time options.
pub fn secs_arg(secs: f64) -> String {
    format!("{:.6}", secs.max(0.0))
}

/// Format a frame rate for `-r`.
pub fn fps_arg(fps: f64) -> String {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        format!("{}", rounded as u64)
    } else {
        format!("{fps:.6}")
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> ExplicateResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    tool_responds("ffmpeg")
}

/// Return `true` when `ffprobe` can be invoked from `PATH`.
pub fn is_ffprobe_on_path() -> bool {
    tool_responds("ffprobe")
}

fn tool_responds(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
