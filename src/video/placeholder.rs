use std::path::Path;

use tracing::info;

use crate::{
    config::PlaceholderConfig,
    foundation::error::{ExplicateError, ExplicateResult},
    media::{FfmpegCommand, ensure_parent_dir, ffmpeg::secs_arg},
};

/// Write a solid-colour, silent clip used when no rendered video exists.
pub fn write_placeholder(cfg: &PlaceholderConfig, out: &Path) -> ExplicateResult<()> {
    cfg.validate()?;
    ensure_parent_dir(out)?;

    let source = format!(
        "color=c={}:s={}x{}:r={}:d={}",
        cfg.color,
        cfg.width,
        cfg.height,
        cfg.fps,
        secs_arg(cfg.duration_sec)
    );
    FfmpegCommand::new()
        .args(["-f", "lavfi", "-i", &source])
        .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-an"])
        .args(["-r", &cfg.fps.to_string()])
        .arg(out)
        .run()
        .map_err(|e| ExplicateError::render(format!("placeholder video failed: {e}")))?;

    info!(path = %out.display(), duration_sec = cfg.duration_sec, "wrote placeholder video");
    Ok(())
}
