//! Collaborators that produce the script, the animation program and the narration audio.
//!
//! Model prompting is not part of this crate. The traits here are the seams a model-backed
//! implementation plugs into; the file- and command-backed implementations let the pipeline run
//! from pre-generated responses and a local text-to-speech program.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, warn};

use crate::{
    config::VoiceConfig,
    foundation::error::{ExplicateError, ExplicateResult},
    model::{NarrationSegment, Script},
};

pub trait ScriptGenerator {
    fn generate_script(&self, prompt: &str) -> ExplicateResult<Script>;
}

pub trait CodeGenerator {
    fn generate_program(&self, script: &Script) -> ExplicateResult<String>;

    /// Produce a corrected program from renderer diagnostics.
    fn repair_program(&self, program: &str, diagnostics: &str) -> ExplicateResult<String>;
}

pub trait VoiceSynthesizer {
    /// Extension of the files [`VoiceSynthesizer::synthesize`] writes.
    fn extension(&self) -> &str;

    /// Speak `text` into `out`. The spoken duration is whatever the voice produces.
    fn synthesize(&self, text: &str, out: &Path) -> ExplicateResult<()>;
}

/// Contents of the first fenced block tagged `lang`, if any.
fn fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let open = format!("```{lang}");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Contents of the first fenced block of any language, dropping its tag line.
fn any_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let end = rest.find("```")?;
    let body = &rest[..end];
    let body = match body.find('\n') {
        Some(nl) if !body[..nl].trim().contains(' ') => &body[nl + 1..],
        _ => body,
    };
    Some(body.trim())
}

/// Parse a model's script response.
///
/// JSON inside a ```` ```json ```` fence wins over the surrounding prose; without a fence the
/// whole response must be JSON. A missing or non-list `segments` field yields no segments, and
/// entries that are not objects are dropped.
pub fn parse_script_response(text: &str) -> ExplicateResult<Script> {
    let body = fenced_block(text, "json").unwrap_or_else(|| text.trim());
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ExplicateError::generation(format!("script response is not JSON: {e}")))?;
    let serde_json::Value::Object(mut root) = value else {
        return Err(ExplicateError::generation(
            "script response is not a JSON object",
        ));
    };

    let title = match root.remove("title") {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };

    let mut segments = Vec::new();
    if let Some(serde_json::Value::Array(items)) = root.remove("segments") {
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<NarrationSegment>(item) {
                Ok(seg) => segments.push(seg),
                Err(e) => warn!(index, error = %e, "dropping malformed script segment"),
            }
        }
    }

    Ok(Script { title, segments })
}

/// Extract the program from a model response and replace glyphs renderers commonly choke on.
pub fn clean_program_response(text: &str) -> String {
    let code = fenced_block(text, "python")
        .or_else(|| any_fenced_block(text))
        .unwrap_or_else(|| text.trim());
    code.replace('\u{2713}', "ok")
        .replace('\u{2192}', "->")
        .replace('\u{2190}', "<-")
        .replace('\u{2022}', "*")
}

/// Script generator that replays a saved model response.
pub struct ScriptFile {
    path: PathBuf,
}

impl ScriptFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScriptGenerator for ScriptFile {
    fn generate_script(&self, prompt: &str) -> ExplicateResult<Script> {
        debug!(prompt, path = %self.path.display(), "reading saved script response");
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            ExplicateError::generation(format!(
                "failed to read script '{}': {e}",
                self.path.display()
            ))
        })?;
        parse_script_response(&text)
    }
}

/// Code generator that replays a saved program and cannot repair it.
pub struct ProgramFile {
    path: PathBuf,
}

impl ProgramFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CodeGenerator for ProgramFile {
    fn generate_program(&self, _script: &Script) -> ExplicateResult<String> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            ExplicateError::generation(format!(
                "failed to read program '{}': {e}",
                self.path.display()
            ))
        })?;
        Ok(clean_program_response(&text))
    }

    fn repair_program(&self, _program: &str, _diagnostics: &str) -> ExplicateResult<String> {
        Err(ExplicateError::generation(
            "saved programs cannot be repaired",
        ))
    }
}

/// Voice synthesizer that runs a text-to-speech program once per segment.
pub struct CommandVoice {
    cfg: VoiceConfig,
}

impl CommandVoice {
    pub fn new(cfg: VoiceConfig) -> Self {
        Self { cfg }
    }

    fn expand_args(&self, text: &str, out: &Path) -> Vec<String> {
        let out = out.to_string_lossy();
        self.cfg
            .args
            .iter()
            .map(|a| a.replace("{out}", &out).replace("{text}", text))
            .collect()
    }
}

impl VoiceSynthesizer for CommandVoice {
    fn extension(&self) -> &str {
        &self.cfg.extension
    }

    fn synthesize(&self, text: &str, out: &Path) -> ExplicateResult<()> {
        let args = self.expand_args(text, out);
        debug!(program = %self.cfg.program, out = %out.display(), "synthesizing narration");
        let output = Command::new(&self.cfg.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                ExplicateError::audio_load(format!(
                    "failed to run voice program '{}': {e}",
                    self.cfg.program
                ))
            })?;
        if !output.status.success() {
            return Err(ExplicateError::audio_load(format!(
                "voice program exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        match std::fs::metadata(out) {
            Ok(m) if m.len() > 0 => Ok(()),
            _ => Err(ExplicateError::audio_load(format!(
                "voice program wrote nothing to '{}'",
                out.display()
            ))),
        }
    }
}
