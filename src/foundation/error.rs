pub type ExplicateResult<T> = Result<T, ExplicateError>;

/// Failure classes of a pipeline run.
///
/// Only [`ExplicateError::Generation`] and [`ExplicateError::FatalIo`] are expected to reach the
/// caller of a full run; the other classes are recovered inside the pipeline by degrading the
/// output (placeholder video, silent windows, untouched source video).
#[derive(thiserror::Error, Debug)]
pub enum ExplicateError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("audio load error: {0}")]
    AudioLoad(String),

    #[error("alignment error: {0}")]
    Alignment(String),

    #[error("fatal io error: {0}")]
    FatalIo(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("media tool error: {0}")]
    Media(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExplicateError {
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn audio_load(msg: impl Into<String>) -> Self {
        Self::AudioLoad(msg.into())
    }

    pub fn alignment(msg: impl Into<String>) -> Self {
        Self::Alignment(msg.into())
    }

    pub fn fatal_io(msg: impl Into<String>) -> Self {
        Self::FatalIo(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// `true` for the classes a run cannot recover from locally.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Generation(_) | Self::FatalIo(_))
    }
}
