use std::fmt;

use crate::foundation::error::ExplicateError;

/// Why a stage produced something other than its full-quality artifact.
#[derive(Clone, Debug, PartialEq)]
pub enum Degradation {
    /// The renderer never produced a video; a blank placeholder stands in.
    PlaceholderVideo { reason: String },
    /// These segments (script order) play without narration.
    SilentSegments { indices: Vec<usize> },
    /// No clip could be cut for these segments' windows; their span is missing from the output.
    SkippedWindows { indices: Vec<usize> },
    /// Audio composition failed; the video was written without sound.
    AudioDropped { reason: String },
    /// Alignment failed; the rendered video is delivered untouched.
    OriginalVideo { reason: String },
    /// Speech synthesis failed for this segment.
    VoiceFailed { index: usize, reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaceholderVideo { reason } => write!(f, "placeholder video used: {reason}"),
            Self::SilentSegments { indices } => write!(f, "silent segments {indices:?}"),
            Self::SkippedWindows { indices } => write!(f, "windows dropped for segments {indices:?}"),
            Self::AudioDropped { reason } => write!(f, "audio dropped: {reason}"),
            Self::OriginalVideo { reason } => write!(f, "original video returned: {reason}"),
            Self::VoiceFailed { index, reason } => {
                write!(f, "voice synthesis failed for segment {index}: {reason}")
            }
        }
    }
}

/// Result of a stage that can fall back instead of failing.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Degraded(T, Vec<Degradation>),
    Fatal(ExplicateError),
}

impl<T> Outcome<T> {
    /// `Success` when `degradations` is empty, `Degraded` otherwise.
    pub fn degraded(artifact: T, degradations: Vec<Degradation>) -> Self {
        if degradations.is_empty() {
            Self::Success(artifact)
        } else {
            Self::Degraded(artifact, degradations)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn artifact(&self) -> Option<&T> {
        match self {
            Self::Success(a) | Self::Degraded(a, _) => Some(a),
            Self::Fatal(_) => None,
        }
    }

    pub fn degradations(&self) -> &[Degradation] {
        match self {
            Self::Degraded(_, d) => d,
            _ => &[],
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(a) => Outcome::Success(f(a)),
            Self::Degraded(a, d) => Outcome::Degraded(f(a), d),
            Self::Fatal(e) => Outcome::Fatal(e),
        }
    }

    /// Append degradations recorded by an earlier stage.
    pub fn with_degradations(self, mut earlier: Vec<Degradation>) -> Self {
        match self {
            Self::Success(a) => Self::degraded(a, earlier),
            Self::Degraded(a, d) => {
                earlier.extend(d);
                Self::Degraded(a, earlier)
            }
            Self::Fatal(e) => Self::Fatal(e),
        }
    }

    /// Split into the artifact plus its degradations, or the fatal error.
    pub fn into_result(self) -> Result<(T, Vec<Degradation>), ExplicateError> {
        match self {
            Self::Success(a) => Ok((a, Vec::new())),
            Self::Degraded(a, d) => Ok((a, d)),
            Self::Fatal(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_degradations_collapse_to_success() {
        assert!(Outcome::degraded(1, Vec::new()).is_success());
        let d = Outcome::degraded(
            1,
            vec![Degradation::SilentSegments { indices: vec![0] }],
        );
        assert!(!d.is_success());
        assert_eq!(d.degradations().len(), 1);
    }

    #[test]
    fn earlier_degradations_come_first() {
        let out = Outcome::Degraded(
            "v",
            vec![Degradation::AudioDropped {
                reason: "mux".into(),
            }],
        )
        .with_degradations(vec![Degradation::PlaceholderVideo {
            reason: "no render".into(),
        }]);
        let (artifact, degradations) = out.into_result().unwrap();
        assert_eq!(artifact, "v");
        assert!(matches!(
            degradations[0],
            Degradation::PlaceholderVideo { .. }
        ));
        assert!(matches!(degradations[1], Degradation::AudioDropped { .. }));
    }

    #[test]
    fn fatal_has_no_artifact() {
        let out: Outcome<u8> = Outcome::Fatal(ExplicateError::fatal_io("gone"));
        assert!(out.is_fatal());
        assert!(out.artifact().is_none());
        assert!(out.map(|v| v + 1).into_result().is_err());
    }
}
