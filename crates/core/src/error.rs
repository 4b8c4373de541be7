/// Result alias that carries the custom [`AnalyzerError`] type.
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// The requested exercise identifier is not in the registry.
    #[error("unknown exercise `{0}`")]
    UnknownExercise(String),
    /// A recorded frame sequence failed structural validation.
    #[error("invalid recording format: {0}")]
    InvalidRecordingFormat(String),
    /// Extraction or playback was cancelled. Callers normally treat this as a
    /// return to idle rather than a failure, see [`AnalyzerError::is_aborted`].
    #[error("operation aborted")]
    Aborted,
    /// A single frame carried data the analyzer cannot use (non-finite
    /// timestamps or coordinates).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("frame {requested} requested after frame {last}; replay only moves forward")]
    FrameOutOfOrder { requested: usize, last: usize },
    #[error("frame index {index} out of range for a recording of {len} frames")]
    FrameIndexOutOfRange { index: usize, len: usize },
    /// The external pose estimator failed on a frame.
    #[error("pose estimation failed: {0}")]
    Estimation(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that are not valid JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl AnalyzerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_recording<T: Into<String>>(reason: T) -> Self {
        Self::InvalidRecordingFormat(reason.into())
    }

    /// Cancellation is reported through the error channel but is not a fault.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<&str> for AnalyzerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AnalyzerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_flagged() {
        assert!(AnalyzerError::Aborted.is_aborted());
        assert!(!AnalyzerError::msg("boom").is_aborted());
    }

    #[test]
    fn unknown_exercise_names_the_identifier() {
        let err = AnalyzerError::UnknownExercise("burpee".to_string());
        assert!(format!("{err}").contains("burpee"));
    }
}
