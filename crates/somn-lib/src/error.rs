//! Error type shared by the detection engine.

use thiserror::Error;

/// Result alias used throughout the detection engine.
pub type Result<T> = std::result::Result<T, DetectError>;

/// Failures raised by transforms, recipes and detectors.
///
/// Finding no events is never an error: detectors return an empty list.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectError {
    /// The recipe registry has no method with this name.
    #[error("unknown detection method '{0}'")]
    UnknownMethod(String),

    /// A transform or threshold received a parameter it cannot work with.
    #[error("invalid parameter for {stage}: {reason}")]
    InvalidParameter { stage: &'static str, reason: String },

    /// The signal source has no channel with this label.
    #[error("channel '{0}' not found in recording")]
    MissingChannel(String),

    /// Two sequences that must be parallel have different lengths.
    #[error("length mismatch: {what} has {actual} samples, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A stage that needs real samples received an analytic signal.
    #[error("{0} requires a real-valued signal; add an abs/abs2 step first")]
    ComplexSignal(&'static str),

    /// An event list that must be ordered by start was not.
    #[error("events of rater {rater} are not sorted by start (at index {index})")]
    Unsorted { rater: usize, index: usize },

    /// An operation that needs at least one element got none.
    #[error("{0} requires at least one element")]
    EmptyInput(&'static str),
}

impl DetectError {
    pub(crate) fn invalid(stage: &'static str, reason: impl Into<String>) -> Self {
        DetectError::InvalidParameter {
            stage,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_names_the_method() {
        let err = DetectError::UnknownMethod("xxx".into());
        assert_eq!(err.to_string(), "unknown detection method 'xxx'");
    }

    #[test]
    fn invalid_parameter_mentions_stage() {
        let err = DetectError::invalid("moving_avg", "window must be positive");
        assert_eq!(
            err.to_string(),
            "invalid parameter for moving_avg: window must be positive"
        );
    }
}
