use hippocrates_schema::RedFlagWarning;
use thiserror::Error;

/// Failure of a single generation attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    /// The reply did not match the requested output schema.
    #[error("malformed generation: {0}")]
    Malformed(String),
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("generation service unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    /// Timeouts and outages are retried with a shorter prompt.
    pub fn wants_shorter_context(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Turn-level failures surfaced to the caller. None of them ends the
/// consultation; the dialogue state is left as it was before the turn.
#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("generation timed out after {attempts} attempts")]
    GenerationTimeout {
        attempts: u32,
        /// Danger signs confirmed by the failed turn, still worth showing.
        red_flags: Vec<RedFlagWarning>,
    },
    #[error("generation service unavailable after {attempts} attempts: {reason}")]
    GenerationUnavailable {
        attempts: u32,
        reason: String,
        red_flags: Vec<RedFlagWarning>,
    },
    #[error("consultation not found: {0}")]
    NotFound(String),
    #[error("consultation is busy with another turn")]
    Busy,
}

impl ConsultationError {
    pub fn red_flags(&self) -> &[RedFlagWarning] {
        match self {
            Self::GenerationTimeout { red_flags, .. }
            | Self::GenerationUnavailable { red_flags, .. } => red_flags,
            Self::NotFound(_) | Self::Busy => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_unavailable_shorten_context() {
        assert!(GenerationError::Timeout(30).wants_shorter_context());
        assert!(GenerationError::Unavailable("down".into()).wants_shorter_context());
        assert!(!GenerationError::Malformed("bad".into()).wants_shorter_context());
    }

    #[test]
    fn consultation_error_carries_red_flags() {
        let err = ConsultationError::GenerationTimeout {
            attempts: 2,
            red_flags: vec![RedFlagWarning {
                symptom: "stridor".into(),
                message: "Seek care".into(),
            }],
        };
        assert_eq!(err.red_flags().len(), 1);
        assert_eq!(err.to_string(), "generation timed out after 2 attempts");
        assert!(ConsultationError::Busy.red_flags().is_empty());
    }
}
