use thiserror::Error;

/// Failures that abort a generation run. External provider failures never
/// surface here; they degrade individual creatives instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("packaging invariant violated: {0}")]
    PackagingInvariantViolation(String),
}

impl StudioError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn violation(message: impl Into<String>) -> Self {
        Self::PackagingInvariantViolation(message.into())
    }
}
