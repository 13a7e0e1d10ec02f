use thiserror::Error;

/// Failures that end a request (or, for `UnsupportedLanguage`, a sandbox run).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("{provider} did not respond within {deadline_ms}ms")]
    Timeout {
        provider: &'static str,
        deadline_ms: u64,
    },
    #[error("{provider} request failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
    #[error("verification is not supported for {0}")]
    UnsupportedLanguage(String),
}

impl PipelineError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }
}

/// Why a best-effort secondary call fell back to the caller's original value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Degraded {
    #[error("secondary provider is not configured")]
    Unconfigured,
    #[error("secondary provider did not respond within {0}ms")]
    Timeout(u64),
    #[error("secondary provider failed: {0}")]
    Provider(String),
    #[error("secondary provider returned no text")]
    EmptyOutput,
}

impl From<PipelineError> for Degraded {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Timeout { deadline_ms, .. } => Degraded::Timeout(deadline_ms),
            other => Degraded::Provider(other.to_string()),
        }
    }
}
