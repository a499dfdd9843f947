//! Core error definitions for the Conclave framework.
//!
//! Every Conclave crate reports failures through [`ConclaveError`], so the
//! orchestrator can tell fatal setup problems apart from per-participant
//! invocation failures and recoverable synthesis failures.
//!
//! # Main types
//!
//! - [`ConclaveError`]: Unified error enum for all Conclave subsystems.
//! - [`ConclaveResult`]: Convenience alias for `Result<T, ConclaveError>`.

// --- Error types ---

/// Top-level error type for the Conclave framework.
///
/// Each variant corresponds to a subsystem or failure class.
#[derive(Debug, thiserror::Error)]
pub enum ConclaveError {
    /// Fatal problem while preparing a job (unusable participant, bad input).
    /// A job that hits this goes straight to `failed`.
    #[error("Setup error: {0}")]
    Setup(String),

    /// No provider credential or model could be resolved for a role.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// A single agent invocation failed.
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// The final synthesis or decision call failed.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the record's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An error from the job store backend.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request (e.g. a provider API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConclaveError {
    /// Whether this error is fatal for a job that is being prepared.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ConclaveError::Setup(_) | ConclaveError::MissingCredential(_)
        )
    }
}

/// A convenience `Result` alias using [`ConclaveError`].
pub type ConclaveResult<T> = Result<T, ConclaveError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConclaveError::Setup("agent 7 is disabled".into());
        assert_eq!(err.to_string(), "Setup error: agent 7 is disabled");

        let err = ConclaveError::InvalidState("job is running".into());
        assert_eq!(err.to_string(), "Invalid state: job is running");
    }

    #[test]
    fn test_setup_classification() {
        assert!(ConclaveError::Setup("x".into()).is_setup());
        assert!(ConclaveError::MissingCredential("openai".into()).is_setup());
        assert!(!ConclaveError::Invocation("timeout".into()).is_setup());
        assert!(!ConclaveError::Synthesis("502".into()).is_setup());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: ConclaveError = parse.unwrap_err().into();
        assert!(matches!(err, ConclaveError::Json(_)));
    }
}
