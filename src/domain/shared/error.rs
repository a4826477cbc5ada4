//! Call orchestration errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Device access refused; the caller stays on the microphone step.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Token endpoint failure; the machine stays in `AwaitingCredential`.
    #[error("Credential fetch failed: {0}")]
    CredentialFetch(String),

    /// Signaling round-trip failure; forces the call back to `Idle`.
    #[error("Session negotiation failed: {0}")]
    Negotiation(String),

    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("Failed to persist call record: {0}")]
    Persistence(String),

    #[error("Control channel error: {0}")]
    Channel(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Errors after which the call attempt cannot continue.
    pub fn aborts_call(&self) -> bool {
        matches!(self, CallError::Negotiation(_) | CallError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_negotiation_and_cancel_abort() {
        assert!(CallError::Negotiation("answer rejected".into()).aborts_call());
        assert!(CallError::Cancelled("stopped".into()).aborts_call());
        assert!(!CallError::PermissionDenied("denied".into()).aborts_call());
        assert!(!CallError::CredentialFetch("502".into()).aborts_call());
        assert!(!CallError::Persistence("timeout".into()).aborts_call());
    }
}
