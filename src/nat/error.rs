// src/nat/error.rs
//! Error types for NAT probing and candidate gathering

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the probe, its sessions and the bundled STUN transport
#[derive(Debug, Error)]
pub enum NatError {
    /// Caller supplied an unusable server list
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Raw candidate description could not be parsed
    #[error("Malformed candidate {raw:?}: {reason}")]
    MalformedCandidate {
        /// The description as received
        raw: String,
        /// What was wrong with it
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport dropped its notification stream before end-of-candidates
    #[error("Candidate gathering aborted before end-of-candidates")]
    GatheringAborted,

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The shared classification session failed
    #[error("NAT classification failed: {0}")]
    Classification(String),

    /// Caller-imposed deadline expired
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// STUN protocol errors
    #[error("STUN error: {0}")]
    Stun(String),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// Config file decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for NAT operations
pub type NatResult<T> = Result<T, NatError>;

impl NatError {
    /// Shorthand for a malformed-candidate error
    pub fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCandidate {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a STUN error
    pub fn stun(reason: impl Into<String>) -> Self {
        Self::Stun(reason.into())
    }

    /// Whether this error came from the caller's input rather than the network
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Configuration(_) | Self::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display_includes_raw() {
        let err = NatError::malformed("1 1 UDP", "missing typ token");
        let text = err.to_string();
        assert!(text.contains("1 1 UDP"));
        assert!(text.contains("missing typ token"));
    }

    #[test]
    fn test_caller_error_classification() {
        assert!(NatError::InvalidArgument("empty".into()).is_caller_error());
        assert!(NatError::Configuration("one server".into()).is_caller_error());
        assert!(!NatError::GatheringAborted.is_caller_error());
        assert!(!NatError::Timeout(Duration::from_secs(1)).is_caller_error());
    }
}
