//! Error types for plugcache.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Discovery
    #[error("Registry discovery unavailable for {hostname}: {reason}")]
    DiscoveryUnavailable { hostname: String, reason: String },

    // Fetch errors
    #[error("Failed to fetch {package}: {reason}")]
    FetchFailed { package: String, reason: String },

    #[error("No installation method could resolve {0}")]
    NoHandlerMatched(String),

    #[error("Checksum mismatch for {package}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    // Wait errors
    #[error("Timed out waiting for cache request {request_id}; still pending: {}", .pending.join(", "))]
    WaitTimeout {
        request_id: String,
        pending: Vec<String>,
    },

    #[error("Provider installation failed: {}", .failures.join("; "))]
    PackagesFailed { failures: Vec<String> },

    // Ledger errors
    #[error("Invalid cache state transition for {package}: {from} -> {to}")]
    InvalidTransition {
        package: String,
        from: String,
        to: String,
    },

    #[error("Unknown cache request: {0}")]
    UnknownRequest(String),

    #[error("Invalid provider address: {0}")]
    InvalidAddress(String),

    // Hook errors
    #[error("Failed to generate CLI configuration: {0}")]
    ConfigGeneration(String),

    #[error("Wrapped tool failed: {0}")]
    ToolFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error belongs to the fetch taxonomy recorded on a failed entry.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::FetchFailed { .. } | Error::NoHandlerMatched(_) | Error::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_lists_pending() {
        let err = Error::WaitTimeout {
            request_id: "req_1".to_string(),
            pending: vec!["a/b/c 1.0.0 linux_amd64".into(), "a/b/d 2.0.0 linux_amd64".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a/b/c 1.0.0 linux_amd64"));
        assert!(msg.contains("a/b/d 2.0.0 linux_amd64"));
    }

    #[test]
    fn test_fetch_failure_classification() {
        assert!(Error::NoHandlerMatched("x".into()).is_fetch_failure());
        assert!(!Error::Cancelled.is_fetch_failure());
    }
}
