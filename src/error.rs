//! Error types shared by the cache tiers, coordination layer and collaborators.
//!
//! Only `NotFound` and `TransientPeerFailure` are expected during normal
//! operation. Everything else is logged as an error where it is handled.

use thiserror::Error;

pub type StationResult<T> = Result<T, StationError>;

#[derive(Error, Debug)]
pub enum StationError {
    /// Artifact absent at the tier that was asked.
    #[error("not found: {0}")]
    NotFound(String),

    /// A single peer could not be reached or answered with an error.
    #[error("peer {node_id} failed: {reason}")]
    TransientPeerFailure { node_id: String, reason: String },

    /// The cluster-wide lock is held by another node.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Upstream registry failed after retries were exhausted.
    #[error("origin failure: {0}")]
    OriginFailure(String),

    /// Local disk or filesystem fault.
    #[error("storage failure: {context}: {source}")]
    StorageFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Content did not hash to the digest it was stored under.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Repository name, reference or digest that cannot be mapped to a path.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Shared key-value store unreachable or returned garbage.
    #[error("shared store error: {0}")]
    SharedStore(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StationError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageFailure {
            context: context.into(),
            source,
        }
    }

    pub fn peer(node_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransientPeerFailure {
            node_id: node_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Failures that happen routinely and must not be alerted on.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StationError::NotFound(_) | StationError::TransientPeerFailure { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StationError::NotFound(_))
    }
}

impl From<serde_json::Error> for StationError {
    fn from(e: serde_json::Error) -> Self {
        StationError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for StationError {
    fn from(e: bincode::Error) -> Self {
        StationError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors() {
        assert!(StationError::NotFound("cache:blob:x".into()).is_expected());
        assert!(StationError::peer("node-2", "connection refused").is_expected());
        assert!(!StationError::LockUnavailable("blob:x".into()).is_expected());
        assert!(!StationError::OriginFailure("503".into()).is_expected());
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = StationError::storage(
            "writing blob",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
