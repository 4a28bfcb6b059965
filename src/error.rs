//! Error taxonomy for the synchronization engine.

use thiserror::Error;

/// Errors raised while talking to the storage server or walking a pair.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable token and no valid username/password. Fatal for a run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed base URL, transport failure, or a closed connection.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Non-2xx status, unparsable JSON, or a non-200 envelope code.
    #[error("remote call {endpoint} failed: {reason}")]
    RemoteCall { endpoint: String, reason: String },

    /// An item-level failure that aborted a pair's walk.
    #[error("{path}: {reason}")]
    PairFailure { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    pub fn remote(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteCall {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn item(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PairFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::Connectivity(format!("invalid base URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SyncError::remote("/api/fs/list", "HTTP 500");
        assert_eq!(err.to_string(), "remote call /api/fs/list failed: HTTP 500");

        let err = SyncError::item("/a/b.txt", "copy failed");
        assert_eq!(err.to_string(), "/a/b.txt: copy failed");
    }

    #[test]
    fn test_url_error_is_connectivity() {
        let err: SyncError = url::Url::parse("http://[::1").unwrap_err().into();
        assert!(matches!(err, SyncError::Connectivity(_)));
    }
}
