use thiserror::Error;

use crate::api_client::ApiError;

/// Layer-level error type.
/// Only "no data at all" conditions are meant to reach the UI; everything
/// recoverable is absorbed by the component that hit it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No cached data available for '{0}'")]
    NoCachedData(String),

    #[error("This action requires connectivity")]
    RequiresConnectivity,

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Stream failed: {0}")]
    Stream(String),

    #[error("All outreach sources failed")]
    AllSourcesFailed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Short machine-readable code, mirrored into logs and UI error states.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NoCachedData(_) => "NO_CACHED_DATA",
            SyncError::RequiresConnectivity => "REQUIRES_CONNECTIVITY",
            SyncError::Fetch(_) => "FETCH_ERROR",
            SyncError::Storage(_) => "STORAGE_ERROR",
            SyncError::Api(_) => "API_ERROR",
            SyncError::Stream(_) => "STREAM_ERROR",
            SyncError::AllSourcesFailed => "ALL_SOURCES_FAILED",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the failure is a missing-connectivity condition rather than
    /// a server or data problem.
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            SyncError::NoCachedData(_) | SyncError::RequiresConnectivity
        )
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(e: redis::RedisError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_errors_are_flagged() {
        assert!(SyncError::RequiresConnectivity.is_offline());
        assert!(SyncError::NoCachedData("contacts".into()).is_offline());
        assert!(!SyncError::AllSourcesFailed.is_offline());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SyncError::AllSourcesFailed.code(), "ALL_SOURCES_FAILED");
        assert_eq!(
            SyncError::Stream("both transports".into()).code(),
            "STREAM_ERROR"
        );
    }
}
