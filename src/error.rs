//! Error taxonomy for crawling, retrieval and publishing.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the crawl and retrieval pipeline.
///
/// Navigation and challenge errors are recovered per page, retrieval and
/// storage errors per record. Only `FatalConfiguration` and
/// `AuthenticationRequired` end a run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Navigation to {url} failed: {reason}")]
    TransientNavigation { url: String, reason: String },

    #[error("Challenge on {url} not cleared after {}s", .waited.as_secs())]
    ChallengeTimeout { url: String, waited: Duration },

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Asset too small: {size} bytes (minimum {minimum})")]
    AssetTooSmall { size: u64, minimum: u64 },

    #[error("No staged download appeared within {}s", .0.as_secs())]
    RetrievalTimeout(Duration),

    #[error("Record {index} ({title}) failed: {source}")]
    RecordFailure {
        index: usize,
        title: String,
        #[source]
        source: Box<HarvestError>,
    },

    #[error("Configuration error: {0}")]
    FatalConfiguration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Page driver error: {0}")]
    Driver(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    pub fn navigation(url: impl ToString, reason: impl std::fmt::Display) -> Self {
        Self::TransientNavigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }

    /// Whether the run can continue past this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalConfiguration(_) | Self::AuthenticationRequired(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarvestError::AssetTooSmall {
            size: 500,
            minimum: 1000,
        };
        assert!(err.to_string().contains("500 bytes"));

        let err = HarvestError::ChallengeTimeout {
            url: "https://a.org".into(),
            waited: Duration::from_secs(180),
        };
        assert!(err.to_string().contains("180s"));
    }

    #[test]
    fn test_record_failure_wraps_cause() {
        let err = HarvestError::RecordFailure {
            index: 2,
            title: "Lesson".into(),
            source: Box::new(HarvestError::RetrievalTimeout(Duration::from_secs(120))),
        };
        let msg = err.to_string();
        assert!(msg.contains("Record 2"));
        assert!(msg.contains("120s"));
        assert!(!err.is_fatal());
        assert!(HarvestError::FatalConfiguration("x".into()).is_fatal());
    }
}
