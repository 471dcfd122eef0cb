use thiserror::Error;

use crate::queue::JobStatus;

#[derive(Error, Debug)]
pub enum SubforgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Provider timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed translation: {0}")]
    Format(String),

    #[error("Repetition detected in translation: {0}")]
    Repetition(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Job {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} is being processed")]
    JobBusy(i64),

    #[error("Job paused before completion")]
    Cancelled,
}

impl SubforgeError {
    /// Errors a provider may recover from on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderTimeout(_) | Self::RateLimited(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Provider(_) | Self::Format(_) | Self::Repetition(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SubforgeError::ProviderTimeout(30).is_transient());
        assert!(SubforgeError::RateLimited("429".into()).is_transient());
        assert!(SubforgeError::Format("count".into()).is_transient());
        assert!(!SubforgeError::Config("bad".into()).is_transient());
        assert!(!SubforgeError::Transcription("corrupt".into()).is_transient());
    }

    #[test]
    fn test_transition_message() {
        let err = SubforgeError::InvalidTransition {
            id: 7,
            from: JobStatus::Done,
            to: JobStatus::Queued,
        };
        assert_eq!(err.to_string(), "Job 7 cannot go from done to queued");
    }
}
