use axum::http::StatusCode;
use thiserror::Error;

/// Every way a reel submission can fail
#[derive(Error, Debug)]
pub enum ReelError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to resolve reel: {0}")]
    ResolutionFailed(String),

    #[error("No video found for reel {0}")]
    NoMediaFound(String),

    #[error("Object storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Failed to persist reel record: {0}")]
    PersistenceFailed(String),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl ReelError {
    /// HTTP status reported to the webhook caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::ResolutionFailed(_) | Self::NoMediaFound(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::StorageUnavailable(_)
            | Self::UploadFailed(_)
            | Self::PersistenceFailed(_)
            | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name, used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ResolutionFailed(_) => "resolution_failed",
            Self::NoMediaFound(_) => "no_media_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::UploadFailed(_) => "upload_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

impl From<sqlx::Error> for ReelError {
    fn from(e: sqlx::Error) -> Self {
        Self::PersistenceFailed(e.to_string())
    }
}

impl From<std::io::Error> for ReelError {
    fn from(e: std::io::Error) -> Self {
        Self::Unexpected(e.to_string())
    }
}
