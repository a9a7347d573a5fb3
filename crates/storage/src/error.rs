use tessera_core::{ApiError, ConflictReport, CoreError, ErrorKind};
use thiserror::Error;

/// Failures inside the SQLite reference backend. These never cross the
/// transport seam; the backend turns them into error responses.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl StorageError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidRequest(_) | Self::Serialization(_) | Self::Core(_) => 400,
            Self::Sqlite(_) => 500,
        }
    }
}

/// What the persistence adapter reports to its callers: a normalized
/// remote failure or a detected write conflict.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("write conflict on {}", .0.entity)]
    Conflict(Box<ConflictReport>),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(e) => e.kind,
            Self::Conflict(_) => ErrorKind::Conflict,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Api(e) => e.clone(),
            Self::Conflict(report) => report.to_api_error(),
        }
    }
}
