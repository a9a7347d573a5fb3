use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::EntityRef;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Stable failure classes surfaced to editor components, independent of
/// the transport that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Permission,
    NotFound,
    Server,
    Timeout,
    Network,
    Conflict,
    TreeGenerationFailed,
    CircularReference,
    Unknown,
}

impl ErrorKind {
    /// Classify a non-success HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Permission,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::Server,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Conflict => "conflict",
            Self::TreeGenerationFailed => "tree_generation_failed",
            Self::CircularReference => "circular_reference",
            Self::Unknown => "unknown",
        }
    }

    /// Generic message for the class. Domains refine some of these.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Validation => "The submitted content is invalid.",
            Self::Authentication => "Your session has expired. Please sign in again.",
            Self::Permission => "You do not have permission to perform this action.",
            Self::NotFound => "The requested content was not found.",
            Self::Server => "The server could not complete the request. Please try again later.",
            Self::Timeout => "The request timed out. Please try again.",
            Self::Network => "Unable to reach the server. Check your connection.",
            Self::Conflict => "This content was changed by someone else.",
            Self::TreeGenerationFailed => "The page hierarchy could not be loaded.",
            Self::CircularReference => "The page hierarchy contains a loop.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized failure: the class, a message fit for the editor UI, and
/// whatever transport detail was available for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {user_message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub user_message: String,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            user_message: kind.default_message().to_string(),
            status: None,
            detail: None,
        }
    }

    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        Self {
            status: Some(status),
            detail,
            ..Self::new(ErrorKind::from_status(status))
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation).with_detail(detail)
    }
}

/// Both sides of a detected write conflict. Never resolved automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub entity: EntityRef,
    pub stored: serde_json::Value,
    pub incoming: serde_json::Value,
    pub stored_at: Option<chrono::DateTime<chrono::Utc>>,
    pub incoming_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConflictReport {
    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(ErrorKind::Conflict).with_detail(format!(
            "{}: stored version {:?} is newer than incoming {:?}",
            self.entity, self.stored_at, self.incoming_at
        ))
    }
}
