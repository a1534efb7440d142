use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RecordKind;

/// Failure surfaced through `StoreState::error`.
///
/// The message is what the UI shows; collaborator details are logged at the
/// store boundary and never carried here.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("{message}")]
    LoadFailed { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    CreateFailed { message: String },

    #[error("{message}")]
    DeleteFailed { message: String },
}

impl StoreError {
    pub fn load_collection(kind: RecordKind) -> Self {
        Self::LoadFailed {
            message: format!("There was an error loading {}...", kind.plural()),
        }
    }

    pub fn load_record(kind: RecordKind) -> Self {
        Self::LoadFailed {
            message: format!("There was an error loading the {}...", kind.noun()),
        }
    }

    pub fn not_found(kind: RecordKind, id: &str) -> Self {
        Self::NotFound {
            message: format!("No {} with id {id}", kind.noun()),
        }
    }

    pub fn create(kind: RecordKind) -> Self {
        Self::CreateFailed {
            message: format!("There was an error creating the {}...", kind.noun()),
        }
    }

    pub fn delete(kind: RecordKind) -> Self {
        Self::DeleteFailed {
            message: format!("There was an error deleting the {}...", kind.noun()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::LoadFailed { message }
            | Self::NotFound { message }
            | Self::CreateFailed { message }
            | Self::DeleteFailed { message } => message,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LoadFailed { .. } => "LOAD_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::CreateFailed { .. } => "CREATE_FAILED",
            Self::DeleteFailed { .. } => "DELETE_FAILED",
        }
    }

    /// `get` reports a missing record exactly like a transport failure.
    #[must_use]
    pub fn fold_into_load(self, kind: RecordKind) -> Self {
        match self {
            Self::NotFound { .. } => Self::load_record(kind),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("invalid endpoint: {0}")]
    InvalidUrl(String),

    #[error("record in response has neither `_id` nor `id`")]
    MissingIdentity,
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupted data under '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::Unavailable(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("validation error: {0}")]
    Validation(String),
}
