//! Error taxonomy shared by connectors, the engine, and storage.
//!
//! Every error carries a stable guid, generated once at construction, so a
//! single failure can be correlated across log lines and the in-band error
//! entries of a query response. The [`ErrorKind`] tells callers how to react:
//!
//! | Kind | Meaning |
//! |------|---------|
//! | `Action` | The request itself is invalid; fix and resend |
//! | `Normal` | Expected domain outcome (missing, forbidden); terminal |
//! | `Retryable` | Transient upstream failure; the same request may succeed |
//! | `Runtime` | A bug or broken invariant; carries detail for operators |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Action,
    Normal,
    Retryable,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed URI, reference, or suffix.
    InvalidUri,
    /// Malformed action payload or unsupported parameter.
    BadRequest,
    /// The resource does not exist, in a realm that claimed it.
    NotFound,
    /// The caller is not allowed to view the resource.
    Forbidden,
    /// The upstream system is temporarily unreachable.
    Unavailable,
    /// A connector is misconfigured or misbehaving.
    BadConnector,
    /// A storage backend read or write failed.
    Storage,
    /// Persisted data could not be decoded.
    Corrupt,
    /// A broken internal invariant.
    Internal,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::InvalidUri | ErrorCode::BadRequest => ErrorKind::Action,
            ErrorCode::NotFound | ErrorCode::Forbidden => ErrorKind::Normal,
            ErrorCode::Unavailable | ErrorCode::Storage => ErrorKind::Retryable,
            ErrorCode::BadConnector | ErrorCode::Corrupt | ErrorCode::Internal => {
                ErrorKind::Runtime
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidUri => "invalid_uri",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::BadConnector => "bad_connector",
            ErrorCode::Storage => "storage",
            ErrorCode::Corrupt => "corrupt",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct KnowledgeError {
    pub code: ErrorCode,
    pub message: String,
    /// Stable per-error id, for correlating logs with in-band responses.
    pub guid: Uuid,
    /// Operator-facing detail, only populated for `Runtime` errors.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

impl KnowledgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        KnowledgeError {
            code,
            message: message.into(),
            guid: Uuid::new_v4(),
            detail: None,
        }
    }

    pub fn invalid_uri(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUri, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn bad_connector(realm: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::BadConnector,
            format!("connector '{}': {}", realm, message.into()),
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Storage, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Corrupt, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Terminal "the resource is missing" outcome. Distinct from a connector
    /// declining a reference, which is expressed as `Ok(None)` from `locate`.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}

impl From<std::io::Error> for KnowledgeError {
    fn from(err: std::io::Error) -> Self {
        KnowledgeError::storage(err.to_string())
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::corrupt(err.to_string())
    }
}
