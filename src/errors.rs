use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors that can occur in SecretKeeper.
#[derive(Debug, Error)]
pub enum KeeperError {
    // --- Crypto errors ---
    #[error("invalid key size {0}: key must be 16, 24 or 32 bytes")]
    InvalidKeySize(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Deliberately carries no cause: wrong key, tampering and malformed
    /// input must look identical to the caller.
    #[error("decryption failed")]
    DecryptionFailed,

    // --- Caller errors ---
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("unknown method {0}")]
    Unimplemented(String),

    /// A failure whose message is already safe to show to callers.
    #[error("{0}")]
    Internal(String),

    // --- Collaborator errors ---
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("declared size {declared} but {written} bytes were written")]
    SizeMismatch { declared: u64, written: u64 },

    // --- Config errors ---
    #[error("Config error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("call timed out")]
    Timeout,
}

/// Convenience type alias for SecretKeeper results.
pub type Result<T> = std::result::Result<T, KeeperError>;

impl From<rusqlite::Error> for KeeperError {
    fn from(err: rusqlite::Error) -> Self {
        KeeperError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::SerializationError(err.to_string())
    }
}

/// Status codes returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    #[serde(rename = "OK")]
    Ok,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    Internal,
    Unimplemented,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "InvalidArgument",
            Code::PermissionDenied => "PermissionDenied",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::Internal => "Internal",
            Code::Unimplemented => "Unimplemented",
        };
        f.write_str(name)
    }
}

impl KeeperError {
    /// Map this error onto the caller-visible status taxonomy.
    pub fn code(&self) -> Code {
        match self {
            KeeperError::InvalidArgument(_) => Code::InvalidArgument,
            KeeperError::PermissionDenied(_) => Code::PermissionDenied,
            KeeperError::NotFound(_) => Code::NotFound,
            KeeperError::AlreadyExists(_) => Code::AlreadyExists,
            KeeperError::Unimplemented(_) => Code::Unimplemented,
            _ => Code::Internal,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        KeeperError::InvalidArgument(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        KeeperError::PermissionDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        KeeperError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        KeeperError::Internal(msg.into())
    }
}

/// What a caller receives when a call fails: a code plus a short message
/// with no internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&KeeperError> for Status {
    fn from(err: &KeeperError) -> Self {
        let message = match err {
            KeeperError::InvalidArgument(m)
            | KeeperError::PermissionDenied(m)
            | KeeperError::NotFound(m)
            | KeeperError::AlreadyExists(m)
            | KeeperError::Internal(m) => m.clone(),
            KeeperError::Unimplemented(_) | KeeperError::DecryptionFailed => err.to_string(),
            _ => "internal error".to_string(),
        };
        Status::new(err.code(), message)
    }
}

impl From<Status> for KeeperError {
    fn from(status: Status) -> Self {
        match status.code {
            Code::InvalidArgument => KeeperError::InvalidArgument(status.message),
            Code::PermissionDenied => KeeperError::PermissionDenied(status.message),
            Code::NotFound => KeeperError::NotFound(status.message),
            Code::AlreadyExists => KeeperError::AlreadyExists(status.message),
            Code::Unimplemented => KeeperError::Unimplemented(status.message),
            Code::Ok | Code::Internal => KeeperError::Internal(status.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_detail_is_not_leaked() {
        let err = KeeperError::Storage("UNIQUE constraint failed: users.login".into());
        let status = Status::from(&err);
        assert_eq!(status.code, Code::Internal);
        assert_eq!(status.message, "internal error");
    }

    #[test]
    fn caller_errors_keep_their_message() {
        let status = Status::from(&KeeperError::denied("missing token"));
        assert_eq!(status.code, Code::PermissionDenied);
        assert_eq!(status.message, "missing token");
    }

    #[test]
    fn code_serializes_with_ok_spelling() {
        let json = serde_json::to_string(&Code::Ok).unwrap();
        assert_eq!(json, "\"OK\"");
        let json = serde_json::to_string(&Code::NotFound).unwrap();
        assert_eq!(json, "\"NotFound\"");
    }

    #[test]
    fn status_round_trips_into_error() {
        let err: KeeperError = Status::new(Code::AlreadyExists, "user already exists").into();
        assert_eq!(err.code(), Code::AlreadyExists);
        assert_eq!(err.to_string(), "user already exists");
    }
}
