//! Rows exchanged with the storage gateway.
//!
//! Secret fields hold whatever the handlers hand over, which is
//! ciphertext whenever field encryption is enabled.

use chrono::{DateTime, Utc};

/// Primary key of a `users` row.
pub type UserId = i64;

/// A registered account.  `password` is the sealed password text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credential {
    pub id: i64,
    pub user_id: UserId,
    pub login: String,
    pub password: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Note {
    pub id: i64,
    pub user_id: UserId,
    pub text: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BankCard {
    pub id: i64,
    pub user_id: UserId,
    pub number: String,
    pub owner: String,
    pub expire_date: String,
    pub cvv: String,
    pub description: String,
}

/// Metadata of an uploaded file.  The bytes live in the blob store under
/// `bucket` / `object_key(user_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: i64,
    pub user_id: UserId,
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// What the upload pipeline commits once the blob is fully written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub user_id: UserId,
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub description: String,
}
