//! Storage gateway: relational CRUD for users, secrets and file metadata.
//!
//! Handlers only see the `StorageGateway` trait; `SqliteStorage` is the
//! implementation the server binary uses.
//!
//! Every lookup of an owned row takes the requesting user's id, so a
//! caller can never read or delete another user's record by guessing ids.

pub mod models;
pub mod sqlite;

use async_trait::async_trait;

use crate::errors::Result;

pub use models::{BankCard, Credential, FileMetadata, NewFile, Note, User, UserId};
pub use sqlite::SqliteStorage;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Create the schema if it does not exist yet.  Safe to call repeatedly.
    async fn bootstrap(&self) -> Result<()>;

    /// Check that the database is reachable.
    async fn ping(&self) -> Result<()>;

    // --- Users ---

    /// Insert a user.  A taken login yields `AlreadyExists`.
    async fn add_user(&self, login: &str, password: &str) -> Result<UserId>;
    async fn get_user(&self, login: &str) -> Result<Option<User>>;

    // --- Credentials ---

    async fn add_credential(&self, credential: &Credential) -> Result<i64>;
    async fn get_credentials(&self, user_id: UserId) -> Result<Vec<Credential>>;
    async fn get_credential(&self, user_id: UserId, id: i64) -> Result<Option<Credential>>;
    /// Returns `false` when no row owned by `user_id` had that id.
    async fn remove_credential(&self, user_id: UserId, id: i64) -> Result<bool>;

    // --- Notes ---

    async fn add_note(&self, note: &Note) -> Result<i64>;
    async fn get_notes(&self, user_id: UserId) -> Result<Vec<Note>>;
    async fn get_note(&self, user_id: UserId, id: i64) -> Result<Option<Note>>;
    async fn remove_note(&self, user_id: UserId, id: i64) -> Result<bool>;

    // --- Bank cards ---

    async fn add_card(&self, card: &BankCard) -> Result<i64>;
    async fn get_cards(&self, user_id: UserId) -> Result<Vec<BankCard>>;
    async fn get_card(&self, user_id: UserId, id: i64) -> Result<Option<BankCard>>;
    async fn remove_card(&self, user_id: UserId, id: i64) -> Result<bool>;

    // --- Files ---

    /// Insert the metadata, or update size and description when the user
    /// already has a file with that name.
    async fn upsert_file(&self, file: &NewFile) -> Result<()>;
    async fn get_files(&self, user_id: UserId) -> Result<Vec<FileMetadata>>;
    async fn get_file(&self, user_id: UserId, id: i64) -> Result<Option<FileMetadata>>;
    async fn get_file_by_name(&self, user_id: UserId, name: &str)
        -> Result<Option<FileMetadata>>;
    async fn remove_file(&self, user_id: UserId, id: i64) -> Result<bool>;
}
