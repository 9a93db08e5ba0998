//! Request handlers and the endpoint that routes calls to them.
//!
//! `KeeperService` owns the collaborators every handler needs: the storage
//! gateway, the blob gateway, the field cipher and the token service.
//! Handlers live in `users`, `secrets` and `files`; each returns a
//! [`KeeperError`] whose message is safe to show the caller, and logs the
//! underlying cause itself.

mod files;
mod secrets;
mod users;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::blob::BlobGateway;
use crate::crypto::FieldCipher;
use crate::errors::{KeeperError, Result};
use crate::rpc::{Call, Endpoint, Method};
use crate::storage::StorageGateway;
use crate::token::TokenService;

pub use files::check_file_name;

pub const DEFAULT_BUCKET: &str = "secretkeeper";
pub const DEFAULT_CONDUIT_DEPTH: usize = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub struct KeeperService {
    storage: Arc<dyn StorageGateway>,
    blobs: Arc<dyn BlobGateway>,
    cipher: FieldCipher,
    tokens: Arc<TokenService>,
    bucket: String,
    conduit_depth: usize,
    chunk_size: usize,
}

impl KeeperService {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        blobs: Arc<dyn BlobGateway>,
        cipher: FieldCipher,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            storage,
            blobs,
            cipher,
            tokens,
            bucket: DEFAULT_BUCKET.to_string(),
            conduit_depth: DEFAULT_CONDUIT_DEPTH,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Number of chunks the upload conduit buffers.
    pub fn with_conduit_depth(mut self, depth: usize) -> Self {
        self.conduit_depth = depth.max(1);
        self
    }

    /// Size of each download chunk in bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Run migrations and make sure the bucket exists.
    pub async fn prepare(&self) -> Result<()> {
        self.storage.bootstrap().await?;
        self.blobs.ensure_bucket(&self.bucket).await
    }
}

fn reply<T: Serialize>(message: T) -> Result<Value> {
    Ok(serde_json::to_value(message)?)
}

/// Log a collaborator failure and replace it with a caller-safe message.
fn failure(message: &'static str) -> impl FnOnce(KeeperError) -> KeeperError {
    move |err| {
        error!(error = %err, "{message}");
        KeeperError::internal(message)
    }
}

#[async_trait]
impl Endpoint for KeeperService {
    async fn handle(&self, mut call: Call) -> Result<Value> {
        match call.method {
            Method::RegisterUser => reply(self.register(call.parse_body()?).await?),
            Method::Authorize => reply(self.authorize(call.parse_body()?).await?),
            Method::Echo => reply(self.echo(call.parse_body()?)),

            Method::AddCredential => {
                reply(self.add_credential(call.authenticated()?, call.parse_body()?).await?)
            }
            Method::GetCredential => {
                reply(self.get_credential(call.authenticated()?, call.parse_body()?).await?)
            }
            Method::GetCredentials => reply(self.get_credentials(call.authenticated()?).await?),
            Method::RemoveCredential => {
                reply(self.remove_credential(call.authenticated()?, call.parse_body()?).await?)
            }

            Method::AddBankCard => {
                reply(self.add_card(call.authenticated()?, call.parse_body()?).await?)
            }
            Method::GetBankCard => {
                reply(self.get_card(call.authenticated()?, call.parse_body()?).await?)
            }
            Method::GetBankCards => reply(self.get_cards(call.authenticated()?).await?),
            Method::RemoveBankCard => {
                reply(self.remove_card(call.authenticated()?, call.parse_body()?).await?)
            }

            Method::AddNote => reply(self.add_note(call.authenticated()?, call.parse_body()?).await?),
            Method::GetNote => reply(self.get_note(call.authenticated()?, call.parse_body()?).await?),
            Method::GetNotes => reply(self.get_notes(call.authenticated()?).await?),
            Method::RemoveNote => {
                reply(self.remove_note(call.authenticated()?, call.parse_body()?).await?)
            }

            Method::GetFiles => reply(self.get_files(call.authenticated()?).await?),
            Method::RemoveFile => {
                reply(self.remove_file(call.authenticated()?, call.parse_body()?).await?)
            }
            Method::Upload => {
                let auth = call.authenticated()?;
                if call.body.is_null() {
                    return Err(KeeperError::invalid("empty file"));
                }
                let first = call.parse_body()?;
                let source = call.take_upload()?;
                reply(self.upload(auth, first, source).await?)
            }
            Method::Download => {
                let auth = call.authenticated()?;
                let request = call.parse_body()?;
                let sink = call.take_download()?;
                reply(self.download(auth, request, sink).await?)
            }
        }
    }
}
