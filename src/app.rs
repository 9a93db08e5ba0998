//! Wiring: build the collaborators from [`Settings`] and serve.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::blob::FsBlobStore;
use crate::config::Settings;
use crate::crypto::FieldCipher;
use crate::errors::Result;
use crate::rpc::{self, Pipeline};
use crate::server::Server;
use crate::service::KeeperService;
use crate::storage::SqliteStorage;
use crate::token::TokenService;

/// Open storage, prepare the bucket and compose the interceptor chain.
pub async fn build_pipeline(settings: &Settings) -> Result<Arc<Pipeline>> {
    settings.validate()?;

    let storage = SqliteStorage::open(&settings.database_path)?;
    let blobs = FsBlobStore::new(&settings.blob_dir);
    let tokens = Arc::new(TokenService::new(settings.jwt_key(), settings.token_ttl()));
    let cipher = FieldCipher::new(settings.database_key()?, settings.encrypt_fields);

    let service = KeeperService::new(Arc::new(storage), Arc::new(blobs), cipher, tokens.clone())
        .with_bucket(settings.bucket.clone())
        .with_conduit_depth(settings.conduit_depth)
        .with_chunk_size(settings.download_chunk_size);
    service.prepare().await?;

    let hash_key = settings.hash_key();
    info!(
        integrity = hash_key.is_some(),
        encrypt_fields = settings.encrypt_fields,
        database = %settings.database_path.display(),
        blobs = %settings.blob_dir.display(),
        "service ready"
    );

    Ok(Arc::new(rpc::secured_pipeline(
        Arc::new(service),
        hash_key,
        tokens,
    )))
}

/// Build everything, bind `settings.address` and serve until `shutdown`
/// resolves.
pub async fn run<F>(settings: Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let pipeline = build_pipeline(&settings).await?;
    let listener = TcpListener::bind(&settings.address).await?;
    Server::new(pipeline)
        .with_stream_depth(settings.conduit_depth)
        .serve(listener, shutdown)
        .await
}
