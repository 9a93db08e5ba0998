//! In-process harness shared by the integration tests: an in-memory
//! SQLite database, an in-memory blob store and the full interceptor
//! chain in front of the service.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use secretkeeper::blob::{BlobGateway, MemoryBlobStore};
use secretkeeper::crypto::{FieldCipher, SecretKey};
use secretkeeper::errors::Result;
use secretkeeper::rpc::messages::{
    AuthorizeResponse, DownloadChunk, DownloadRequest, UploadRequest, UserRequest,
};
use secretkeeper::rpc::{self, Call, Method, Pipeline, Streams, TOKEN_KEY};
use secretkeeper::service::KeeperService;
use secretkeeper::storage::{SqliteStorage, StorageGateway};
use secretkeeper::token::TokenService;

pub const DATABASE_KEY: [u8; 32] = [7u8; 32];
pub const JWT_KEY: &[u8] = b"integration-jwt-key";

pub struct Harness {
    pub pipeline: Pipeline,
    pub storage: Arc<SqliteStorage>,
    pub blobs: MemoryBlobStore,
    pub tokens: Arc<TokenService>,
}

pub async fn harness() -> Harness {
    harness_with(None, true).await
}

pub async fn harness_with(hash_key: Option<SecretKey>, encrypt_fields: bool) -> Harness {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open in-memory db"));
    let blobs = MemoryBlobStore::new();
    assemble(storage, blobs.clone(), Arc::new(blobs), hash_key, encrypt_fields).await
}

/// Build a harness over `storage` and `gateway`.  `blobs` is the store the
/// gateway ends up writing to, kept for inspection.
pub async fn assemble(
    storage: Arc<SqliteStorage>,
    blobs: MemoryBlobStore,
    gateway: Arc<dyn BlobGateway>,
    hash_key: Option<SecretKey>,
    encrypt_fields: bool,
) -> Harness {
    let tokens = Arc::new(TokenService::new(
        SecretKey::new(JWT_KEY.to_vec()),
        Duration::from_secs(3600),
    ));
    let cipher = FieldCipher::new(
        SecretKey::aead(DATABASE_KEY.to_vec()).expect("valid key"),
        encrypt_fields,
    );

    let service = KeeperService::new(
        storage.clone() as Arc<dyn StorageGateway>,
        gateway,
        cipher,
        tokens.clone(),
    );
    service.prepare().await.expect("prepare service");

    let pipeline = rpc::secured_pipeline(Arc::new(service), hash_key, tokens.clone());
    Harness {
        pipeline,
        storage,
        blobs,
        tokens,
    }
}

impl Harness {
    /// Send a unary call with an optional token.
    pub async fn call<Req, Resp>(&self, token: Option<&str>, method: Method, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut call = Call::from_message(method, req)?;
        if let Some(token) = token {
            call = call.with_metadata(TOKEN_KEY, token);
        }
        let body = self.pipeline.dispatch(call).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Register `login` and return a fresh token for it.
    pub async fn login(&self, login: &str, password: &str) -> String {
        let req = UserRequest {
            login: login.into(),
            password: password.into(),
        };
        let _: Value = self
            .call(None, Method::RegisterUser, &req)
            .await
            .expect("register");
        let reply: AuthorizeResponse = self
            .call(None, Method::Authorize, &req)
            .await
            .expect("authorize");
        reply.token
    }

    pub fn user_id(&self, token: &str) -> i64 {
        self.tokens.validate(token).expect("valid token")
    }

    /// Upload `first` followed by `rest` as separate chunk messages.
    pub async fn upload(&self, token: &str, first: UploadRequest, rest: Vec<Vec<u8>>) -> Result<Value> {
        let rest = rest
            .into_iter()
            .map(|chunk| Ok(UploadRequest::chunk(chunk)))
            .collect();
        self.upload_messages(token, first, rest).await
    }

    /// Upload `first` followed by `rest` exactly as given, errors included.
    pub async fn upload_messages(
        &self,
        token: &str,
        first: UploadRequest,
        rest: Vec<Result<UploadRequest>>,
    ) -> Result<Value> {
        let (tx, rx) = mpsc::channel::<Result<UploadRequest>>(rest.len() + 1);
        for message in rest {
            tx.send(message).await.expect("queue message");
        }
        drop(tx);

        let call = Call::from_message(Method::Upload, &first)?
            .with_metadata(TOKEN_KEY, token)
            .with_streams(Streams::Upload(Box::new(rx)));
        self.pipeline.dispatch(call).await
    }

    /// Download and collect every chunk the service emits.
    pub async fn download(
        &self,
        token: &str,
        req: &DownloadRequest,
    ) -> Result<(Value, Vec<DownloadChunk>)> {
        let (tx, mut rx) = mpsc::channel::<DownloadChunk>(256);
        let call = Call::from_message(Method::Download, req)?
            .with_metadata(TOKEN_KEY, token)
            .with_streams(Streams::Download(Box::new(tx)));
        let reply = self.pipeline.dispatch(call).await?;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        Ok((reply, chunks))
    }
}

/// `len` bytes of a repeating, non-constant pattern.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
