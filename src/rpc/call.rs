//! The unit of work flowing through the interceptor chain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::messages::{DownloadChunk, UploadRequest};
use super::method::Method;
use crate::errors::{KeeperError, Result};
use crate::storage::UserId;

/// Metadata key carrying the session token.
pub const TOKEN_KEY: &str = "token";
/// Metadata key carrying the request integrity tag.
pub const HASH_KEY: &str = "HashSHA256";

pub type Metadata = BTreeMap<String, String>;

/// Inbound half of a client-streaming call.
#[async_trait]
pub trait MessageSource<T>: Send {
    /// Next message, or `None` once the peer has finished sending.
    async fn recv(&mut self) -> Result<Option<T>>;
}

/// Outbound half of a server-streaming call.
#[async_trait]
pub trait MessageSink<T>: Send {
    async fn send(&mut self, item: T) -> Result<()>;
}

#[async_trait]
impl<T: Send> MessageSource<T> for mpsc::Receiver<Result<T>> {
    async fn recv(&mut self) -> Result<Option<T>> {
        mpsc::Receiver::recv(self).await.transpose()
    }
}

#[async_trait]
impl<T: Send> MessageSink<T> for mpsc::Sender<T> {
    async fn send(&mut self, item: T) -> Result<()> {
        mpsc::Sender::send(self, item)
            .await
            .map_err(|_| KeeperError::Transport("stream receiver closed".into()))
    }
}

/// Stream attached to a call, if its method streams.
pub enum Streams {
    None,
    Upload(Box<dyn MessageSource<UploadRequest>>),
    Download(Box<dyn MessageSink<DownloadChunk>>),
}

pub struct Call {
    pub method: Method,
    pub metadata: Metadata,
    /// First (or only) request message.
    pub body: Value,
    /// Set by the authentication stage once a token has been verified.
    pub identity: Option<UserId>,
    pub streams: Streams,
}

impl Call {
    pub fn new(method: Method, body: Value) -> Self {
        Self {
            method,
            metadata: Metadata::new(),
            body,
            identity: None,
            streams: Streams::None,
        }
    }

    /// Build a call from a typed request message.
    pub fn from_message<T: Serialize>(method: Method, message: &T) -> Result<Self> {
        Ok(Self::new(method, serde_json::to_value(message)?))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_streams(mut self, streams: Streams) -> Self {
        self.streams = streams;
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Decode the body into the method's request type.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| KeeperError::invalid(format!("malformed request body: {e}")))
    }

    /// The verified caller.  Fails if the call never passed authentication.
    pub fn authenticated(&self) -> Result<AuthenticatedCall> {
        self.identity
            .map(|user_id| AuthenticatedCall { user_id })
            .ok_or_else(|| KeeperError::denied("missing token"))
    }

    pub fn take_upload(&mut self) -> Result<Box<dyn MessageSource<UploadRequest>>> {
        match std::mem::replace(&mut self.streams, Streams::None) {
            Streams::Upload(source) => Ok(source),
            _ => Err(KeeperError::internal("upload stream missing")),
        }
    }

    pub fn take_download(&mut self) -> Result<Box<dyn MessageSink<DownloadChunk>>> {
        match std::mem::replace(&mut self.streams, Streams::None) {
            Streams::Download(sink) => Ok(sink),
            _ => Err(KeeperError::internal("download stream missing")),
        }
    }
}

/// Identity of a caller whose token has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedCall {
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Code;
    use serde_json::json;

    #[test]
    fn unauthenticated_call_has_no_identity() {
        let call = Call::new(Method::GetNotes, json!({}));
        assert_eq!(call.authenticated().unwrap_err().code(), Code::PermissionDenied);
    }

    #[test]
    fn parse_body_maps_to_invalid_argument() {
        let call = Call::new(Method::GetNote, json!({"id": "seven"}));
        let err = call.parse_body::<super::super::messages::IdRequest>().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn channel_source_surfaces_errors() {
        let (tx, mut rx) = mpsc::channel::<Result<UploadRequest>>(2);
        tx.send(Ok(UploadRequest::chunk(vec![1]))).await.unwrap();
        tx.send(Err(KeeperError::Transport("reset".into())))
            .await
            .unwrap();
        drop(tx);

        let source: &mut dyn MessageSource<UploadRequest> = &mut rx;
        assert!(source.recv().await.unwrap().is_some());
        assert!(source.recv().await.is_err());
        assert!(source.recv().await.unwrap().is_none());
    }
}
