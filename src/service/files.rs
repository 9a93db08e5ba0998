//! File upload, download, listing and removal.
//!
//! Upload bridges the inbound message stream to the blob store through a
//! bounded channel: a producer drains the stream into the channel while
//! `put_object` consumes it.  Both run in the same task under
//! `tokio::join!`, so when either stops early its end of the channel is
//! dropped and the other side wakes up and finishes.  Bytes land under a
//! staging key; the metadata row is written next and the object is
//! promoted to its final key last.  Any failure removes the staged bytes
//! and leaves a previously stored file of the same name as it was.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{failure, KeeperService};
use crate::blob::{object_key, read_chunk, staging_key};
use crate::errors::{KeeperError, Result};
use crate::rpc::messages::{
    DownloadChunk, DownloadRequest, DownloadResponse, Empty, FileInfo, FilesResponse, IdRequest,
    UploadRequest, UploadResponse, DEFAULT_CONTENT_TYPE,
};
use crate::rpc::{AuthenticatedCall, MessageSink, MessageSource};
use crate::storage::{FileMetadata, NewFile};

/// Reject names that cannot be stored as a single object key segment.
pub fn check_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(char::is_control)
    {
        return Err(KeeperError::invalid("invalid file name"));
    }
    Ok(())
}

/// Forward the first chunk and every later one into the conduit.
///
/// Stops quietly when the consumer hangs up; the consumer reports why.
async fn pump(
    first: Vec<u8>,
    mut source: Box<dyn MessageSource<UploadRequest>>,
    conduit: mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    if !first.is_empty() && conduit.send(first).await.is_err() {
        return Ok(());
    }
    while let Some(msg) = source.recv().await? {
        if msg.chunk.is_empty() {
            continue;
        }
        if conduit.send(msg.chunk).await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}

fn file_info(meta: FileMetadata) -> FileInfo {
    FileInfo {
        id: meta.id,
        name: meta.name,
        size: meta.size,
        content_type: meta.content_type,
        description: meta.description,
        created_at: meta.created_at,
    }
}

impl KeeperService {
    pub(crate) async fn upload(
        &self,
        auth: AuthenticatedCall,
        first: UploadRequest,
        source: Box<dyn MessageSource<UploadRequest>>,
    ) -> Result<UploadResponse> {
        let name = first.name.trim().to_string();
        if name.is_empty() {
            return Err(KeeperError::invalid("file name is required"));
        }
        check_file_name(&name)?;

        let size = first.size;
        let content_type = match first.content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE.to_string(),
            given => given.to_string(),
        };
        let staging = staging_key(auth.user_id, &name);
        let (conduit, sink) = mpsc::channel(self.conduit_depth);

        let producer = pump(first.chunk, source, conduit);
        let consumer = self.blobs.put_object(&self.bucket, &staging, sink, size);
        let (produced, consumed) = tokio::join!(producer, consumer);

        let outcome = match (produced, consumed) {
            (Err(e), _) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(_)) => {
                let file = NewFile {
                    user_id: auth.user_id,
                    bucket: self.bucket.clone(),
                    name: name.clone(),
                    size,
                    content_type,
                    description: first.description,
                };
                self.storage.upsert_file(&file).await
            }
        };
        if let Err(e) = outcome {
            error!(user_id = auth.user_id, file = %name, error = %e, "upload failed");
            self.discard_object(&staging).await;
            return Err(KeeperError::internal("failed to upload file"));
        }

        let key = object_key(auth.user_id, &name);
        if let Err(e) = self.blobs.promote_object(&self.bucket, &staging, &key).await {
            error!(user_id = auth.user_id, file = %name, error = %e, "upload could not be promoted");
            self.discard_object(&staging).await;
            self.forget_file(auth, &name, &key).await;
            return Err(KeeperError::internal("failed to upload file"));
        }

        info!(user_id = auth.user_id, file = %name, size, "file uploaded");
        Ok(UploadResponse { name, size })
    }

    /// Best-effort removal after a failed upload.
    async fn discard_object(&self, key: &str) {
        if let Err(e) = self.blobs.remove_object(&self.bucket, key, true).await {
            warn!(key, error = %e, "failed to remove object after failed upload");
        }
    }

    /// Drop a file whose row was written but whose bytes never reached the
    /// final key, so no row outlives its object.
    async fn forget_file(&self, auth: AuthenticatedCall, name: &str, key: &str) {
        self.discard_object(key).await;
        match self.storage.get_file_by_name(auth.user_id, name).await {
            Ok(Some(meta)) => {
                if let Err(e) = self.storage.remove_file(auth.user_id, meta.id).await {
                    warn!(file = %name, error = %e, "failed to remove file info after failed upload");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(file = %name, error = %e, "failed to look up file info after failed upload"),
        }
    }

    async fn find_file(&self, auth: AuthenticatedCall, req: &DownloadRequest) -> Result<FileMetadata> {
        let name = req.name.trim();
        let found = if !name.is_empty() {
            self.storage.get_file_by_name(auth.user_id, name).await
        } else if req.id > 0 {
            self.storage.get_file(auth.user_id, req.id).await
        } else {
            return Err(KeeperError::invalid("file name or id is required"));
        };
        found
            .map_err(failure("error getting file info"))?
            .ok_or_else(|| KeeperError::not_found("file not found"))
    }

    pub(crate) async fn download(
        &self,
        auth: AuthenticatedCall,
        req: DownloadRequest,
        mut sink: Box<dyn MessageSink<DownloadChunk>>,
    ) -> Result<DownloadResponse> {
        let meta = self.find_file(auth, &req).await?;
        let key = object_key(auth.user_id, &meta.name);
        let mut reader = self
            .blobs
            .get_object(&meta.bucket, &key)
            .await
            .map_err(failure("error getting file"))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = read_chunk(&mut reader, &mut buf)
                .await
                .map_err(failure("error reading file"))?;
            if n == 0 {
                break;
            }
            total += n as u64;
            sink.send(DownloadChunk {
                chunk: buf[..n].to_vec(),
                name: meta.name.clone(),
                content_type: meta.content_type.clone(),
                description: meta.description.clone(),
            })
            .await?;
            if n < buf.len() {
                break;
            }
        }

        info!(user_id = auth.user_id, file = %meta.name, size = total, "file downloaded");
        Ok(DownloadResponse {
            name: meta.name,
            size: total,
        })
    }

    pub(crate) async fn get_files(&self, auth: AuthenticatedCall) -> Result<FilesResponse> {
        let files = self
            .storage
            .get_files(auth.user_id)
            .await
            .map_err(failure("error get files"))?;
        Ok(FilesResponse {
            files: files.into_iter().map(file_info).collect(),
        })
    }

    pub(crate) async fn remove_file(&self, auth: AuthenticatedCall, req: IdRequest) -> Result<Empty> {
        if req.id <= 0 {
            return Err(KeeperError::invalid("invalid id"));
        }
        let meta = self
            .storage
            .get_file(auth.user_id, req.id)
            .await
            .map_err(failure("error getting file info"))?
            .ok_or_else(|| KeeperError::not_found("file not found"))?;

        self.blobs
            .remove_object(&meta.bucket, &object_key(auth.user_id, &meta.name), true)
            .await
            .map_err(failure("error removing file"))?;
        self.storage
            .remove_file(auth.user_id, meta.id)
            .await
            .map_err(failure("error removing file info"))?;

        info!(user_id = auth.user_id, file = %meta.name, "file removed");
        Ok(Empty {})
    }
}
