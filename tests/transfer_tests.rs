//! File upload, download, listing and removal through the full chain.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use secretkeeper::blob::{object_key, BlobGateway, BlobReader, MemoryBlobStore};
use secretkeeper::errors::{Code, KeeperError, Result};
use secretkeeper::rpc::messages::{
    DownloadChunk, DownloadRequest, DownloadResponse, FilesResponse, IdRequest, UploadRequest,
    UploadResponse,
};
use secretkeeper::rpc::{Call, Method, Streams, TOKEN_KEY};
use secretkeeper::service::DEFAULT_BUCKET;
use secretkeeper::storage::SqliteStorage;

use common::{payload, Harness};

fn first(name: &str, size: u64, chunk: Vec<u8>) -> UploadRequest {
    UploadRequest {
        name: name.into(),
        size,
        content_type: String::new(),
        description: "test file".into(),
        chunk,
    }
}

fn by_name(name: &str) -> DownloadRequest {
    DownloadRequest {
        name: name.into(),
        id: 0,
    }
}

fn joined(chunks: &[DownloadChunk]) -> Vec<u8> {
    chunks.iter().flat_map(|c| c.chunk.iter().copied()).collect()
}

async fn upload_whole(h: &Harness, token: &str, name: &str, data: &[u8]) -> UploadResponse {
    let reply = h
        .upload(token, first(name, data.len() as u64, data.to_vec()), Vec::new())
        .await
        .expect("upload");
    serde_json::from_value(reply).expect("upload response")
}

async fn files(h: &Harness, token: &str) -> FilesResponse {
    h.call(Some(token), Method::GetFiles, &json!({}))
        .await
        .expect("get files")
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_byte_file_round_trips() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    let reply = upload_whole(&h, &token, "empty.txt", b"").await;
    assert_eq!(reply.size, 0);

    let listed = files(&h, &token).await.files;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 0);

    let (reply, chunks) = h.download(&token, &by_name("empty.txt")).await.expect("download");
    let reply: DownloadResponse = serde_json::from_value(reply).expect("decode");
    assert_eq!(reply.size, 0);
    assert!(joined(&chunks).is_empty());
}

#[tokio::test]
async fn zero_declared_size_with_bytes_is_compensated() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let err = h
        .upload(&token, first("sneaky.bin", 0, b"abc".to_vec()), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn upload_without_first_message_is_empty_file() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<UploadRequest>>(1);
    drop(tx);
    let call = Call::new(Method::Upload, Value::Null)
        .with_metadata(TOKEN_KEY, token.as_str())
        .with_streams(Streams::Upload(Box::new(rx)));
    let err = h.pipeline.dispatch(call).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.to_string(), "empty file");
}

#[tokio::test]
async fn missing_name_is_rejected() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let err = h
        .upload(&token, first("  ", 3, b"abc".to_vec()), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn path_like_names_are_rejected() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    for name in ["../escape", "dir/file", ".."] {
        let err = h
            .upload(&token, first(name, 3, b"abc".to_vec()), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "name {name:?}");
    }
    assert_eq!(h.blobs.object_count(), 0);
}

#[tokio::test]
async fn upload_in_several_messages_is_stored_whole() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let data = payload(3000);

    let reply = h
        .upload(
            &token,
            first("big.bin", 3000, data[..1000].to_vec()),
            vec![data[1000..2000].to_vec(), data[2000..].to_vec()],
        )
        .await
        .expect("upload");
    let reply: UploadResponse = serde_json::from_value(reply).expect("decode");
    assert_eq!(reply.name, "big.bin");
    assert_eq!(reply.size, 3000);

    let user_id = h.user_id(&token);
    assert!(h.blobs.contains(DEFAULT_BUCKET, &object_key(user_id, "big.bin")));

    let listed = files(&h, &token).await.files;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "big.bin");
    assert_eq!(listed[0].size, 3000);
    assert_eq!(listed[0].description, "test file");
}

#[tokio::test]
async fn first_message_may_carry_no_bytes() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    h.upload(&token, first("late.txt", 4, Vec::new()), vec![b"data".to_vec()])
        .await
        .expect("upload");
    let (_, chunks) = h.download(&token, &by_name("late.txt")).await.expect("download");
    assert_eq!(joined(&chunks), b"data");
}

#[tokio::test]
async fn short_upload_is_compensated() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    let err = h
        .upload(&token, first("short.bin", 200, payload(100)), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.to_string(), "failed to upload file");

    let user_id = h.user_id(&token);
    assert!(!h.blobs.contains(DEFAULT_BUCKET, &object_key(user_id, "short.bin")));
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_compensated() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    let err = h
        .upload(
            &token,
            first("long.bin", 50, payload(40)),
            vec![payload(40), payload(40)],
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to upload file");
    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn reupload_replaces_metadata() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    upload_whole(&h, &token, "doc.txt", b"version one").await;
    upload_whole(&h, &token, "doc.txt", b"v2").await;

    let listed = files(&h, &token).await.files;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 2);

    let (_, chunks) = h.download(&token, &by_name("doc.txt")).await.expect("download");
    assert_eq!(joined(&chunks), b"v2");
}

#[tokio::test]
async fn content_type_is_stored_and_returned() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    upload_whole(&h, &token, "blob.bin", b"raw").await;
    let mut typed = first("page.html", 6, b"<html>".to_vec());
    typed.content_type = "text/html".into();
    h.upload(&token, typed, Vec::new()).await.expect("upload");

    let listed = files(&h, &token).await.files;
    let types: Vec<_> = listed.iter().map(|f| f.content_type.as_str()).collect();
    assert_eq!(types, vec!["application/octet-stream", "text/html"]);

    let (_, chunks) = h.download(&token, &by_name("page.html")).await.expect("download");
    assert!(chunks.iter().all(|c| c.content_type == "text/html"));
}

#[tokio::test]
async fn failed_reupload_keeps_stored_file() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    upload_whole(&h, &token, "doc.txt", b"hello").await;

    let err = h
        .upload(&token, first("doc.txt", 10, b"abc".to_vec()), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to upload file");

    let listed = files(&h, &token).await.files;
    assert_eq!(listed.len(), 1);
    assert_eq!((listed[0].name.as_str(), listed[0].size), ("doc.txt", 5));
    assert_eq!(h.blobs.object_count(), 1);

    let (_, chunks) = h.download(&token, &by_name("doc.txt")).await.expect("download");
    assert_eq!(joined(&chunks), b"hello");
}

// ---------------------------------------------------------------------------
// Upload failures
// ---------------------------------------------------------------------------

/// Blob gateway over a [`MemoryBlobStore`] that can be told to fail.
#[derive(Default)]
struct FaultyBlobs {
    inner: MemoryBlobStore,
    fail_write: bool,
    fail_remove: bool,
    fail_promote: bool,
}

#[async_trait]
impl BlobGateway for FaultyBlobs {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.inner.ensure_bucket(bucket).await
    }

    /// With `fail_write`, stores the first chunk and then reports an error,
    /// leaving a partial object behind.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut source: mpsc::Receiver<Vec<u8>>,
        size: u64,
    ) -> Result<u64> {
        if !self.fail_write {
            return self.inner.put_object(bucket, key, source, size).await;
        }
        let chunk = source.recv().await.unwrap_or_default();
        let len = chunk.len() as u64;
        let (tx, rx) = mpsc::channel(1);
        tx.send(chunk).await.expect("queue chunk");
        drop(tx);
        self.inner.put_object(bucket, key, rx, len).await?;
        Err(KeeperError::Blob("disk full".into()))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<BlobReader> {
        self.inner.get_object(bucket, key).await
    }

    async fn remove_object(&self, bucket: &str, key: &str, force: bool) -> Result<()> {
        if self.fail_remove {
            return Err(KeeperError::Blob("remove refused".into()));
        }
        self.inner.remove_object(bucket, key, force).await
    }

    async fn promote_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        if self.fail_promote {
            return Err(KeeperError::Blob("rename refused".into()));
        }
        self.inner.promote_object(bucket, from, to).await
    }
}

async fn faulty_harness(faults: FaultyBlobs) -> Harness {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open db"));
    let blobs = faults.inner.clone();
    common::assemble(storage, blobs, Arc::new(faults), None, true).await
}

#[tokio::test]
async fn stream_error_mid_upload_is_compensated() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;

    let err = h
        .upload_messages(
            &token,
            first("cut.bin", 300, payload(100)),
            vec![
                Ok(UploadRequest::chunk(payload(100))),
                Err(KeeperError::Transport("connection reset".into())),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.to_string(), "failed to upload file");
    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn blob_write_error_is_compensated() {
    let h = faulty_harness(FaultyBlobs {
        fail_write: true,
        ..FaultyBlobs::default()
    })
    .await;
    let token = h.login("u", "p").await;

    let err = h
        .upload(&token, first("w.bin", 200, payload(100)), vec![payload(100)])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to upload file");
    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn failed_compensation_still_reports_internal() {
    let h = faulty_harness(FaultyBlobs {
        fail_write: true,
        fail_remove: true,
        ..FaultyBlobs::default()
    })
    .await;
    let token = h.login("u", "p").await;

    let err = h
        .upload(&token, first("stuck.bin", 200, payload(100)), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.to_string(), "failed to upload file");
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn failed_promotion_leaves_no_row() {
    let h = faulty_harness(FaultyBlobs {
        fail_promote: true,
        ..FaultyBlobs::default()
    })
    .await;
    let token = h.login("u", "p").await;

    let err = h
        .upload(&token, first("p.bin", 3, b"abc".to_vec()), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to upload file");
    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());
}

#[tokio::test]
async fn metadata_failure_removes_object() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("keeper.db");
    let storage = Arc::new(SqliteStorage::open(&path).expect("open db"));
    let blobs = MemoryBlobStore::new();
    let h = common::assemble(storage, blobs.clone(), Arc::new(blobs), None, true).await;
    let token = h.login("u", "p").await;
    upload_whole(&h, &token, "kept.txt", b"original").await;

    rusqlite::Connection::open(&path)
        .expect("second connection")
        .execute_batch(
            "CREATE TRIGGER refuse_insert BEFORE INSERT ON files
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;
             CREATE TRIGGER refuse_update BEFORE UPDATE ON files
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .expect("install triggers");

    for name in ["new.txt", "kept.txt"] {
        let err = h
            .upload(&token, first(name, 3, b"abc".to_vec()), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to upload file", "{name}");
    }

    // Only the first upload's object survives, with its row and bytes.
    assert_eq!(h.blobs.object_count(), 1);
    let listed = files(&h, &token).await.files;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 8);
    let (_, chunks) = h.download(&token, &by_name("kept.txt")).await.expect("download");
    assert_eq!(joined(&chunks), b"original");
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

async fn chunk_sizes(len: usize) -> Vec<usize> {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let data = payload(len);
    upload_whole(&h, &token, "f.bin", &data).await;

    let (reply, chunks) = h.download(&token, &by_name("f.bin")).await.expect("download");
    let reply: DownloadResponse = serde_json::from_value(reply).expect("decode");
    assert_eq!(reply.size, len as u64);

    assert_eq!(joined(&chunks), data);
    assert!(chunks.iter().all(|c| c.name == "f.bin" && c.description == "test file"));
    chunks.iter().map(|c| c.chunk.len()).collect()
}

#[tokio::test]
async fn file_smaller_than_a_chunk_arrives_in_one() {
    assert_eq!(chunk_sizes(100).await, vec![100]);
}

#[tokio::test]
async fn file_of_exactly_one_chunk_arrives_in_one() {
    assert_eq!(chunk_sizes(1024).await, vec![1024]);
}

#[tokio::test]
async fn larger_file_is_split_into_full_chunks() {
    assert_eq!(chunk_sizes(3000).await, vec![1024, 1024, 952]);
}

#[tokio::test]
async fn download_by_id_when_name_is_blank() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    upload_whole(&h, &token, "by-id.txt", b"hello").await;
    let id = files(&h, &token).await.files[0].id;

    let (_, chunks) = h
        .download(&token, &DownloadRequest { name: String::new(), id })
        .await
        .expect("download");
    assert_eq!(joined(&chunks), b"hello");
}

#[tokio::test]
async fn download_needs_name_or_id() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let err = h
        .download(&token, &DownloadRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let err = h.download(&token, &by_name("nope")).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.to_string(), "file not found");
}

#[tokio::test]
async fn other_users_files_are_invisible() {
    let h = common::harness().await;
    let alice = h.login("alice", "p").await;
    let bob = h.login("bob", "p").await;
    upload_whole(&h, &alice, "private.txt", b"mine").await;

    let err = h.download(&bob, &by_name("private.txt")).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(files(&h, &bob).await.files.is_empty());

    let id = files(&h, &alice).await.files[0].id;
    let err = h
        .call::<_, Value>(Some(&bob), Method::RemoveFile, &IdRequest { id })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(files(&h, &alice).await.files.len(), 1);
}

#[tokio::test]
async fn same_name_for_two_users_is_two_objects() {
    let h = common::harness().await;
    let alice = h.login("alice", "p").await;
    let bob = h.login("bob", "p").await;
    upload_whole(&h, &alice, "notes.txt", b"alice").await;
    upload_whole(&h, &bob, "notes.txt", b"bob").await;

    assert_eq!(h.blobs.object_count(), 2);
    let (_, chunks) = h.download(&bob, &by_name("notes.txt")).await.expect("download");
    assert_eq!(joined(&chunks), b"bob");
}

// ---------------------------------------------------------------------------
// Removal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_file_deletes_object_and_metadata() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    upload_whole(&h, &token, "gone.txt", b"bye").await;
    let id = files(&h, &token).await.files[0].id;

    let _: Value = h
        .call(Some(&token), Method::RemoveFile, &IdRequest { id })
        .await
        .expect("remove");

    assert_eq!(h.blobs.object_count(), 0);
    assert!(files(&h, &token).await.files.is_empty());

    let err = h
        .call::<_, Value>(Some(&token), Method::RemoveFile, &IdRequest { id })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn remove_file_rejects_non_positive_id() {
    let h = common::harness().await;
    let token = h.login("u", "p").await;
    let err = h
        .call::<_, Value>(Some(&token), Method::RemoveFile, &IdRequest { id: 0 })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.to_string(), "invalid id");
}
