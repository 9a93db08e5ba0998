//! Filesystem blob store: one directory per bucket under a root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::{account, check_key, finish, BlobGateway, BlobReader};
use crate::errors::{KeeperError, Result};

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        check_key(bucket)?;
        if bucket.contains('/') {
            return Err(KeeperError::Blob(format!("invalid bucket name '{bucket}'")));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        let mut path = self.bucket_dir(bucket)?;
        for seg in key.split('/') {
            path.push(seg);
        }
        Ok(path)
    }
}

fn blob_err(action: &str, path: &Path, e: std::io::Error) -> KeeperError {
    KeeperError::Blob(format!("{action} {}: {e}", path.display()))
}

#[async_trait]
impl BlobGateway for FsBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| blob_err("create bucket", &dir, e))?;
        debug!(bucket, "bucket ready");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut source: mpsc::Receiver<Vec<u8>>,
        size: u64,
    ) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| blob_err("create", parent, e))?;
        }

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| blob_err("create", &path, e))?;

        let mut written = 0u64;
        while let Some(chunk) = source.recv().await {
            account(&mut written, chunk.len(), size)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| blob_err("write", &path, e))?;
        }
        file.flush()
            .await
            .map_err(|e| blob_err("flush", &path, e))?;

        finish(written, size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<BlobReader> {
        let path = self.object_path(bucket, key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| blob_err("open", &path, e))?;
        Ok(Box::new(file))
    }

    async fn remove_object(&self, bucket: &str, key: &str, force: bool) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if force && e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(blob_err("remove", &path, e)),
        }
    }

    async fn promote_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        let source = self.object_path(bucket, from)?;
        let target = self.object_path(bucket, to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| blob_err("create", parent, e))?;
        }
        fs::rename(&source, &target)
            .await
            .map_err(|e| blob_err("promote", &source, e))
    }
}
