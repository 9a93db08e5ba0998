//! In-memory blob store for tests and embedders.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{account, check_key, finish, BlobGateway, BlobReader};
use crate::errors::{KeeperError, Result};

type Buckets = HashMap<String, HashMap<String, Vec<u8>>>;

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    buckets: Arc<Mutex<Buckets>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Buckets>> {
        self.buckets
            .lock()
            .map_err(|_| KeeperError::Blob("blob store lock poisoned".into()))
    }

    /// Whether an object exists.
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .map(|b| b.get(bucket).is_some_and(|objs| objs.contains_key(key)))
            .unwrap_or(false)
    }

    /// Number of objects stored across all buckets.
    pub fn object_count(&self) -> usize {
        self.lock()
            .map(|b| b.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobGateway for MemoryBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.lock()?.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut source: mpsc::Receiver<Vec<u8>>,
        size: u64,
    ) -> Result<u64> {
        check_key(key)?;
        if !self.lock()?.contains_key(bucket) {
            return Err(KeeperError::Blob(format!("bucket '{bucket}' does not exist")));
        }

        // Partial writes stay visible, as with a streaming object store.
        let mut data = Vec::new();
        let mut written = 0u64;
        let mut outcome = Ok(());
        while let Some(chunk) = source.recv().await {
            data.extend_from_slice(&chunk);
            if let Err(e) = account(&mut written, chunk.len(), size) {
                outcome = Err(e);
                break;
            }
        }
        self.store(bucket, key, data)?;
        outcome?;
        finish(written, size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<BlobReader> {
        let data = self
            .lock()?
            .get(bucket)
            .and_then(|objs| objs.get(key))
            .cloned()
            .ok_or_else(|| KeeperError::Blob(format!("object '{bucket}/{key}' not found")))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn remove_object(&self, bucket: &str, key: &str, force: bool) -> Result<()> {
        let removed = self
            .lock()?
            .get_mut(bucket)
            .and_then(|objs| objs.remove(key));
        if removed.is_none() && !force {
            return Err(KeeperError::Blob(format!("object '{bucket}/{key}' not found")));
        }
        Ok(())
    }

    async fn promote_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        check_key(to)?;
        let mut buckets = self.lock()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| KeeperError::Blob(format!("bucket '{bucket}' does not exist")))?;
        let data = objects
            .remove(from)
            .ok_or_else(|| KeeperError::Blob(format!("object '{bucket}/{from}' not found")))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }
}

impl MemoryBlobStore {
    fn store(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.lock()?
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data);
        Ok(())
    }
}
