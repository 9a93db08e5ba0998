//! Blob gateway: object storage for uploaded file bytes.
//!
//! Objects are addressed by `(bucket, key)`.  Keys produced by
//! [`object_key`] are `"{user_id}/{name}"`, so two users can store files
//! with the same name.
//!
//! Uploads are written under a [`staging_key`] and only promoted to the
//! final key once complete, so a failed upload never touches a file that
//! is already stored.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::errors::{KeeperError, Result};
use crate::storage::UserId;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Readable body of a stored object.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Create the bucket if it does not exist.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Write an object from the chunks arriving on `source` until the
    /// sender side closes.  Returns the number of bytes written.
    ///
    /// Fails with [`KeeperError::SizeMismatch`] as soon as more than `size`
    /// bytes arrive, or at the end if fewer did.  Returning early drops
    /// `source`, which unblocks whoever feeds it.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: mpsc::Receiver<Vec<u8>>,
        size: u64,
    ) -> Result<u64>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<BlobReader>;

    /// Delete an object.  With `force`, a missing object is not an error.
    async fn remove_object(&self, bucket: &str, key: &str, force: bool) -> Result<()>;

    /// Move a finished object to `to`, replacing whatever is stored there.
    async fn promote_object(&self, bucket: &str, from: &str, to: &str) -> Result<()>;
}

/// Key under which a user's file is stored.
pub fn object_key(user_id: UserId, name: &str) -> String {
    format!("{user_id}/{name}")
}

/// Key an in-progress upload is written under.  The leading segment can
/// never be a user id, and the random suffix keeps concurrent uploads of
/// the same name apart.
pub fn staging_key(user_id: UserId, name: &str) -> String {
    format!(".staging/{user_id}/{name}.{:016x}", rand::random::<u64>())
}

/// Reject keys that could escape the bucket.
pub(crate) fn check_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(KeeperError::Blob(format!("invalid object key '{key}'")));
    }
    Ok(())
}

/// Track bytes written so far and fail fast when the declared size is
/// exceeded.
pub(crate) fn account(written: &mut u64, chunk_len: usize, size: u64) -> Result<()> {
    *written += chunk_len as u64;
    if *written > size {
        return Err(KeeperError::SizeMismatch {
            declared: size,
            written: *written,
        });
    }
    Ok(())
}

pub(crate) fn finish(written: u64, size: u64) -> Result<u64> {
    if written != size {
        return Err(KeeperError::SizeMismatch {
            declared: size,
            written,
        });
    }
    Ok(written)
}

/// Fill `buf` unless the reader runs dry first.  Returns bytes read.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_is_user_scoped() {
        assert_eq!(object_key(7, "a.txt"), "7/a.txt");
    }

    #[test]
    fn staging_keys_are_unique_and_valid() {
        let a = staging_key(7, "a.txt");
        let b = staging_key(7, "a.txt");
        assert_ne!(a, b);
        assert!(a.starts_with(".staging/7/a.txt."));
        assert!(check_key(&a).is_ok());
        assert_ne!(a.split('/').next(), Some("7"));
    }

    #[test]
    fn check_key_rejects_traversal() {
        assert!(check_key("1/a.txt").is_ok());
        assert!(check_key("1/../a").is_err());
        assert!(check_key("/etc/passwd").is_err());
        assert!(check_key("1\\a").is_err());
        assert!(check_key("").is_err());
    }

    #[test]
    fn account_fails_fast_on_overflow() {
        let mut written = 0;
        account(&mut written, 4, 5).unwrap();
        assert!(account(&mut written, 2, 5).is_err());
    }

    #[tokio::test]
    async fn read_chunk_fills_buffer() {
        let mut reader = std::io::Cursor::new(vec![7u8; 2500]);
        let mut buf = vec![0u8; 1024];
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 1024);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 1024);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 452);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[test]
    fn finish_reports_short_write() {
        let err = finish(3, 5).unwrap_err();
        assert!(matches!(
            err,
            KeeperError::SizeMismatch {
                declared: 5,
                written: 3
            }
        ));
    }
}
