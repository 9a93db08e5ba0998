use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::crypto::{verify_body, SecretKey};
use crate::errors::{KeeperError, Result};
use crate::rpc::call::{Call, HASH_KEY};
use crate::rpc::chain::{Interceptor, Next};

/// Bytes the integrity tag is computed over: compact JSON with object
/// keys in sorted order.
pub fn canonical_body(body: &Value) -> Result<Vec<u8>> {
    // serde_json's default map is a BTreeMap, so keys serialize sorted.
    Ok(serde_json::to_vec(body)?)
}

/// Verifies the `HashSHA256` tag of each call body.  Without a key every
/// call passes through untouched.
#[derive(Debug, Clone, Default)]
pub struct IntegrityInterceptor {
    key: Option<SecretKey>,
}

impl IntegrityInterceptor {
    pub fn new(key: Option<SecretKey>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }

    fn check(&self, call: &Call) -> Result<()> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        let tag = call
            .metadata(HASH_KEY)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| KeeperError::denied("missing hash"))?;
        let body = canonical_body(&call.body)?;
        verify_body(key.as_bytes(), &body, tag).map_err(|e| {
            debug!(method = %call.method, "integrity tag mismatch");
            e
        })
    }
}

#[async_trait]
impl Interceptor for IntegrityInterceptor {
    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Value> {
        self.check(&call)?;
        next.run(call).await
    }
}
