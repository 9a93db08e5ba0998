use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{KeeperError, Result};
use crate::rpc::call::{Call, TOKEN_KEY};
use crate::rpc::chain::{Interceptor, Next};
use crate::token::TokenService;

/// Validates the `token` metadata and records the caller's identity on
/// the call.  Session setup methods skip the check.
#[derive(Clone)]
pub struct AuthInterceptor {
    tokens: Arc<TokenService>,
}

impl AuthInterceptor {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(&self, mut call: Call, next: Next<'_>) -> Result<Value> {
        if call.method.bypasses_auth() {
            return next.run(call).await;
        }

        let token = call
            .metadata(TOKEN_KEY)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| KeeperError::denied("missing token"))?;
        let user_id = self.tokens.validate(token)?;
        call.identity = Some(user_id);

        next.run(call).await
    }
}
