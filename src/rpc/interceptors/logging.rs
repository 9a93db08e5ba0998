use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{Code, Result};
use crate::rpc::call::Call;
use crate::rpc::chain::{Interceptor, Next};

/// Records method, duration and final status of every call.  Never
/// changes the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Value> {
        let method = call.method;
        let started = Instant::now();

        let result = next.run(call).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => info!(%method, elapsed_ms, status = %Code::Ok, "call finished"),
            Err(e) => warn!(%method, elapsed_ms, status = %e.code(), error = %e, "call failed"),
        }
        result
    }
}
