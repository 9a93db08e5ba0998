//! Ordered interceptor chain.
//!
//! A [`Pipeline`] is composed once at startup from a list of interceptors
//! and an endpoint.  Each interceptor receives the call plus a [`Next`]
//! handle; calling `next.run(call)` hands control to the rest of the
//! chain, and not calling it short-circuits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::call::Call;
use crate::errors::Result;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Value>;
}

/// The innermost stage: routes a call to its handler.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, call: Call) -> Result<Value>;
}

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Interceptor>],
    endpoint: &'a dyn Endpoint,
}

impl Next<'_> {
    pub async fn run(self, call: Call) -> Result<Value> {
        match self.stack.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    stack: rest,
                    endpoint: self.endpoint,
                };
                head.intercept(call, next).await
            }
            None => self.endpoint.handle(call).await,
        }
    }
}

pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Pipeline {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            interceptors: Vec::new(),
            endpoint,
        }
    }

    /// Append an interceptor.  Interceptors run in the order added, the
    /// first one outermost.
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub async fn dispatch(&self, call: Call) -> Result<Value> {
        Next {
            stack: &self.interceptors,
            endpoint: self.endpoint.as_ref(),
        }
        .run(call)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeeperError;
    use crate::rpc::Method;
    use serde_json::json;
    use std::sync::Mutex;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Record {
        async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Value> {
            self.log.lock().unwrap().push(format!("{} in", self.name));
            let out = next.run(call).await;
            self.log.lock().unwrap().push(format!("{} out", self.name));
            out
        }
    }

    struct Reject;

    #[async_trait]
    impl Interceptor for Reject {
        async fn intercept(&self, _call: Call, _next: Next<'_>) -> Result<Value> {
            Err(KeeperError::denied("stop"))
        }
    }

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn handle(&self, call: Call) -> Result<Value> {
            Ok(call.body)
        }
    }

    #[tokio::test]
    async fn interceptors_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(Echo))
            .with(Record {
                name: "a",
                log: log.clone(),
            })
            .with(Record {
                name: "b",
                log: log.clone(),
            });

        let out = pipeline
            .dispatch(Call::new(Method::Echo, json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(out, json!({"message": "hi"}));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a in", "b in", "b out", "a out"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let pipeline = Pipeline::new(Arc::new(Echo)).with(Reject);
        let err = pipeline
            .dispatch(Call::new(Method::Echo, json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stop");
    }
}
