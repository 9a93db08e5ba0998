//! Call model and interceptor chain shared by the server and its
//! handlers.

pub mod call;
pub mod chain;
pub mod interceptors;
pub mod messages;
pub mod method;

use std::sync::Arc;

use crate::crypto::SecretKey;
use crate::token::TokenService;

pub use call::{
    AuthenticatedCall, Call, MessageSink, MessageSource, Metadata, Streams, HASH_KEY, TOKEN_KEY,
};
pub use chain::{Endpoint, Interceptor, Next, Pipeline};
pub use interceptors::{canonical_body, AuthInterceptor, IntegrityInterceptor, LoggingInterceptor};
pub use method::{CallKind, Method};

/// Compose the standard chain: logging, integrity, authentication, then
/// `endpoint`.
pub fn secured_pipeline(
    endpoint: Arc<dyn Endpoint>,
    hash_key: Option<SecretKey>,
    tokens: Arc<TokenService>,
) -> Pipeline {
    Pipeline::new(endpoint)
        .with(LoggingInterceptor)
        .with(IntegrityInterceptor::new(hash_key))
        .with(AuthInterceptor::new(tokens))
}
