//! The three stages every call passes through, outermost first:
//! logging, integrity, authentication.

mod auth;
mod integrity;
mod logging;

pub use auth::AuthInterceptor;
pub use integrity::{canonical_body, IntegrityInterceptor};
pub use logging::LoggingInterceptor;
