//! Server configuration.

pub mod settings;

pub use settings::{Overrides, Settings};
