//! Command-line interface: argument parsing and command implementations.

pub mod commands;

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Overrides, Settings};
use crate::errors::Result;

/// SecretKeeper: an authenticated vault for credentials, notes, cards and files.
#[derive(Parser, Debug)]
#[command(
    name = "secretkeeper",
    about = "Authenticated secrets vault server",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// All available subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the server until Ctrl-C or SIGTERM
    Serve(ServeArgs),

    /// Print a random key suitable for database_key, jwt_key or hash_key
    Keygen {
        /// Key length in characters: 16, 24 or 32
        #[arg(short, long, default_value = "32")]
        length: usize,
    },
}

/// Settings that can be given on the command line or through the
/// environment.  They take precedence over the config file.
#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on (e.g. 127.0.0.1:3200)
    #[arg(short, long, env = "SECRETKEEPER_ADDRESS")]
    pub address: Option<String>,

    /// Envelope key for stored secrets (16, 24 or 32 bytes)
    #[arg(long, env = "SECRETKEEPER_DATABASE_KEY", hide_env_values = true)]
    pub database_key: Option<String>,

    /// Token signing key
    #[arg(long, env = "SECRETKEEPER_JWT_KEY", hide_env_values = true)]
    pub jwt_key: Option<String>,

    /// Request integrity key (omit to disable integrity checks)
    #[arg(long, env = "SECRETKEEPER_HASH_KEY", hide_env_values = true)]
    pub hash_key: Option<String>,

    /// SQLite database file
    #[arg(long)]
    pub database_path: Option<PathBuf>,

    /// Directory for uploaded files
    #[arg(long)]
    pub blob_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (e.g. info, debug)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ServeArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            address: self.address.clone(),
            log_level: self.log_level.clone(),
            database_path: self.database_path.clone(),
            blob_dir: self.blob_dir.clone(),
            database_key: self.database_key.clone(),
            jwt_key: self.jwt_key.clone(),
            hash_key: self.hash_key.clone(),
        }
    }
}

/// Resolve settings: defaults, then the config file, then flags and
/// environment variables.
pub fn load_settings(cli: &Cli, args: &ServeArgs) -> Result<Settings> {
    let settings = Settings::load(cli.config.as_deref())?.with_overrides(args.overrides());
    settings.validate()?;
    Ok(settings)
}

/// Install the global tracing subscriber.  `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
