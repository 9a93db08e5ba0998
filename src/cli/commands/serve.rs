//! `secretkeeper serve`: run the server.

use tracing::info;

use crate::cli::{init_logging, load_settings, Cli, ServeArgs};
use crate::errors::Result;

/// Execute the `serve` command.
pub async fn execute(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let settings = load_settings(cli, args)?;
    init_logging(&settings.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting secretkeeper");

    crate::app::run(settings, shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
