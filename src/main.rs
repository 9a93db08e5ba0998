use clap::Parser;
use secretkeeper::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(ref args) => secretkeeper::cli::commands::serve::execute(&cli, args).await,
        Commands::Keygen { length } => secretkeeper::cli::commands::keygen::execute(length),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
