//! rc — fan out a shell command to one or many `remote-control` hosts.

mod config;
mod fanout;
mod output;
mod session;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Cli, Target};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.resolve();

    init_logging(&config.log_level);

    let exit_code = match cli.target() {
        Target::SingleHost { host, command } => fanout::run_single(&config, &host, &command).await,
        Target::Streaming { command } => {
            fanout::run_streaming(&config, &command, tokio::io::stdin()).await
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
