//! remote-control — runs the service that allows clients to execute
//! remote shell commands using the rc protocol.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use rc_server::config::{Cli, ServerConfig};
use rc_server::listener::Server;

/// Handle onto the live `EnvFilter` layer, letting `SIGHUP` change the log
/// level without rebuilding the whole subscriber (which `tracing`'s global
/// dispatcher only accepts once per process).
type LogHandle = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_file = cli.config_file.clone();
    let config = cli.resolve();

    let log_handle = init_logging(&config.log_level);

    if !config.pid_file.is_empty()
        && let Err(e) = write_pid_file(&config.pid_file)
    {
        tracing::error!(error = %e, "failed to write pid file");
    }

    let server = match Server::start(&config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    run_until_shutdown(server, config_file, log_handle).await;
}

async fn run_until_shutdown(server: Server, config_file: String, log_handle: LogHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP");

        loop {
            tokio::select! {
                _ = sigint.recv() => { tracing::info!("received SIGINT, shutting down"); break; }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM, shutting down"); break; }
                _ = sighup.recv() => {
                    tracing::info!("received SIGHUP, reloading configuration");
                    reload(&config_file, &log_handle);
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = config_file;
        let _ = log_handle;
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }

    server.stop().await;
}

/// Re-read the config file and re-apply the log level. Listener rebinding
/// on address change and in-flight command preservation are handled by the
/// caller keeping the existing `Server` alive; only the log level is live
/// here, matching the external-interfaces contract that in-flight commands
/// are left untouched.
fn reload(config_file: &str, log_handle: &LogHandle) {
    if config_file.is_empty() {
        return;
    }
    let reloaded = ServerConfig::load(&PathBuf::from(config_file));
    if let Err(e) = log_handle.modify(|filter| *filter = build_filter(&reloaded.log_level)) {
        tracing::error!(error = %e, "failed to reload log level");
        return;
    }
    tracing::info!(log_level = %reloaded.log_level, "configuration reloaded");
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_logging(level: &str) -> LogHandle {
    let (filter, handle) = reload::Layer::new(build_filter(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::default())
        .try_init();
    handle
}

fn write_pid_file(path: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    writeln!(file, "{}", std::process::id())
}
