//! Listener lifecycle: bind, optionally wrap in TLS, accept connections,
//! and drive graceful start/stop plus config reload on SIGHUP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::queue::WorkerPool;

/// How long `Stop` waits for the HTTP-level shutdown before giving up on
/// graceful drain and moving straight to the wait-group join.
pub const HTTP_SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(300);

enum Transport {
    Plain,
    Tls(TlsAcceptor),
}

/// The running server: owns the listener socket, the worker pool, and the
/// set of in-flight connection tasks.
pub struct Server {
    local_addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    connections: Arc<tokio::sync::Mutex<tokio::task::JoinSet<()>>>,
    pool: Option<WorkerPool>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    /// Bind and start serving. Resolves once the bind outcome (success or
    /// failure) is known; serving continues in the background afterward.
    pub async fn start(config: &ServerConfig) -> Result<Self, rc_core::RcError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(rc_core::RcError::BindFailure)?;
        let local_addr = listener
            .local_addr()
            .map_err(rc_core::RcError::BindFailure)?;
        tracing::info!(listen_address = %local_addr, "server started");

        let transport = build_transport(config)?;
        let pool = WorkerPool::start();
        let queue = pool.queue();
        let cert_dir = PathBuf::from(&config.cert_dir);
        let shutdown = CancellationToken::new();
        let connections = Arc::new(tokio::sync::Mutex::new(tokio::task::JoinSet::new()));

        let accept_shutdown = shutdown.clone();
        let accept_connections = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    biased;
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                        continue;
                    }
                };
                tracing::debug!(%peer, "accepted connection");

                let queue = queue.clone();
                let cert_dir = cert_dir.clone();
                let conn_shutdown = accept_shutdown.clone();
                let transport = match &transport {
                    Transport::Plain => None,
                    Transport::Tls(acceptor) => Some(acceptor.clone()),
                };

                let mut connections = accept_connections.lock().await;
                connections.spawn(async move {
                    match transport {
                        None => {
                            crate::connection::handle(stream, cert_dir, queue, conn_shutdown).await
                        }
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                crate::connection::handle(
                                    tls_stream,
                                    cert_dir,
                                    queue,
                                    conn_shutdown,
                                )
                                .await
                            }
                            Err(e) => tracing::warn!(error = %e, "tls handshake failed"),
                        },
                    }
                });
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            connections,
            pool: Some(pool),
            accept_task: Some(accept_task),
        })
    }

    /// The address actually bound — useful when `config.port == 0` asks
    /// for an OS-assigned ephemeral port.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Graceful shutdown: stop accepting, drain in-flight connections and
    /// workers, bounded by [`HTTP_SERVER_STOP_TIMEOUT`]. Connections still
    /// running a command finish it and close on their own once `shutdown`
    /// is cancelled; any that don't make it within the deadline are
    /// aborted so `stop` always returns.
    pub async fn stop(mut self) {
        self.shutdown.cancel();

        if let Some(accept_task) = self.accept_task.take() {
            let _ = tokio::time::timeout(HTTP_SERVER_STOP_TIMEOUT, accept_task).await;
        }

        tracing::debug!("waiting for commands to finish running");
        {
            let mut connections = self.connections.lock().await;
            let drain = async { while connections.join_next().await.is_some() {} };
            if tokio::time::timeout(HTTP_SERVER_STOP_TIMEOUT, drain)
                .await
                .is_err()
            {
                tracing::warn!("connections still running past the stop deadline, aborting");
                connections.abort_all();
                while connections.join_next().await.is_some() {}
            }
        }

        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }
}

fn build_transport(config: &ServerConfig) -> Result<Transport, rc_core::RcError> {
    if config.tls_cert_file.is_empty() || config.tls_key_file.is_empty() {
        return Ok(Transport::Plain);
    }

    let certs = load_certs(&config.tls_cert_file)?;
    let key = load_key(&config.tls_key_file)?;

    let tls_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| rc_core::RcError::ConfigInvalid(format!("invalid TLS material: {e}")))?;

    Ok(Transport::Tls(TlsAcceptor::from(Arc::new(tls_config))))
}

fn load_certs(
    path: &str,
) -> Result<Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>, rc_core::RcError> {
    let file = std::fs::File::open(path)
        .map_err(|e| rc_core::RcError::ConfigInvalid(format!("reading {path}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| rc_core::RcError::ConfigInvalid(format!("parsing {path}: {e}")))
}

fn load_key(
    path: &str,
) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, rc_core::RcError> {
    let file = std::fs::File::open(path)
        .map_err(|e| rc_core::RcError::ConfigInvalid(format!("reading {path}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| rc_core::RcError::ConfigInvalid(format!("parsing {path}: {e}")))?
        .ok_or_else(|| rc_core::RcError::ConfigInvalid(format!("no private key found in {path}")))
}
