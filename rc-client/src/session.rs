//! Client session: dial the server, authenticate, and multiplex
//! correlated request/response pairs over a single duplex connection.
//!
//! Mirrors the split reader/writer task shape of a managed connection —
//! a background read loop is the sole reader of the socket, and
//! outstanding requests are tracked in a map keyed by message id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::Request;
use rc_core::{Message, MessageOptions, RcError, Response, SIGNATURE_HEADER_NAME};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message as WsMessage};

use crate::config::ClientConfig;

/// How long `stop` waits for the read loop to notice the close frame
/// before giving up and closing the socket anyway.
const STOP_TIMEOUT: Duration = Duration::from_secs(120);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Option<Response>>>>>;

/// A persistent duplex connection to a single `rc-server`, multiplexing
/// concurrent `Send` calls by message id.
///
/// Cheaply cloneable: the writer half and session bookkeeping are behind
/// an internal mutex / atomic, documenting (rather than merely assuming)
/// the single-writer discipline the wire protocol expects.
#[derive(Clone)]
pub struct Session {
    next_id: Arc<AtomicU32>,
    pending: PendingMap,
    writer: Arc<Mutex<Option<futures_util::stream::SplitSink<WsStream, WsMessage>>>>,
    done: Arc<tokio::sync::Notify>,
    read_loop: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Session {
    fn empty() -> Self {
        Self {
            next_id: Arc::new(AtomicU32::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            writer: Arc::new(Mutex::new(None)),
            done: Arc::new(tokio::sync::Notify::new()),
            read_loop: Arc::new(Mutex::new(None)),
        }
    }

    /// Dial `host:port`, authenticate with the configured key, and spawn
    /// the read loop. Returns an `Idle` session untouched on failure.
    pub async fn start(config: &ClientConfig, host: &str) -> Result<Self, RcError> {
        let session = Self::empty();

        let header = rc_core::create_sig(&config.key_name, &PathBuf::from(&config.key_dir))
            .map_err(|e| RcError::DialFailure(format!("building signature: {e}")))?;

        let scheme = if config.tls_disable { "ws" } else { "wss" };
        let url = format!("{scheme}://{host}:{}/", config.port);
        let request = Request::builder()
            .uri(&url)
            .header(SIGNATURE_HEADER_NAME, header)
            .header("Host", host)
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .map_err(|e| RcError::DialFailure(e.to_string()))?;

        let connector = config.tls_connector()?;
        let (ws, _response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
                .await
                .map_err(|e| RcError::DialFailure(e.to_string()))?;

        let (sink, mut stream) = ws.split();
        *session.writer.lock().await = Some(sink);

        let pending = session.pending.clone();
        let done = session.done.clone();
        let handle = tokio::spawn(async move {
            loop {
                let frame = match stream.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "read loop error");
                        break;
                    }
                    None => break,
                };

                let text = match frame {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };

                let response = match Response::from_frame(&text) {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode response");
                        continue;
                    }
                };

                let Ok(id) = response.id.parse::<u32>() else {
                    tracing::warn!(id = %response.id, "response carried a non-numeric id");
                    continue;
                };

                let mut pending = pending.lock().await;
                if let Some(sender) = pending.remove(&id) {
                    let _ = sender.send(Some(response));
                }
            }
            done.notify_waiters();
        });

        *session.read_loop.lock().await = Some(handle);
        Ok(session)
    }

    fn next_id(&self) -> u32 {
        // Wrap to 1 rather than 0 — 0 is never a valid outstanding id.
        loop {
            let current = self.next_id.load(Ordering::Relaxed);
            let next = if current >= u32::MAX - 1 {
                1
            } else {
                current + 1
            };
            if self
                .next_id
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return current;
            }
        }
    }

    /// Send a command and await its correlated response. Returns `None`
    /// on encode/write failure, matching the wire contract that a failed
    /// send never blocks the caller forever.
    pub async fn send(&self, command: &str, options: MessageOptions) -> Option<Response> {
        let id = self.next_id();
        let message = Message::new(id, command, options);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode message");
                self.pending.lock().await.remove(&id);
                return None;
            }
        };

        {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.pending.lock().await.remove(&id);
                return None;
            };
            if let Err(e) = sink.send(WsMessage::text(frame)).await {
                tracing::warn!(error = %e, "failed to write message");
                self.pending.lock().await.remove(&id);
                return None;
            }
        }

        rx.await.unwrap_or_default()
    }

    /// Close the connection: send a normal close frame, wait for the read
    /// loop to finish (or time out), then drop the socket. No-op if never
    /// started.
    pub async fn stop(&self) {
        let sink = {
            let mut writer = self.writer.lock().await;
            writer.take()
        };
        let Some(mut sink) = sink else {
            return;
        };

        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;

        let handle = self.read_loop.lock().await.take();
        if let Some(handle) = handle {
            let wait = async {
                self.done.notified().await;
            };
            if tokio::time::timeout(STOP_TIMEOUT, wait).await.is_err() {
                tracing::warn!("timed out waiting for read loop to finish");
            }
            handle.abort();
        }
    }
}
