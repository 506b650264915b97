//! Per-connection handler: signature check, WebSocket upgrade, message
//! read/enqueue/reply loop.

use futures_util::{SinkExt, StreamExt};
use rc_core::{Message, RcError, Response, SIGNATURE_HEADER_NAME};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_util::sync::CancellationToken;

use crate::queue::CommandQueue;

/// Handle one accepted transport-level stream: verify the signature header,
/// complete the WebSocket upgrade, then loop reading/enqueuing/replying
/// until the peer disconnects, sends a protocol-violating frame, or the
/// server starts shutting down.
pub async fn handle<S>(
    stream: S,
    cert_dir: std::path::PathBuf,
    queue: CommandQueue,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let cert_dir_for_check = cert_dir.clone();
    // Err type is fixed by tokio-tungstenite's handshake Callback trait.
    #[allow(clippy::result_large_err)]
    let callback = move |req: &Request, response: HandshakeResponse| {
        let header = req
            .headers()
            .get(SIGNATURE_HEADER_NAME)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        match rc_core::check_sig(header, &cert_dir_for_check) {
            Ok(true) => Ok(response),
            Ok(false) => {
                tracing::warn!("invalid signature, rejecting upgrade");
                Err(reject())
            }
            Err(e) => {
                tracing::error!(error = %e, "error checking signature");
                Err(reject())
            }
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    tracing::debug!("succeeded in upgrading to websocket");

    let (mut sink, mut stream) = ws.split();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!("shutting down, closing idle connection");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "error reading message from websocket");
                    break;
                }
                None => break,
            },
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                tracing::debug!("normal websocket close");
                break;
            }
            WsMessage::Binary(_) => {
                tracing::error!("binary messages are not accepted");
                break;
            }
            _ => continue,
        };

        let response = match handle_message(&text, &queue).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "error handling message");
                break;
            }
        };

        let json = match response.to_frame() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "error marshalling json response");
                break;
            }
        };

        if let Err(e) = sink.send(WsMessage::text(json)).await {
            tracing::error!(error = %e, "error writing message to socket");
            break;
        }
    }

    let _ = sink.close().await;
}

async fn handle_message(text: &str, queue: &CommandQueue) -> Result<Response, RcError> {
    let message = Message::from_frame(text)?;
    let id = message.id;

    match queue.submit(message).await {
        Some(resp) => Ok(resp),
        None => {
            let err = RcError::QueueFull {
                backlog: crate::queue::COMMAND_QUEUE_MAX_BACKLOG,
            };
            Ok(Response::error(id, err.to_string()))
        }
    }
}

fn reject() -> ErrorResponse {
    ErrorResponse::new(Some("unauthorized".to_string()))
}
