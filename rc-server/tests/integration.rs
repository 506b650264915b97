//! Integration tests — full request pipeline over a real TCP socket:
//! signature-gated upgrade, command round-trips, and shutdown.

use std::path::Path;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey, spki::der::pem::LineEnding};
use futures_util::{SinkExt, StreamExt};
use http::Request;
use rand::RngCore;
use rc_core::{Message, MessageOptions, Response, SIGNATURE_HEADER_NAME};
use rc_server::config::ServerConfig;
use rc_server::listener::Server;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn write_keypair(key_dir: &Path, cert_dir: &Path, name: &str) {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);

    std::fs::write(
        key_dir.join(format!("{name}.key")),
        signing_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
    )
    .unwrap();
    std::fs::write(
        cert_dir.join(format!("{name}.pub")),
        signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap(),
    )
    .unwrap();
}

async fn start_server(cert_dir: &Path) -> Server {
    let config = ServerConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        cert_dir: cert_dir.to_string_lossy().into_owned(),
        ..ServerConfig::default()
    };
    Server::start(&config).await.unwrap()
}

async fn connect(addr: std::net::SocketAddr, header: &str) -> rc_server_test_ws::Ws {
    let url = format!("ws://{addr}/");
    let request = Request::builder()
        .uri(&url)
        .header(SIGNATURE_HEADER_NAME, header)
        .header("Host", addr.to_string())
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .body(())
        .unwrap();

    let (ws, _resp) = tokio_tungstenite::connect_async(request).await.unwrap();
    rc_server_test_ws::Ws(ws)
}

/// Thin newtype so the helper above has somewhere to live without
/// spelling out the full stream type at every call site.
mod rc_server_test_ws {
    use tokio::net::TcpStream;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    pub struct Ws(pub WebSocketStream<MaybeTlsStream<TcpStream>>);
}

#[tokio::test]
async fn round_trip_echoes_command_output() {
    let key_dir = tempfile::tempdir().unwrap();
    let cert_dir = tempfile::tempdir().unwrap();
    write_keypair(key_dir.path(), cert_dir.path(), "client1");

    let server = start_server(cert_dir.path()).await;
    let addr = server.local_addr();

    let header = rc_core::create_sig("client1", key_dir.path()).unwrap();
    let mut ws = connect(addr, &header).await.0;

    let msg = Message::new(1, "echo hello", MessageOptions::default());
    ws.send(WsMessage::text(msg.to_frame().unwrap()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for response")
        .expect("stream ended")
        .unwrap();
    let WsMessage::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let response = Response::from_frame(&text).unwrap();

    assert_eq!(response.id, "1");
    assert_eq!(response.stdout, "hello\n");
    assert_eq!(response.exit_code, 0);

    ws.close(None).await.ok();
    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop timed out");
}

#[tokio::test]
async fn invalid_signature_is_dropped_without_upgrade() {
    let cert_dir = tempfile::tempdir().unwrap();
    // No keys placed in cert_dir — any signature fails verification.
    let server = start_server(cert_dir.path()).await;
    let addr = server.local_addr();

    let url = format!("ws://{addr}/");
    let request = Request::builder()
        .uri(&url)
        .header(SIGNATURE_HEADER_NAME, "not-a-real-signature")
        .header("Host", addr.to_string())
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .body(())
        .unwrap();

    let result = tokio_tungstenite::connect_async(request).await;
    assert!(result.is_err());

    server.stop().await;
}

#[tokio::test]
async fn restart_after_clean_stop_succeeds_on_same_port() {
    let key_dir = tempfile::tempdir().unwrap();
    let cert_dir = tempfile::tempdir().unwrap();
    write_keypair(key_dir.path(), cert_dir.path(), "client1");

    let server = start_server(cert_dir.path()).await;
    let addr = server.local_addr();
    server.stop().await;

    let config = ServerConfig {
        port: addr.port(),
        host: "127.0.0.1".to_string(),
        cert_dir: cert_dir.path().to_string_lossy().into_owned(),
        ..ServerConfig::default()
    };
    let server2 = Server::start(&config).await.unwrap();
    assert_eq!(server2.local_addr().port(), addr.port());

    let header = rc_core::create_sig("client1", key_dir.path()).unwrap();
    let mut ws = connect(server2.local_addr(), &header).await.0;
    let msg = Message::new(1, "echo again", MessageOptions::default());
    ws.send(WsMessage::text(msg.to_frame().unwrap()))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let WsMessage::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let response = Response::from_frame(&text).unwrap();
    assert_eq!(response.stdout, "again\n");

    server2.stop().await;
}
