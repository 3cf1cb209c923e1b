//! Connects to an echo server, sends a few messages and prints what comes back.
//!
//! ```not_rust
//! RUST_LOG=websocketz_client=debug cargo run --example echo-client -- ws://127.0.0.1:9002/
//! ```

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing_subscriber::EnvFilter;
use websocketz_client::{
    CloseCode, Delegate, Error, Message, Options, ReconnectPolicy, TcpConnector, WebSocket,
};

#[derive(Debug)]
struct Printer;

impl Delegate for Printer {
    fn on_open(&self) {
        tracing::info!("Open");
    }

    fn on_message(&self, message: Message) {
        tracing::info!(?message, "Received message");
    }

    fn on_pong(&self, payload: Bytes) {
        tracing::info!(?payload, "Received pong");
    }

    fn on_close(&self, code: CloseCode, reason: String, was_clean: bool) {
        tracing::info!(%code, %reason, was_clean, "Closed");
    }

    fn on_error(&self, error: Error) {
        tracing::error!(%error, "Connection failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("ws://127.0.0.1:9002/"));

    let options = Options::default()
        .with_ping_interval(Some(Duration::from_secs(5)))
        .with_fragment_size(16)
        .with_reconnect(ReconnectPolicy::enabled().with_max_attempts(3));

    let socket = WebSocket::builder(url.parse()?)
        .with_options(options)
        .build();

    let printer = Arc::new(Printer);
    socket.set_delegate(&printer);

    let driver = socket.open(TcpConnector::new()).await?;
    let driver = tokio::spawn(driver.run());

    socket.send_text("Hello, WebSocket!")?;
    socket.send_text("Hello, Fragmented WebSocket!")?;
    socket.send_binary(vec![0u8, 1, 2, 3])?;
    socket.send_ping(Bytes::from_static(b"ping"))?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    socket.close();
    driver.await?;

    Ok(())
}
