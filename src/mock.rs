//! In-memory connector for testing.
//!
//! Every connection attempt creates a [`tokio::io::duplex`] pair. The client half goes
//! to the connection, the server half is handed to the test through [`MockServers`].

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use embedded_io_adapters::tokio_1::FromTokio;
use embedded_io_async::ErrorKind;
use tokio::{io::DuplexStream, sync::mpsc};

use crate::{
    error::TransportError,
    options::Request,
    transport::{Connected, Connector},
    trust::ServerTrust,
};

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct MockConnector {
    servers: mpsc::UnboundedSender<(Request, DuplexStream)>,
    attempts: Arc<AtomicUsize>,
    server_trust: Option<ServerTrust>,
}

impl MockConnector {
    /// Reports `server_trust` as the outcome of a TLS handshake.
    pub fn with_server_trust(mut self, server_trust: ServerTrust) -> Self {
        self.server_trust = Some(server_trust);
        self
    }
}

#[derive(Debug)]
pub struct MockServers {
    servers: mpsc::UnboundedReceiver<(Request, DuplexStream)>,
    attempts: Arc<AtomicUsize>,
}

impl MockServers {
    /// The server half of the next connection attempt.
    pub async fn accept(&mut self) -> (Request, DuplexStream) {
        self.servers.recv().await.expect("Connector dropped")
    }

    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

pub fn mock() -> (MockConnector, MockServers) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));

    (
        MockConnector {
            servers: sender,
            attempts: attempts.clone(),
            server_trust: None,
        },
        MockServers {
            servers: receiver,
            attempts,
        },
    )
}

impl Connector for MockConnector {
    type Transport = FromTokio<DuplexStream>;

    async fn connect(
        &mut self,
        request: &Request,
    ) -> Result<Connected<Self::Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let (client, server) = tokio::io::duplex(BUFFER_SIZE);

        self.servers
            .send((request.clone(), server))
            .map_err(|_| TransportError::new(ErrorKind::ConnectionRefused, "No server"))?;

        Ok(Connected {
            transport: FromTokio::new(client),
            server_trust: self.server_trust.clone(),
        })
    }
}
