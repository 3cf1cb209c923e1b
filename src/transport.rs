//! Transports and how to establish them.

use core::future::Future;

use embedded_io_adapters::tokio_1::FromTokio;
use embedded_io_async::{ErrorKind, Read, Write};
use tokio::net::TcpStream;

use crate::{error::TransportError, options::Request, trust::ServerTrust};

/// A freshly established transport.
#[derive(Debug)]
pub struct Connected<T> {
    pub transport: T,
    /// What the TLS stack learned about the server. `None` for plain transports.
    pub server_trust: Option<ServerTrust>,
}

impl<T> Connected<T> {
    pub const fn plain(transport: T) -> Self {
        Self {
            transport,
            server_trust: None,
        }
    }

    pub const fn tls(transport: T, server_trust: ServerTrust) -> Self {
        Self {
            transport,
            server_trust: Some(server_trust),
        }
    }
}

/// Establishes transports for a connection, once per attempt.
///
/// TLS is the connector's business: for `wss` requests it must complete the TLS
/// handshake and return the server's [`ServerTrust`] so the trust policy can run.
pub trait Connector {
    type Transport: Read + Write;

    fn connect(
        &mut self,
        request: &Request,
    ) -> impl Future<Output = Result<Connected<Self::Transport>, TransportError>>;
}

/// Plain TCP through tokio. Refuses `wss`.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub const fn new() -> Self {
        Self { nodelay: true }
    }

    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    type Transport = FromTokio<TcpStream>;

    async fn connect(
        &mut self,
        request: &Request,
    ) -> Result<Connected<Self::Transport>, TransportError> {
        if request.is_secure() {
            return Err(TransportError::new(
                ErrorKind::InvalidInput,
                "TcpConnector cannot establish TLS, use a TLS connector for wss",
            ));
        }

        tracing::debug!(host = request.host(), port = request.port(), "Connecting");

        let stream = TcpStream::connect((request.host(), request.port())).await?;
        stream.set_nodelay(self.nodelay)?;

        Ok(Connected::plain(FromTokio::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_wss() {
        let request = Request::parse("wss://example.com/").unwrap();

        let Err(error) = TcpConnector::new().connect(&request).await else {
            panic!("Expected wss to be refused");
        };

        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn connects_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let request = Request::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();

        let mut connector = TcpConnector::new();

        let (connected, accepted) = tokio::join!(connector.connect(&request), listener.accept());

        let connected = connected.unwrap();
        assert!(connected.server_trust.is_none());
        assert!(accepted.is_ok());
    }
}
