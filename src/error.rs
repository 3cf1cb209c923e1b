//! Error types.

use embedded_io_async::ErrorKind;
use http::StatusCode;

use crate::CloseCode;

/// A frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("Reserved bits must be zero")]
    ReservedBitsNotZero,
    #[error("Invalid opcode: {opcode:#x}")]
    InvalidOpCode { opcode: u8 },
    #[error("Control frame fragmented")]
    ControlFrameFragmented,
    #[error("Control frame too large: {len} bytes")]
    ControlFrameTooLarge { len: u64 },
    #[error("Payload length has the most significant bit set")]
    PayloadLengthHighBitSet,
    #[error("Server frames must not be masked")]
    MaskedServerFrame,
    #[error("Payload too large: {len} bytes, max {max}")]
    PayloadTooLarge { len: u64, max: usize },
}

impl FrameDecodeError {
    /// The close code sent to the peer for this error.
    pub const fn close_code(&self) -> CloseCode {
        match self {
            FrameDecodeError::PayloadTooLarge { .. } => CloseCode::Size,
            _ => CloseCode::Protocol,
        }
    }
}

/// The peer broke the protocol above the framing layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame error: {0}")]
    Frame(
        #[source]
        #[from]
        FrameDecodeError,
    ),
    #[error("Invalid close frame")]
    InvalidCloseFrame,
    #[error("Invalid close code: {code}")]
    InvalidCloseCode { code: CloseCode },
    #[error("Invalid UTF-8")]
    InvalidUTF8,
    #[error("Invalid fragment")]
    InvalidFragment,
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,
    #[error("Message too large: {size} bytes, max {max}")]
    MessageTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// The close code sent to the peer for this error.
    pub const fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::Frame(err) => err.close_code(),
            ProtocolError::InvalidUTF8 => CloseCode::Invalid,
            ProtocolError::MessageTooLarge { .. } => CloseCode::Size,
            _ => CloseCode::Protocol,
        }
    }

    /// Whether the stream is still framed correctly after this error.
    ///
    /// Frame level errors leave the decoder at an unknown position.
    pub const fn is_framing_intact(&self) -> bool {
        !matches!(self, ProtocolError::Frame(_))
    }
}

/// The opening handshake failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Connection closed before the handshake completed")]
    ConnectionClosed,
    #[error("Malformed HTTP response: {0}")]
    Http(
        #[source]
        #[from]
        httparse::Error,
    ),
    #[error("HTTP response head too large")]
    ResponseTooLarge,
    #[error("Unexpected status code: {status}")]
    UnexpectedStatus { status: StatusCode },
    #[error("Missing or invalid upgrade header")]
    MissingOrInvalidUpgrade,
    #[error("Missing or invalid connection header")]
    MissingOrInvalidConnection,
    #[error("Missing or invalid sec-websocket-accept header")]
    MissingOrInvalidAccept,
    #[error("Server selected a protocol that was not offered: {protocol}")]
    UnsupportedProtocol { protocol: String },
}

impl HandshakeError {
    /// The HTTP status of the rejected upgrade, if the server answered with one.
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            HandshakeError::UnexpectedStatus { status } => Some(*status),
            _ => None,
        }
    }
}

/// The byte stream failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The peer closed the stream.
    pub fn closed() -> Self {
        Self::new(ErrorKind::ConnectionReset, "Connection closed by peer")
    }

    /// Wraps an error of the underlying stream.
    pub fn io<E: embedded_io_async::Error>(err: E) -> Self {
        Self::new(err.kind(), format!("{err:?}"))
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::new(embedded_io_async::Error::kind(&err), err.to_string())
    }
}

/// What timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Connect, trust evaluation and the opening handshake did not finish in time.
    Handshake,
    /// The keepalive ping was not answered before the next one was due.
    Pong,
}

impl core::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TimeoutKind::Handshake => f.write_str("handshake"),
            TimeoutKind::Pong => f.write_str("pong"),
        }
    }
}

/// Errors reported to the [`Delegate`](crate::Delegate).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Non-101 response or accept key mismatch. Never retried.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(
        #[source]
        #[from]
        HandshakeError,
    ),
    /// The connection was closed with `code` after a protocol violation.
    #[error("Protocol violation ({code}): {error}")]
    ProtocolViolation {
        code: CloseCode,
        #[source]
        error: ProtocolError,
    },
    /// I/O failure. Retryable.
    #[error("Transport error: {0}")]
    TransportError(
        #[source]
        #[from]
        TransportError,
    ),
    /// The trust policy rejected the server. Never retried.
    #[error("Server trust rejected for {domain}")]
    TrustRejected { domain: String },
    /// Missed pong or handshake deadline. Retryable.
    #[error("Timed out: {0}")]
    Timeout(TimeoutKind),
    /// [`WebSocket::open`](crate::WebSocket::open) was called more than once.
    #[error("Connection already opened")]
    AlreadyOpened,
}

impl Error {
    /// Whether the reconnect controller may try again after this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportError(_) | Error::Timeout(_))
    }

    /// The close code reported to the delegate when this error ends an open connection.
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::ProtocolViolation { code, .. } => *code,
            _ => CloseCode::Abnormal,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        Error::ProtocolViolation {
            code: error.close_code(),
            error,
        }
    }
}

impl From<FrameDecodeError> for Error {
    fn from(error: FrameDecodeError) -> Self {
        ProtocolError::from(error).into()
    }
}

/// A send or close request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Connection is not open")]
    NotOpen,
    #[error("Control frame payload too large: {len} bytes, max 125")]
    ControlFrameTooLarge { len: usize },
    #[error("Close reason too large: {len} bytes, max 123")]
    CloseReasonTooLarge { len: usize },
    #[error("Close code may not be sent: {code}")]
    InvalidCloseCode { code: CloseCode },
}

/// A connection request could not be built.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid URL: {0}")]
    InvalidUri(
        #[source]
        #[from]
        http::uri::InvalidUri,
    ),
    #[error("Unsupported scheme: {scheme}, expected ws or wss")]
    UnsupportedScheme { scheme: String },
    #[error("URL has no host")]
    MissingHost,
    #[error("Invalid header: {0}")]
    InvalidHeader(
        #[source]
        #[from]
        http::Error,
    ),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_follow_the_violation() {
        assert_eq!(ProtocolError::InvalidUTF8.close_code(), CloseCode::Invalid);
        assert_eq!(
            ProtocolError::InvalidContinuationFrame.close_code(),
            CloseCode::Protocol
        );
        assert_eq!(
            ProtocolError::from(FrameDecodeError::MaskedServerFrame).close_code(),
            CloseCode::Protocol
        );
        assert_eq!(
            ProtocolError::from(FrameDecodeError::PayloadTooLarge { len: 10, max: 1 }).close_code(),
            CloseCode::Size
        );
    }

    #[test]
    fn only_transport_and_timeout_are_retryable() {
        assert!(Error::TransportError(TransportError::closed()).is_retryable());
        assert!(Error::Timeout(TimeoutKind::Pong).is_retryable());

        assert!(!Error::TrustRejected { domain: "example.com".into() }.is_retryable());
        assert!(!Error::from(HandshakeError::MissingOrInvalidAccept).is_retryable());
        assert!(!Error::from(ProtocolError::InvalidFragment).is_retryable());
    }

    #[test]
    fn handshake_status_is_preserved() {
        let error = HandshakeError::UnexpectedStatus {
            status: StatusCode::UNAUTHORIZED,
        };

        assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(HandshakeError::ConnectionClosed.status(), None);
    }
}
