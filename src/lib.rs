//! An async WebSocket client with keepalive, reconnection and pluggable TLS trust.

#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use websocketz_client::{CloseCode, Delegate, Message, Options, TcpConnector, WebSocket};
//!
//! #[derive(Debug)]
//! struct Printer;
//!
//! impl Delegate for Printer {
//!     fn on_message(&self, message: Message) {
//!         println!("Received: {message:?}");
//!     }
//!
//!     fn on_close(&self, code: CloseCode, reason: String, was_clean: bool) {
//!         println!("Closed: {code} {reason} clean={was_clean}");
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = WebSocket::builder("ws://localhost:9001/chat".parse()?)
//!     .with_options(Options::default().with_protocols(["chat"]))
//!     .build();
//!
//! let printer = Arc::new(Printer);
//! socket.set_delegate(&printer);
//!
//! // Suspends until the opening handshake completed or failed.
//! let driver = socket.open(TcpConnector::new()).await?;
//! let driver = tokio::spawn(driver.run());
//!
//! socket.send_text("Hello, WebSocket!")?;
//! socket.close();
//!
//! driver.await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Driving the connection
//!
//! [`WebSocket`] is a cheap, cloneable handle. Sending only queues the message. All I/O
//! happens in [`Driver::run`]: writing queued frames, reading and dispatching incoming
//! ones, answering pings, keepalive pings, the closing handshake and reconnecting.
//!
//! # Transports
//!
//! A [`Connector`] establishes the transport for every connection attempt. Anything
//! that implements [`embedded_io_async::Read`] + [`embedded_io_async::Write`] can be used.
//! [`TcpConnector`] covers plain `ws` URLs. For `wss`, a TLS connector reports the
//! server's certificate chain and the connection's [`TrustPolicy`] decides.

mod close_code;
pub use close_code::CloseCode;

mod close_frame;
pub use close_frame::CloseFrame;

pub mod codec;

mod delegate;
pub use delegate::Delegate;

pub mod error;
pub use error::{Error, SendError};

mod fragments;

mod frame;
pub use frame::Frame;

mod functions;

pub mod handshake;

pub mod http;

mod keepalive;

mod mask;

mod message;
pub use message::Message;

#[cfg(test)]
mod mock;

mod opcode;
pub use opcode::OpCode;

pub mod options;
pub use options::{Options, ReconnectPolicy, Request};

mod reconnect;

mod send_queue;

mod state;
pub use state::{ReadyState, Status};

mod transport;
pub use transport::{Connected, Connector, TcpConnector};

pub mod trust;
pub use trust::{Certificate, DefaultPolicy, PinningPolicy, ServerTrust, TrustPolicy};

mod websocket_core;
pub use websocket_core::Driver;

mod websocket;
pub use websocket::{Builder, WebSocket};
