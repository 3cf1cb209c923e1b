use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::{HeaderMap, Uri};
use tokio::{runtime::Handle, sync::watch};

use crate::{
    CloseCode, Delegate, Driver, Message,
    error::{Error, SendError},
    http::Cookie,
    options::{Options, Request},
    state::{ReadyState, Status},
    transport::Connector,
    trust::{DefaultPolicy, TrustPolicy},
    websocket_core::Shared,
};

/// Configures a [`WebSocket`] before it is shared.
#[derive(Debug)]
pub struct Builder {
    request: Request,
    options: Options,
    trust_policy: Arc<dyn TrustPolicy>,
    runtime: Option<Handle>,
}

impl Builder {
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Replaces the [`DefaultPolicy`] for `wss` connections.
    pub fn with_trust_policy(mut self, trust_policy: impl TrustPolicy + 'static) -> Self {
        self.trust_policy = Arc::new(trust_policy);
        self
    }

    /// The runtime delegate events are delivered on.
    ///
    /// Defaults to the runtime [`WebSocket::open`] is called on.
    pub fn with_delegate_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> WebSocket {
        WebSocket {
            handle: Arc::new(Owner {
                shared: Arc::new(Shared::new(
                    self.request,
                    self.options,
                    self.trust_policy,
                    self.runtime,
                )),
            }),
        }
    }
}

/// Dropping the last [`WebSocket`] clone closes the connection.
#[derive(Debug)]
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.abandon();
    }
}

/// A client WebSocket connection.
///
/// Cheap to clone and safe to use from any thread. Sending only queues the message,
/// the [`Driver`] returned by [`WebSocket::open`] does the I/O.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use websocketz_client::{TcpConnector, WebSocket};
///
/// let socket = WebSocket::new("ws://localhost:9001/chat".parse()?);
///
/// let driver = socket.open(TcpConnector::new()).await?;
/// tokio::spawn(driver.run());
///
/// socket.send_text("Hello")?;
/// socket.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WebSocket {
    handle: Arc<Owner>,
}

impl WebSocket {
    /// A connection to `request` with default [`Options`].
    pub fn new(request: Request) -> Self {
        Self::builder(request).build()
    }

    pub fn builder(request: Request) -> Builder {
        Builder {
            request,
            options: Options::default(),
            trust_policy: Arc::new(DefaultPolicy),
            runtime: None,
        }
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Sets the delegate. Only a weak reference is kept.
    pub fn set_delegate<D: Delegate>(&self, delegate: &Arc<D>) {
        let delegate = Arc::downgrade(delegate);
        let delegate: Weak<dyn Delegate> = delegate;

        self.shared().dispatcher.set(delegate);
    }

    /// Connects, evaluates server trust and runs the opening handshake.
    ///
    /// Resolves once the connection is open or failed. On success the returned
    /// [`Driver`] must be run for the connection to make progress. Can only be
    /// called once, later calls fail with [`Error::AlreadyOpened`].
    pub async fn open<C: Connector>(&self, connector: C) -> Result<Driver<C>, Error> {
        Driver::open(self.handle.shared.clone(), connector).await
    }

    /// Queues a text message.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.shared().enqueue(Message::Text(text.into()))
    }

    /// Queues a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.shared().enqueue(Message::Binary(data.into()))
    }

    /// Queues a ping. Its pong is reported through [`Delegate::on_pong`].
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        self.shared().ping(payload.into())
    }

    /// Closes with [`CloseCode::Normal`]. Calling it again has no effect.
    pub fn close(&self) {
        let _ = self.shared().close(CloseCode::Normal, "");
    }

    /// Closes with a code and a reason of at most 123 bytes.
    pub fn close_with(&self, code: CloseCode, reason: &str) -> Result<(), SendError> {
        self.shared().close(code, reason)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared().state.get()
    }

    pub fn status(&self) -> Status {
        self.shared().state.status()
    }

    /// Observes every ready state change.
    pub fn watch_ready_state(&self) -> watch::Receiver<Status> {
        self.shared().state.subscribe()
    }

    /// The URL of the current or last connection.
    pub fn url(&self) -> Uri {
        self.shared().info.lock().request.uri().clone()
    }

    /// The subprotocol selected by the server.
    pub fn protocol(&self) -> Option<String> {
        self.shared().info.lock().protocol.clone()
    }

    /// The headers of the last 101 response.
    pub fn received_headers(&self) -> Option<HeaderMap> {
        self.shared().info.lock().headers.clone()
    }

    /// The configured cookies, updated by the server's `Set-Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.shared().info.lock().cookies.clone()
    }

    pub fn options(&self) -> &Options {
        &self.shared().options
    }
}
