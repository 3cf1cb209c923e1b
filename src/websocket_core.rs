//! The connection loop and the state it shares with every [`WebSocket`](crate::WebSocket) handle.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::{Bytes, BytesMut};
use embedded_io_async::ErrorKind;
use http::HeaderMap;
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    runtime::Handle,
    time::{Instant, sleep, sleep_until, timeout},
};

use crate::{
    CloseCode, CloseFrame, Frame, Message, OpCode,
    codec::FramesCodec,
    delegate::{Dispatcher, Event},
    error::{Error, ProtocolError, SendError, TimeoutKind, TransportError},
    fragments::{self, FragmentsState},
    frame::MAX_CONTROL_PAYLOAD,
    functions,
    handshake::{self, Negotiated},
    http::Cookie,
    keepalive::{Keepalive, PendingPings, Tick},
    options::{Options, Request},
    reconnect::Reconnect,
    send_queue::SendQueue,
    state::{ReadyState, StateCell},
    transport::{Connected, Connector},
    trust::TrustPolicy,
};

/// What the last successful handshake negotiated.
#[derive(Debug)]
pub(crate) struct SessionInfo {
    pub request: Request,
    pub protocol: Option<String>,
    pub headers: Option<HeaderMap>,
    pub cookies: Vec<Cookie>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub state: StateCell,
    pub queue: SendQueue,
    pub pings: Mutex<PendingPings>,
    pub info: Mutex<SessionInfo>,
    pub dispatcher: Dispatcher,
    pub options: Options,
    pub trust_policy: Arc<dyn TrustPolicy>,
    pub runtime: Option<Handle>,
    opened: AtomicBool,
    closed_by_caller: AtomicBool,
    abandoned: AtomicBool,
}

impl Shared {
    pub fn new(
        request: Request,
        options: Options,
        trust_policy: Arc<dyn TrustPolicy>,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            state: StateCell::new(),
            queue: SendQueue::new(options.fragment_size()),
            pings: Mutex::new(PendingPings::new()),
            info: Mutex::new(SessionInfo {
                request,
                protocol: None,
                headers: None,
                cookies: options.cookies().to_vec(),
            }),
            dispatcher: Dispatcher::default(),
            options,
            trust_policy,
            runtime,
            opened: AtomicBool::new(false),
            closed_by_caller: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        }
    }

    /// Queues a data message if the connection is open.
    pub fn enqueue(&self, message: Message) -> Result<(), SendError> {
        let mut queued = false;

        self.state.transition(|state| {
            if state == ReadyState::Open {
                self.queue.push(message);
                queued = true;
            }

            None
        });

        if queued {
            Ok(())
        } else {
            Err(SendError::NotOpen)
        }
    }

    pub fn ping(&self, payload: Bytes) -> Result<(), SendError> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(SendError::ControlFrameTooLarge { len: payload.len() });
        }

        let mut queued = false;

        self.state.transition(|state| {
            if state == ReadyState::Open {
                self.pings.lock().insert(payload.clone());
                self.queue.push(Message::Ping(payload));
                queued = true;
            }

            None
        });

        if queued {
            Ok(())
        } else {
            Err(SendError::NotOpen)
        }
    }

    /// Starts the closing handshake. Idempotent.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<(), SendError> {
        if !code.is_allowed() {
            return Err(SendError::InvalidCloseCode { code });
        }

        if reason.len() > CloseFrame::MAX_REASON_LEN {
            return Err(SendError::CloseReasonTooLarge { len: reason.len() });
        }

        self.closed_by_caller.store(true, Ordering::SeqCst);

        self.state.transition(|state| match state {
            ReadyState::Unknown => Some(ReadyState::Closed),
            ReadyState::Open => {
                self.queue
                    .push(Message::Close(Some(CloseFrame::new(code, reason))));

                Some(ReadyState::Closing)
            }
            // The loop notices the flag.
            ReadyState::Connecting | ReadyState::Reconnecting => None,
            ReadyState::Closing | ReadyState::Closed => None,
        });

        self.queue.wake();

        Ok(())
    }

    /// The last handle is gone.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.queue.wake();
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.closed_by_caller.load(Ordering::SeqCst) || self.is_abandoned()
    }

    /// Completes once the caller closed or abandoned the connection.
    async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }

            self.queue.notified().await;
        }
    }

    fn post(&self, event: Event) {
        self.dispatcher.post(event);
    }
}

fn aborted() -> Error {
    Error::TransportError(TransportError::new(
        ErrorKind::ConnectionAborted,
        "Closed before the connection opened",
    ))
}

/// A close frame was sent and the server's is awaited.
#[derive(Debug)]
struct Closing {
    code: CloseCode,
    reason: String,
    deadline: Instant,
    error: Option<Error>,
}

/// How a connection ended.
#[derive(Debug)]
struct Ended {
    code: CloseCode,
    reason: String,
    was_clean: bool,
    error: Option<Error>,
}

impl Ended {
    fn error(error: Error) -> Self {
        Self {
            code: error.close_code(),
            reason: String::new(),
            was_clean: false,
            error: Some(error),
        }
    }

    fn unclean(closing: Closing) -> Self {
        Self {
            code: closing.code,
            reason: closing.reason,
            was_clean: false,
            error: closing.error,
        }
    }
}

/// One open connection.
#[derive(Debug)]
struct Session<T> {
    transport: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: FramesCodec<StdRng>,
    fragments: FragmentsState,
    keepalive: Option<Keepalive>,
    closing: Option<Closing>,
}

impl<T> Session<T>
where
    T: embedded_io_async::Read + embedded_io_async::Write,
{
    fn new(transport: T, read_buf: BytesMut, options: &Options) -> Self {
        Self {
            transport,
            read_buf,
            write_buf: BytesMut::new(),
            codec: FramesCodec::client(StdRng::from_os_rng())
                .with_max_payload_len(options.max_message_size()),
            fragments: FragmentsState::new(options.max_message_size()),
            keepalive: options.ping_interval().map(Keepalive::new),
            closing: None,
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.codec.encode(frame, &mut self.write_buf);

        self.write_buffered().await
    }

    async fn write_buffered(&mut self) -> Result<(), TransportError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }

        let result = functions::write_all(&mut self.transport, &self.write_buf).await;
        self.write_buf.clear();

        result
    }
}

async fn next_tick(keepalive: &mut Option<Keepalive>) {
    match keepalive {
        Some(keepalive) => keepalive.tick().await,
        None => core::future::pending().await,
    }
}

async fn deadline(closing: Option<Instant>) {
    match closing {
        Some(deadline) => sleep_until(deadline).await,
        None => core::future::pending().await,
    }
}

/// Why the loop woke up.
#[derive(Debug)]
enum Wake {
    Queue,
    Keepalive,
    CloseTimeout,
    Read(Result<usize, TransportError>),
}

/// Connects the transport, evaluates trust and runs the opening handshake.
async fn connect<C>(
    connector: &mut C,
    shared: &Shared,
    request: &Request,
    rng: &mut StdRng,
) -> Result<(C::Transport, BytesMut, Negotiated), Error>
where
    C: Connector,
{
    let Connected {
        mut transport,
        server_trust,
    } = connector.connect(request).await?;

    if request.is_secure() {
        if shared.options.allow_untrusted_certificates() {
            tracing::warn!(domain = request.host(), "Skipping server trust evaluation");
        } else {
            let server_trust = server_trust.unwrap_or_default();

            if !shared.trust_policy.evaluate(&server_trust, request.host()) {
                tracing::warn!(domain = request.host(), "Server trust rejected");

                return Err(Error::TrustRejected {
                    domain: request.host().to_owned(),
                });
            }
        }
    }

    let mut read_buf = BytesMut::new();
    let cookies = shared.info.lock().cookies.clone();

    let negotiated = handshake::client_handshake(
        &mut transport,
        &mut read_buf,
        request,
        &shared.options,
        &cookies,
        rng,
    )
    .await?;

    Ok((transport, read_buf, negotiated))
}

/// Drives a connection: writes queued frames, reads and dispatches incoming ones,
/// pings, handles the closing handshake and reconnects.
///
/// Returned by [`WebSocket::open`](crate::WebSocket::open). Nothing is sent or received
/// until [`Driver::run`] is polled, usually through `tokio::spawn(driver.run())`.
pub struct Driver<C: Connector> {
    shared: Arc<Shared>,
    connector: C,
    reconnect: Reconnect,
    rng: StdRng,
    session: Option<Session<C::Transport>>,
}

impl<C: Connector> core::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Driver")
            .field("state", &self.shared.state.get())
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Driver<C> {
    /// Runs the first connection attempt.
    pub(crate) async fn open(shared: Arc<Shared>, connector: C) -> Result<Self, Error> {
        if shared.opened.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyOpened);
        }

        shared.dispatcher.start(shared.runtime.as_ref());

        let mut driver = Self {
            reconnect: Reconnect::new(shared.options.reconnect()),
            shared,
            connector,
            rng: StdRng::from_os_rng(),
            session: None,
        };

        let request = driver.shared.info.lock().request.clone();

        let session = driver.establish(request).await?;
        driver.session = Some(session);

        Ok(driver)
    }

    /// Runs until the connection is closed for good.
    pub async fn run(mut self) {
        while let Some(session) = self.session.take() {
            let ended = self.drive(session).await;

            let reconnect = !self.shared.is_cancelled()
                && self.reconnect.should_reconnect(ended.error.as_ref());

            self.finish(ended);

            if reconnect {
                self.session = self.reconnect().await;
            }
        }

        tracing::debug!("Connection loop finished");
    }

    async fn establish(&mut self, request: Request) -> Result<Session<C::Transport>, Error> {
        let Self {
            shared,
            connector,
            rng,
            ..
        } = self;

        if shared.is_cancelled() {
            shared.state.set(ReadyState::Closed);

            return Err(aborted());
        }

        shared.state.set(ReadyState::Connecting);

        tracing::debug!(url = %request.uri(), "Opening connection");

        let attempt = timeout(
            shared.options.handshake_timeout(),
            connect(connector, shared, &request, rng),
        );

        let result = tokio::select! {
            result = attempt => {
                result.unwrap_or_else(|_| Err(Error::Timeout(TimeoutKind::Handshake)))
            }
            _ = shared.cancelled() => Err(aborted()),
        };

        let (transport, read_buf, negotiated) = match result {
            Ok(connected) => connected,
            Err(error) => {
                shared.state.set(ReadyState::Closed);

                if !shared.is_cancelled() {
                    tracing::warn!(%error, "Failed to open connection");

                    shared.post(Event::Error(error.clone()));
                }

                return Err(error);
            }
        };

        let mut opened = false;

        shared.state.transition(|state| {
            if state == ReadyState::Connecting && !shared.is_cancelled() {
                opened = true;

                return Some(ReadyState::Open);
            }

            None
        });

        if !opened {
            shared.state.set(ReadyState::Closed);

            return Err(aborted());
        }

        tracing::info!(
            url = %request.uri(),
            protocol = negotiated.protocol.as_deref(),
            "Connection open"
        );

        {
            let mut info = shared.info.lock();

            info.request = request;
            info.protocol = negotiated.protocol;
            info.headers = Some(negotiated.headers);
            info.cookies = negotiated.cookies;
        }

        shared.pings.lock().clear();
        self.reconnect.reset();
        self.shared.post(Event::Open);

        Ok(Session::new(transport, read_buf, &self.shared.options))
    }

    async fn reconnect(&mut self) -> Option<Session<C::Transport>> {
        loop {
            let delay = self.reconnect.next_delay()?;

            let mut waiting = false;

            self.shared.state.transition(|state| {
                if state == ReadyState::Closed && !self.shared.is_cancelled() {
                    waiting = true;

                    return Some(ReadyState::Reconnecting);
                }

                None
            });

            if !waiting {
                return None;
            }

            tracing::info!(attempt = self.reconnect.attempts(), ?delay, "Reconnecting");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shared.cancelled() => {
                    self.shared.state.set(ReadyState::Closed);

                    return None;
                }
            }

            let request = self
                .shared
                .dispatcher
                .delegate()
                .and_then(|delegate| delegate.reconnect_target())
                .unwrap_or_else(|| self.shared.info.lock().request.clone());

            match self.establish(request).await {
                Ok(session) => return Some(session),
                Err(error) if error.is_retryable() && !self.shared.is_cancelled() => continue,
                Err(_) => return None,
            }
        }
    }

    fn finish(&mut self, ended: Ended) {
        self.shared.state.set(ReadyState::Closed);
        self.shared.queue.clear();
        self.shared.pings.lock().clear();

        tracing::info!(code = %ended.code, was_clean = ended.was_clean, "Connection closed");

        if let Some(error) = ended.error {
            self.shared.post(Event::Error(error));
        }

        self.shared.post(Event::Close {
            code: ended.code,
            reason: ended.reason,
            was_clean: ended.was_clean,
        });
    }

    async fn drive(&mut self, mut session: Session<C::Transport>) -> Ended {
        // Frames that arrived together with the 101 response.
        if !session.read_buf.is_empty() {
            if let Some(ended) = self.on_read(&mut session).await {
                return ended;
            }
        }

        loop {
            if let Err(error) = self.flush(&mut session).await {
                return Ended::error(error.into());
            }

            if self.shared.is_abandoned() {
                return self.abandoned(&mut session).await;
            }

            let pinging = session.closing.is_none();
            let close_deadline = session.closing.as_ref().map(|closing| closing.deadline);

            let wake = tokio::select! {
                _ = self.shared.queue.notified() => Wake::Queue,
                _ = next_tick(&mut session.keepalive), if pinging => Wake::Keepalive,
                _ = deadline(close_deadline) => Wake::CloseTimeout,
                read = functions::read_some(&mut session.transport, &mut session.read_buf) => Wake::Read(read),
            };

            match wake {
                Wake::Queue => {}
                Wake::Keepalive => {
                    if let Some(ended) = self.on_keepalive(&mut session) {
                        return ended;
                    }
                }
                Wake::CloseTimeout => {
                    if let Some(closing) = session.closing.take() {
                        tracing::debug!(code = %closing.code, "Timed out waiting for the server's close frame");

                        return Ended::unclean(closing);
                    }
                }
                Wake::Read(Err(error)) => {
                    tracing::debug!(%error, "Failed to read");

                    return match session.closing.take() {
                        Some(closing) => Ended::unclean(closing),
                        None => Ended::error(error.into()),
                    };
                }
                Wake::Read(Ok(0)) => {
                    tracing::debug!("Connection closed by peer");

                    return match session.closing.take() {
                        Some(closing) => Ended::unclean(closing),
                        None => Ended::error(TransportError::closed().into()),
                    };
                }
                Wake::Read(Ok(_)) => {
                    if let Some(ended) = self.on_read(&mut session).await {
                        return ended;
                    }
                }
            }
        }
    }

    /// Writes every queued frame. After a close frame went out, nothing else is sent.
    async fn flush(&mut self, session: &mut Session<C::Transport>) -> Result<(), TransportError> {
        while let Some(frame) = self.shared.queue.pop() {
            if session.closing.is_some() {
                continue;
            }

            if frame.opcode() == OpCode::Close {
                let close = fragments::extract_close_frame(frame.payload())
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| CloseFrame::no_reason(CloseCode::Normal));

                tracing::debug!(code = %close.code(), "Sending close frame");

                session.closing = Some(Closing {
                    code: close.code(),
                    reason: close.reason().to_owned(),
                    deadline: Instant::now() + self.shared.options.close_timeout(),
                    error: None,
                });
            }

            session.codec.encode(&frame, &mut session.write_buf);
        }

        session.write_buffered().await
    }

    async fn abandoned(&mut self, session: &mut Session<C::Transport>) -> Ended {
        match session.closing.take() {
            Some(closing) => Ended::unclean(closing),
            None => {
                tracing::debug!("Connection abandoned");

                let close = CloseFrame::no_reason(CloseCode::Away);

                if let Err(error) = session.write_frame(&Frame::close(Some(&close))).await {
                    tracing::debug!(%error, "Failed to send close frame");
                }

                Ended {
                    code: CloseCode::Away,
                    reason: String::new(),
                    was_clean: false,
                    error: None,
                }
            }
        }
    }

    fn on_keepalive(&mut self, session: &mut Session<C::Transport>) -> Option<Ended> {
        let keepalive = session.keepalive.as_mut()?;

        let tick = {
            let pings = self.shared.pings.lock();

            keepalive.on_tick(&pings)
        };

        match tick {
            Tick::Dead => {
                tracing::warn!("Pong not received in time");

                Some(Ended::error(Error::Timeout(TimeoutKind::Pong)))
            }
            Tick::Ping(payload) => {
                tracing::trace!(?payload, "Sending keepalive ping");

                self.shared.pings.lock().insert(payload.clone());
                self.shared.queue.push(Message::Ping(payload));

                None
            }
        }
    }

    async fn on_read(&mut self, session: &mut Session<C::Transport>) -> Option<Ended> {
        loop {
            let frame = match session.codec.decode(&mut session.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(error) => return self.violation(session, error.into()).await,
            };

            let message = match session.fragments.on_frame(frame) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(error) => return self.violation(session, error).await,
            };

            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if session.closing.is_none() {
                        self.shared.post(Event::Message(message));
                    }
                }
                Message::Ping(payload) => {
                    if session.closing.is_none() {
                        self.shared.queue.push(Message::Pong(payload.clone()));
                    }

                    self.shared.post(Event::Ping(payload));
                }
                Message::Pong(payload) => {
                    if let Some(round_trip) = self.shared.pings.lock().on_pong(&payload) {
                        tracing::trace!(?round_trip, "Pong received");
                    }

                    self.shared.post(Event::Pong(payload));
                }
                Message::Close(frame) => return Some(self.on_close(session, frame).await),
            }
        }
    }

    async fn on_close(
        &mut self,
        session: &mut Session<C::Transport>,
        frame: Option<CloseFrame>,
    ) -> Ended {
        if let Some(closing) = session.closing.take() {
            tracing::debug!("Closing handshake completed");

            return Ended {
                code: closing.code,
                reason: closing.reason,
                was_clean: true,
                error: closing.error,
            };
        }

        self.shared.state.transition(|state| {
            (state == ReadyState::Open).then_some(ReadyState::Closing)
        });
        self.shared.queue.clear();

        let code = frame.as_ref().map(CloseFrame::code);
        let reason = frame
            .map(|frame| frame.reason().to_owned())
            .unwrap_or_default();

        tracing::debug!(?code, %reason, "Server closed the connection");

        if session.fragments.is_pending() {
            tracing::debug!("Discarding a partially received message");
        }

        let echo = CloseFrame::no_reason(code.unwrap_or(CloseCode::Normal));

        if let Err(error) = session.write_frame(&Frame::close(Some(&echo))).await {
            tracing::debug!(%error, "Failed to echo close frame");
        }

        Ended {
            code: code.unwrap_or(CloseCode::Status),
            reason,
            was_clean: true,
            error: None,
        }
    }

    /// Closes the connection after the server broke the protocol.
    ///
    /// If the framing is still intact the server's close frame is awaited,
    /// otherwise the connection ends right after the close frame is sent.
    async fn violation(
        &mut self,
        session: &mut Session<C::Transport>,
        error: ProtocolError,
    ) -> Option<Ended> {
        let code = error.close_code();
        let intact = error.is_framing_intact();
        let error = Error::from(error);

        tracing::warn!(%error, "Protocol violation");

        if let Some(mut closing) = session.closing.take() {
            closing.error.get_or_insert(error);

            return Some(Ended::unclean(closing));
        }

        self.shared.state.transition(|state| {
            (state == ReadyState::Open).then_some(ReadyState::Closing)
        });
        self.shared.queue.clear();

        let close = CloseFrame::no_reason(code);

        if let Err(error) = session.write_frame(&Frame::close(Some(&close))).await {
            tracing::debug!(%error, "Failed to send close frame");
        }

        if !intact {
            return Some(Ended::error(error));
        }

        session.closing = Some(Closing {
            code,
            reason: String::new(),
            deadline: Instant::now() + self.shared.options.close_timeout(),
            error: Some(error),
        });

        None
    }
}
