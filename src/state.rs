use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};

/// The lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Created, [`WebSocket::open`](crate::WebSocket::open) not called yet.
    Unknown,
    /// Connecting the transport, evaluating trust or running the opening handshake.
    Connecting,
    /// Messages can be sent and received.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// The transport is gone.
    Closed,
    /// Waiting to connect again after a retryable failure.
    Reconnecting,
}

/// A ready state and the moment it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ReadyState,
    pub since: Instant,
}

impl Status {
    fn new(state: ReadyState) -> Self {
        Self {
            state,
            since: Instant::now(),
        }
    }
}

/// The ready state, guarded for transitions from any thread and published to watchers.
#[derive(Debug)]
pub(crate) struct StateCell {
    status: Mutex<Status>,
    watch: watch::Sender<Status>,
}

impl StateCell {
    pub fn new() -> Self {
        let status = Status::new(ReadyState::Unknown);

        Self {
            status: Mutex::new(status),
            watch: watch::Sender::new(status),
        }
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub fn get(&self) -> ReadyState {
        self.status.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.watch.subscribe()
    }

    /// Runs `f` with the current state while holding the state lock.
    ///
    /// `f` returns the next state, or `None` to stay. Returns the state `f` saw.
    pub fn transition<F>(&self, f: F) -> ReadyState
    where
        F: FnOnce(ReadyState) -> Option<ReadyState>,
    {
        let mut status = self.status.lock();
        let current = status.state;

        if let Some(next) = f(current) {
            if next != current {
                tracing::debug!(from = ?current, to = ?next, "Ready state changed");

                *status = Status::new(next);
                self.watch.send_replace(*status);
            }
        }

        current
    }

    /// Unconditionally moves to `next`.
    pub fn set(&self, next: ReadyState) -> ReadyState {
        self.transition(|_| Some(next))
    }
}
