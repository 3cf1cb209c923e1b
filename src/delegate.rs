//! Event delivery to the application.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, OnceLock, Weak},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc};

use crate::{CloseCode, Error, Message, options::Request};

/// Receives connection events.
///
/// Events of one connection are delivered one at a time in the order they happened,
/// on the runtime chosen with
/// [`Builder::with_delegate_runtime`](crate::Builder::with_delegate_runtime).
/// A slow delegate never stalls the connection loop, but it does delay later events.
/// A panicking callback only loses its own event.
///
/// The connection only holds a weak reference. Once the delegate is dropped, events
/// are discarded.
#[allow(unused_variables)]
pub trait Delegate: Send + Sync + 'static {
    /// The opening handshake succeeded.
    fn on_open(&self) {}

    /// A complete text or binary message arrived.
    fn on_message(&self, message: Message) {}

    /// The server pinged. The pong has already been queued.
    fn on_ping(&self, payload: Bytes) {}

    fn on_pong(&self, payload: Bytes) {}

    /// Delivered exactly once per connection that reached open.
    ///
    /// `was_clean` is `true` if both close frames were exchanged.
    fn on_close(&self, code: CloseCode, reason: String, was_clean: bool) {}

    /// A failure ended, or prevented, a connection.
    fn on_error(&self, error: Error) {}

    /// Where to reconnect to. `None` reuses the previous request.
    fn reconnect_target(&self) -> Option<Request> {
        None
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    Open,
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    Close {
        code: CloseCode,
        reason: String,
        was_clean: bool,
    },
    Error(Error),
}

impl Event {
    fn deliver(self, delegate: &dyn Delegate) {
        match self {
            Event::Open => delegate.on_open(),
            Event::Message(message) => delegate.on_message(message),
            Event::Ping(payload) => delegate.on_ping(payload),
            Event::Pong(payload) => delegate.on_pong(payload),
            Event::Close {
                code,
                reason,
                was_clean,
            } => delegate.on_close(code, reason, was_clean),
            Event::Error(error) => delegate.on_error(error),
        }
    }

    fn deliver_guarded(self, delegate: &dyn Delegate) {
        if catch_unwind(AssertUnwindSafe(|| self.deliver(delegate))).is_err() {
            tracing::error!("Delegate panicked, event discarded");
        }
    }
}

type Slot = Arc<Mutex<Option<Weak<dyn Delegate>>>>;

/// Forwards events to the delegate from a single task.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    slot: Slot,
    sender: OnceLock<mpsc::UnboundedSender<Event>>,
}

impl Dispatcher {
    pub fn set(&self, delegate: Weak<dyn Delegate>) {
        *self.slot.lock() = Some(delegate);
    }

    pub fn delegate(&self) -> Option<Arc<dyn Delegate>> {
        self.slot.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Starts the delivery task on `handle`, or on the current runtime.
    ///
    /// Without any runtime, events are delivered inline by [`Dispatcher::post`].
    pub fn start(&self, handle: Option<&Handle>) {
        let Some(handle) = handle.cloned().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!("No runtime for delegate events, delivering inline");

            return;
        };

        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();

        if self.sender.set(sender).is_err() {
            return;
        }

        let slot = self.slot.clone();

        handle.spawn(async move {
            while let Some(event) = receiver.recv().await {
                let delegate = slot.lock().as_ref().and_then(Weak::upgrade);

                match delegate {
                    Some(delegate) => event.deliver_guarded(delegate.as_ref()),
                    None => tracing::trace!(?event, "No delegate, event dropped"),
                }
            }
        });
    }

    pub fn post(&self, event: Event) {
        match self.sender.get() {
            Some(sender) => {
                let _ = sender.send(event);
            }
            None => {
                if let Some(delegate) = self.delegate() {
                    event.deliver_guarded(delegate.as_ref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Recorder(mpsc::UnboundedSender<&'static str>);

    impl Delegate for Recorder {
        fn on_open(&self) {
            let _ = self.0.send("open");
        }

        fn on_message(&self, _: Message) {
            let _ = self.0.send("message");
        }

        fn on_close(&self, _: CloseCode, _: String, _: bool) {
            let _ = self.0.send("close");
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder: Arc<dyn Delegate> = Arc::new(Recorder(tx));

        let dispatcher = Dispatcher::default();
        dispatcher.set(Arc::downgrade(&recorder));
        dispatcher.start(None);

        dispatcher.post(Event::Open);
        dispatcher.post(Event::Message(Message::Text("hi".into())));
        dispatcher.post(Event::Close {
            code: CloseCode::Normal,
            reason: String::new(),
            was_clean: true,
        });

        for expected in ["open", "message", "close"] {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn dropped_delegate_receives_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder: Arc<dyn Delegate> = Arc::new(Recorder(tx));

        let dispatcher = Dispatcher::default();
        dispatcher.set(Arc::downgrade(&recorder));
        dispatcher.start(None);

        drop(recorder);
        dispatcher.post(Event::Open);

        assert_eq!(rx.recv().await, None);
    }

    #[derive(Debug)]
    struct PanicsOnOpen(mpsc::UnboundedSender<&'static str>);

    impl Delegate for PanicsOnOpen {
        fn on_open(&self) {
            panic!("on_open failed");
        }

        fn on_message(&self, _: Message) {
            let _ = self.0.send("message");
        }
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delegate: Arc<dyn Delegate> = Arc::new(PanicsOnOpen(tx));

        let dispatcher = Dispatcher::default();
        dispatcher.set(Arc::downgrade(&delegate));
        dispatcher.start(None);

        dispatcher.post(Event::Open);
        dispatcher.post(Event::Message(Message::Text("hi".into())));

        assert_eq!(rx.recv().await, Some("message"));
    }

    #[test]
    fn delivers_inline_without_a_runtime() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder: Arc<dyn Delegate> = Arc::new(Recorder(tx));

        let dispatcher = Dispatcher::default();
        dispatcher.set(Arc::downgrade(&recorder));
        dispatcher.start(None);

        dispatcher.post(Event::Open);

        assert_eq!(rx.try_recv(), Ok("open"));
    }
}
