use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{Notify, futures::Notified};

use crate::{Frame, Message, fragments::FragmentsIterator};

#[derive(Debug)]
struct Inner {
    messages: VecDeque<Message>,
    /// Remaining frames of a message being fragmented.
    current: Option<FragmentsIterator>,
    fragment_size: usize,
}

/// FIFO of outgoing messages, shared by every producer and drained by the connection loop.
///
/// The loop pops one frame at a time so frames never interleave on the wire. While a
/// message is being fragmented, a ping or pong at the head of the queue is sent between
/// two fragments. Every other message waits for the fragmented one to finish.
#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SendQueue {
    pub fn new(fragment_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                current: None,
                fragment_size: fragment_size.max(1),
            }),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, message: Message) {
        self.inner.lock().messages.push_back(message);
        self.wake();
    }

    /// Next frame to write, if any.
    pub fn pop(&self) -> Option<Frame> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(current) = inner.current.as_mut() {
            if inner
                .messages
                .front()
                .is_some_and(|message| message.is_ping() || message.is_pong())
            {
                return inner
                    .messages
                    .pop_front()
                    .and_then(|message| message.into_fragments(1).next());
            }

            match current.next() {
                Some(frame) => {
                    if frame.is_final() {
                        inner.current = None;
                    }

                    return Some(frame);
                }
                None => inner.current = None,
            }
        }

        let message = inner.messages.pop_front()?;
        let mut frames = message.into_fragments(inner.fragment_size);
        let frame = frames.next()?;

        if !frame.is_final() {
            inner.current = Some(frames);
        }

        Some(frame)
    }

    /// Drops everything not yet written.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();

        inner.messages.clear();
        inner.current = None;
    }

    /// Wakes the connection loop.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{CloseCode, CloseFrame, OpCode};

    fn drain(queue: &SendQueue) -> Vec<Frame> {
        core::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn keeps_fifo_order() {
        let queue = SendQueue::new(1024);

        queue.push(Message::Text("one".into()));
        queue.push(Message::Binary(Bytes::from_static(b"two")));
        queue.push(Message::Close(Some(CloseFrame::no_reason(CloseCode::Normal))));

        let opcodes: Vec<_> = drain(&queue).iter().map(Frame::opcode).collect();

        assert_eq!(opcodes, [OpCode::Text, OpCode::Binary, OpCode::Close]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pings_interleave_between_fragments() {
        let queue = SendQueue::new(2);

        queue.push(Message::Text("abcdef".into()));

        let first = queue.pop().unwrap();
        assert_eq!(first.opcode(), OpCode::Text);
        assert!(!first.is_final());

        queue.push(Message::Ping(Bytes::from_static(b"p")));

        let opcodes: Vec<_> = drain(&queue)
            .iter()
            .map(|frame| (frame.opcode(), frame.is_final()))
            .collect();

        assert_eq!(
            opcodes,
            [
                (OpCode::Ping, true),
                (OpCode::Continuation, false),
                (OpCode::Continuation, true),
            ]
        );
    }

    #[test]
    fn close_never_overtakes_a_fragmented_message() {
        let queue = SendQueue::new(2);

        queue.push(Message::Binary(Bytes::from_static(b"abcd")));
        queue.push(Message::Close(None));

        let opcodes: Vec<_> = drain(&queue).iter().map(Frame::opcode).collect();

        assert_eq!(
            opcodes,
            [OpCode::Binary, OpCode::Continuation, OpCode::Close]
        );
    }

    #[test]
    fn concurrent_producers_never_split_messages() {
        let queue = std::sync::Arc::new(SendQueue::new(3));

        let producers: Vec<_> = (0..4u8)
            .map(|producer| {
                let queue = queue.clone();

                std::thread::spawn(move || {
                    for _ in 0..50 {
                        queue.push(Message::Binary(Bytes::from(vec![producer; 10])));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let frames = drain(&queue);
        let mut message: Vec<u8> = Vec::new();
        let mut messages = 0;

        for frame in frames {
            message.extend_from_slice(frame.payload());

            if frame.is_final() {
                assert_eq!(message.len(), 10);
                assert!(message.iter().all(|byte| *byte == message[0]));

                message.clear();
                messages += 1;
            }
        }

        assert_eq!(messages, 200);
    }

    #[test]
    fn clear_drops_pending_fragments() {
        let queue = SendQueue::new(1);

        queue.push(Message::Text("abc".into()));
        let _ = queue.pop();

        queue.clear();

        assert!(queue.pop().is_none());
    }
}
