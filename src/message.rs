use bytes::Bytes;

use crate::{CloseFrame, Frame, OpCode, fragments::FragmentsIterator};

/// A complete WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A UTF-8 text message.
    Text(String),
    /// A binary WebSocket message
    Binary(Bytes),
    /// A ping message with the specified payload
    ///
    /// The payload here must have a length less than 126 bytes
    Ping(Bytes),
    /// A pong message with the specified payload
    ///
    /// The payload here must have a length less than 126 bytes
    Pong(Bytes),
    /// A close message with the optional close frame.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        matches!(*self, Message::Text(_))
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(*self, Message::Binary(_))
    }

    /// Indicates whether a message is a ping message.
    pub fn is_ping(&self) -> bool {
        matches!(*self, Message::Ping(_))
    }

    /// Indicates whether a message is a pong message.
    pub fn is_pong(&self) -> bool {
        matches!(*self, Message::Pong(_))
    }

    /// Indicates whether a message is a close message.
    pub fn is_close(&self) -> bool {
        matches!(*self, Message::Close(_))
    }

    pub const fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }

    /// Get the length of the WebSocket message.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(payload) => payload.len(),
            Message::Binary(payload) | Message::Ping(payload) | Message::Pong(payload) => {
                payload.len()
            }
            Message::Close(Some(frame)) => frame.encoded_len(),
            Message::Close(None) => 0,
        }
    }

    /// Returns true if the WebSocket message has no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the message into frames of at most `fragment_size` payload bytes.
    ///
    /// Control messages always produce exactly one frame.
    pub(crate) fn into_fragments(self, fragment_size: usize) -> FragmentsIterator {
        match self {
            Message::Text(text) => {
                FragmentsIterator::new(Bytes::from(text), OpCode::Text, fragment_size)
            }
            Message::Binary(payload) => {
                FragmentsIterator::new(payload, OpCode::Binary, fragment_size)
            }
            Message::Ping(payload) => FragmentsIterator::single(Frame::ping(payload)),
            Message::Pong(payload) => FragmentsIterator::single(Frame::pong(payload)),
            Message::Close(close_frame) => {
                FragmentsIterator::single(Frame::close(close_frame.as_ref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CloseCode;

    #[test]
    fn lengths() {
        assert_eq!(Message::Text("hello".into()).len(), 5);
        assert_eq!(Message::Close(None).len(), 0);
        assert_eq!(
            Message::Close(Some(CloseFrame::new(CloseCode::Normal, "bye"))).len(),
            5
        );
        assert!(Message::Ping(Bytes::new()).is_empty());
    }

    #[test]
    fn control_messages_are_never_fragmented() {
        let frames: Vec<_> = Message::Ping(Bytes::from_static(b"0123456789"))
            .into_fragments(2)
            .collect();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_final());
        assert_eq!(frames[0].opcode(), OpCode::Ping);
    }
}
