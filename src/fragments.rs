use bytes::{Bytes, BytesMut};

use crate::{CloseCode, CloseFrame, Frame, Message, OpCode, error::ProtocolError};

/// Outgoing frames of one message.
#[derive(Debug)]
pub enum FragmentsIterator {
    Once(core::iter::Once<Frame>),
    Iter(Iter),
}

impl FragmentsIterator {
    pub fn new(data: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        match data.len() {
            0 => Self::single(Frame::new(true, opcode, Bytes::new())),
            _ => Self::Iter(Iter::new(data, opcode, fragment_size)),
        }
    }

    pub fn single(frame: Frame) -> Self {
        Self::Once(core::iter::once(frame))
    }
}

impl Iterator for FragmentsIterator {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Once(iter) => iter.next(),
            Self::Iter(iter) => iter.next(),
        }
    }
}

#[derive(Debug)]
pub struct Iter {
    data: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    pos: usize,
}

impl Iter {
    pub fn new(data: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            data,
            opcode,
            fragment_size: fragment_size.max(1),
            pos: 0,
        }
    }
}

impl Iterator for Iter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let end = (self.pos + self.fragment_size).min(self.data.len());
        self.pos = end;

        let fin = self.pos == self.data.len();
        let opcode = if start == 0 {
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(fin, opcode, self.data.slice(start..end)))
    }
}

#[derive(Debug)]
struct Fragmented {
    opcode: OpCode,
    buffer: BytesMut,
}

/// Reassembles incoming frames into messages.
///
/// Control frames pass through without touching a pending fragmented message.
#[derive(Debug)]
pub struct FragmentsState {
    fragmented: Option<Fragmented>,
    max_message_size: usize,
}

impl FragmentsState {
    pub const fn new(max_message_size: usize) -> Self {
        Self {
            fragmented: None,
            max_message_size,
        }
    }

    /// Whether a fragmented message is waiting for its final frame.
    pub const fn is_pending(&self) -> bool {
        self.fragmented.is_some()
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        Ok(())
    }

    /// Feeds one frame. Returns a message once one is complete.
    pub fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode() {
            OpCode::Text | OpCode::Binary => {
                if self.fragmented.is_some() {
                    return Err(ProtocolError::InvalidFragment);
                }

                self.check_size(frame.payload().len())?;

                let opcode = frame.opcode();

                if frame.is_final() {
                    return message(opcode, frame.into_payload()).map(Some);
                }

                self.fragmented = Some(Fragmented {
                    opcode,
                    buffer: BytesMut::from(frame.payload().as_ref()),
                });
            }
            OpCode::Continuation => {
                let fin = frame.is_final();

                let Some(fragmented) = self.fragmented.as_mut() else {
                    return Err(ProtocolError::InvalidContinuationFrame);
                };

                let size = fragmented.buffer.len() + frame.payload().len();

                if size > self.max_message_size {
                    self.fragmented = None;

                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        max: self.max_message_size,
                    });
                }

                fragmented.buffer.extend_from_slice(frame.payload());

                if fin {
                    if let Some(fragmented) = self.fragmented.take() {
                        return message(fragmented.opcode, fragmented.buffer.freeze()).map(Some);
                    }
                }
            }
            OpCode::Close => {
                return extract_close_frame(frame.payload()).map(|close| Some(Message::Close(close)));
            }
            OpCode::Ping => {
                return Ok(Some(Message::Ping(frame.into_payload())));
            }
            OpCode::Pong => {
                return Ok(Some(Message::Pong(frame.into_payload())));
            }
        }

        Ok(None)
    }
}

fn message(opcode: OpCode, payload: Bytes) -> Result<Message, ProtocolError> {
    match opcode {
        OpCode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| ProtocolError::InvalidUTF8),
        _ => Ok(Message::Binary(payload)),
    }
}

pub fn extract_close_frame(payload: &[u8]) -> Result<Option<CloseFrame>, ProtocolError> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(ProtocolError::InvalidCloseFrame),
        _ => {
            let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));

            if !code.is_allowed() {
                return Err(ProtocolError::InvalidCloseCode { code });
            }

            match core::str::from_utf8(&payload[2..]) {
                Ok(reason) => Ok(Some(CloseFrame::new(code, reason))),
                Err(_) => Err(ProtocolError::InvalidUTF8),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod outgoing {
        use super::*;

        #[test]
        fn splits_at_fragment_size() {
            let frames: Vec<_> =
                FragmentsIterator::new(Bytes::from_static(b"abcdefg"), OpCode::Text, 3).collect();

            assert_eq!(frames.len(), 3);

            assert_eq!(frames[0].opcode(), OpCode::Text);
            assert!(!frames[0].is_final());
            assert_eq!(frames[0].payload().as_ref(), b"abc");

            assert_eq!(frames[1].opcode(), OpCode::Continuation);
            assert!(!frames[1].is_final());

            assert_eq!(frames[2].opcode(), OpCode::Continuation);
            assert!(frames[2].is_final());
            assert_eq!(frames[2].payload().as_ref(), b"g");
        }

        #[test]
        fn small_message_is_one_frame() {
            let frames: Vec<_> =
                FragmentsIterator::new(Bytes::from_static(b"abc"), OpCode::Binary, 16).collect();

            assert_eq!(frames, [Frame::new(true, OpCode::Binary, &b"abc"[..])]);
        }

        #[test]
        fn empty_message_is_one_final_frame() {
            let frames: Vec<_> = FragmentsIterator::new(Bytes::new(), OpCode::Text, 16).collect();

            assert_eq!(frames, [Frame::new(true, OpCode::Text, Bytes::new())]);
        }
    }

    mod incoming {
        use super::*;

        fn state() -> FragmentsState {
            FragmentsState::new(1024)
        }

        #[test]
        fn reassembles_text() {
            let mut state = state();

            assert_eq!(state.on_frame(Frame::new(false, OpCode::Text, &b"Hel"[..])), Ok(None));
            assert_eq!(
                state.on_frame(Frame::new(false, OpCode::Continuation, &b"lo, "[..])),
                Ok(None)
            );
            assert_eq!(
                state.on_frame(Frame::new(true, OpCode::Continuation, &b"world"[..])),
                Ok(Some(Message::Text("Hello, world".into())))
            );
            assert!(!state.is_pending());
        }

        #[test]
        fn control_frames_do_not_disturb_reassembly() {
            let mut state = state();

            state
                .on_frame(Frame::new(false, OpCode::Binary, &b"ab"[..]))
                .unwrap();

            assert_eq!(
                state.on_frame(Frame::ping(&b"p"[..])),
                Ok(Some(Message::Ping(Bytes::from_static(b"p"))))
            );
            assert!(state.is_pending());

            assert_eq!(
                state.on_frame(Frame::new(true, OpCode::Continuation, &b"cd"[..])),
                Ok(Some(Message::Binary(Bytes::from_static(b"abcd"))))
            );
        }

        #[test]
        fn continuation_without_message() {
            assert_eq!(
                state().on_frame(Frame::new(true, OpCode::Continuation, &b"A"[..])),
                Err(ProtocolError::InvalidContinuationFrame)
            );
        }

        #[test]
        fn new_data_frame_while_pending() {
            let mut state = state();

            state
                .on_frame(Frame::new(false, OpCode::Text, &b"A"[..]))
                .unwrap();

            assert_eq!(
                state.on_frame(Frame::new(true, OpCode::Binary, &b"B"[..])),
                Err(ProtocolError::InvalidFragment)
            );
        }

        #[test]
        fn invalid_utf8_after_reassembly() {
            let mut state = state();

            state
                .on_frame(Frame::new(false, OpCode::Text, vec![0xE2u8, 0x82]))
                .unwrap();

            assert_eq!(
                state.on_frame(Frame::new(true, OpCode::Continuation, vec![0x28u8])),
                Err(ProtocolError::InvalidUTF8)
            );
        }

        #[test]
        fn utf8_split_across_frames() {
            let mut state = state();
            let euro = "€".as_bytes();

            state
                .on_frame(Frame::new(false, OpCode::Text, &euro[..1]))
                .unwrap();

            assert_eq!(
                state.on_frame(Frame::new(true, OpCode::Continuation, &euro[1..])),
                Ok(Some(Message::Text("€".into())))
            );
        }

        #[test]
        fn message_too_large() {
            let mut state = FragmentsState::new(4);

            state
                .on_frame(Frame::new(false, OpCode::Binary, &b"abc"[..]))
                .unwrap();

            assert!(matches!(
                state.on_frame(Frame::new(true, OpCode::Continuation, &b"de"[..])),
                Err(ProtocolError::MessageTooLarge { size: 5, max: 4 })
            ));
        }

        #[test]
        fn close_frames() {
            assert_eq!(extract_close_frame(&[]), Ok(None));
            assert_eq!(
                extract_close_frame(&[0x03]),
                Err(ProtocolError::InvalidCloseFrame)
            );
            assert_eq!(
                extract_close_frame(&[0x03, 0xED]),
                Err(ProtocolError::InvalidCloseCode {
                    code: CloseCode::Status
                })
            );
            assert_eq!(
                extract_close_frame(&[0x03, 0xE8, 0xFF]),
                Err(ProtocolError::InvalidUTF8)
            );
            assert_eq!(
                extract_close_frame(&[0x0F, 0xA0, b'o', b'k']),
                Ok(Some(CloseFrame::new(CloseCode::Application(4000), "ok")))
            );
        }
    }
}
