use bytes::{BufMut, Bytes, BytesMut};

use crate::{CloseFrame, OpCode};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A single WebSocket frame, unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    fin: bool,
    /// The opcode of the frame.
    opcode: OpCode,
    /// The payload of the frame.
    payload: Bytes,
}

impl Frame {
    /// Creates a new `Frame` instance.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, OpCode::Text, Bytes::from(text.into()))
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    pub fn close(close_frame: Option<&CloseFrame>) -> Self {
        let mut payload = Vec::new();

        if let Some(close_frame) = close_frame {
            close_frame.write(&mut payload);
        }

        Self::new(true, OpCode::Close, payload)
    }

    /// Returns whether this is the final frame in a message.
    pub const fn is_final(&self) -> bool {
        self.fin
    }

    /// Returns the opcode of the frame.
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns the payload of the frame.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

#[derive(Debug)]
pub struct Header {
    /// Indicates if this is the final frame in a message.
    fin: bool,
    /// The opcode of the frame.
    opcode: OpCode,
    /// The masking key, if the frame is masked.
    mask: Option<[u8; 4]>,
    /// The length of the payload.
    payload_len: u64,
}

impl Header {
    pub const fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload_len: u64) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload_len,
        }
    }

    /// Number of bytes [`Header::write`] appends.
    pub const fn encoded_len(&self) -> usize {
        let extended = match self.payload_len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };

        let mask = match self.mask {
            Some(_) => 4,
            None => 0,
        };

        2 + extended + mask
    }

    /// Appends the header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());

        dst.put_u8((self.fin as u8) << 7 | self.opcode.into_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };

        match self.payload_len {
            len @ 0..=125 => dst.put_u8(mask_bit | len as u8),
            len @ 126..=65535 => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            len => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len);
            }
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(header: Header) -> Vec<u8> {
        let mut dst = BytesMut::new();
        header.write(&mut dst);

        assert_eq!(dst.len(), header.encoded_len());

        dst.to_vec()
    }

    #[test]
    fn inline_length() {
        assert_eq!(written(Header::new(true, OpCode::Text, None, 5)), [0x81, 0x05]);
        assert_eq!(written(Header::new(false, OpCode::Binary, None, 125)), [0x02, 125]);
    }

    #[test]
    fn extended_16_bit_length() {
        assert_eq!(
            written(Header::new(true, OpCode::Binary, None, 126)),
            [0x82, 126, 0x00, 126]
        );
        assert_eq!(
            written(Header::new(true, OpCode::Binary, None, 65535)),
            [0x82, 126, 0xFF, 0xFF]
        );
    }

    #[test]
    fn extended_64_bit_length() {
        assert_eq!(
            written(Header::new(true, OpCode::Binary, None, 65536)),
            [0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]
        );
    }

    #[test]
    fn masked() {
        assert_eq!(
            written(Header::new(true, OpCode::Ping, Some([1, 2, 3, 4]), 0)),
            [0x89, 0x80, 1, 2, 3, 4]
        );
    }

    #[test]
    fn close_payload() {
        let frame = Frame::close(Some(&CloseFrame::new(crate::CloseCode::Normal, "bye")));

        assert_eq!(frame.payload().as_ref(), &[0x03, 0xE8, b'b', b'y', b'e']);
        assert!(Frame::close(None).payload().is_empty());
    }
}
