use crate::error::FrameDecodeError;

/// The opcode of a WebSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continues a fragmented text or binary message.
    Continuation,
    /// First (or only) frame of a text message.
    Text,
    /// First (or only) frame of a binary message.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    /// Close, Ping and Pong are control frames.
    pub const fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Text and Binary start a data message.
    pub const fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }

    pub const fn into_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameDecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(FrameDecodeError::InvalidOpCode { opcode: value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        for opcode in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::try_from(u8::from(opcode)).unwrap(), opcode);
        }
    }

    #[test]
    fn reserved_opcodes_are_rejected() {
        for value in [0x3, 0x7, 0xB, 0xF] {
            assert!(matches!(
                OpCode::try_from(value),
                Err(FrameDecodeError::InvalidOpCode { opcode }) if opcode == value
            ));
        }
    }
}
