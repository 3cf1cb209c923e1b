use crate::CloseCode;

/// The payload of a close frame: a status code and a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The reason as a code.
    code: CloseCode,
    /// The reason as text string.
    reason: String,
}

impl CloseFrame {
    /// The largest reason that fits in a control frame next to the 2-byte code.
    pub const MAX_REASON_LEN: usize = 123;

    /// Creates a new [`CloseFrame`].
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn no_reason(code: CloseCode) -> Self {
        Self::new(code, String::new())
    }

    /// Returns the close code.
    pub const fn code(&self) -> CloseCode {
        self.code
    }

    /// Returns the reason as a string slice.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Encoded length on the wire.
    pub fn encoded_len(&self) -> usize {
        2 + self.reason.len()
    }

    /// Writes the big-endian code followed by the reason.
    pub fn write(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.code.into_u16().to_be_bytes());
        dst.extend_from_slice(self.reason.as_bytes());
    }
}
