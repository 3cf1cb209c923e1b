/// A WebSocket close code.
///
/// The registered codes 1000 to 1015 have named variants. Codes in 3000..=4999
/// belong to libraries and applications and are carried as [`CloseCode::Application`]
/// without further validation.
#[repr(u16)]
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// The purpose for which the connection was established has been fulfilled.
    Normal = 1000,
    /// An endpoint is going away, e.g. the handle owning the connection was dropped.
    Away = 1001,
    /// The connection is terminated because of a protocol error.
    Protocol = 1002,
    /// A type of data was received that the endpoint cannot accept.
    Unsupported = 1003,
    /// No status code was present in the received close frame.
    ///
    /// Reported locally, never sent on the wire.
    Status = 1005,
    /// The connection was closed without a close frame.
    ///
    /// Reported locally, never sent on the wire.
    Abnormal = 1006,
    /// A message contained data inconsistent with its type, e.g. invalid UTF-8 in a text message.
    Invalid = 1007,
    /// A message violated the endpoint's policy.
    Policy = 1008,
    /// A message was too big to process.
    Size = 1009,
    /// The server did not negotiate a required extension.
    Extension = 1010,
    /// The server hit an unexpected condition.
    Error = 1011,
    /// The server is restarting.
    Restart = 1012,
    /// The server is overloaded, try again later.
    Again = 1013,
    /// The TLS handshake failed.
    ///
    /// Reported locally, never sent on the wire.
    Tls = 1015,
    /// Reserved by the protocol (1004, 1014 and 1016..=2999).
    Reserved(u16),
    /// Library, framework or application code (3000..=4999).
    Application(u16),
    /// Outside every valid range.
    Bad(u16),
}

impl CloseCode {
    /// Whether a peer may put this code in a close frame.
    pub const fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Bad(_)
                | CloseCode::Reserved(_)
                | CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
        )
    }

    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            1004 | 1014 | 1016..=2999 => Self::Reserved(code),
            3000..=4999 => Self::Application(code),
            _ => Self::Bad(code),
        }
    }

    pub const fn into_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::Status => 1005,
            Self::Abnormal => 1006,
            Self::Invalid => 1007,
            Self::Policy => 1008,
            Self::Size => 1009,
            Self::Extension => 1010,
            Self::Error => 1011,
            Self::Restart => 1012,
            Self::Again => 1013,
            Self::Tls => 1015,
            Self::Reserved(code) | Self::Application(code) | Self::Bad(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.into_u16()
    }
}

impl core::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.into_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_codes_round_trip() {
        for code in (1000..=1015).chain(3000..=3005).chain(4995..=4999) {
            assert_eq!(CloseCode::from_u16(code).into_u16(), code);
        }
    }

    #[test]
    fn application_codes_pass_through() {
        assert_eq!(CloseCode::from_u16(3000), CloseCode::Application(3000));
        assert_eq!(CloseCode::from_u16(4999), CloseCode::Application(4999));
        assert!(CloseCode::Application(4321).is_allowed());
    }

    #[test]
    fn local_only_and_reserved_codes_are_not_allowed() {
        for code in [999, 1004, 1005, 1006, 1014, 1015, 1016, 2999, 5000] {
            assert!(!CloseCode::from_u16(code).is_allowed(), "{code}");
        }
    }
}
