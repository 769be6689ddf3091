use std::fmt;
use std::io;

use thiserror::Error;

use crate::session::ReadyState;

/// A close status code (RFC 6455 section 7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    pub const PROTOCOL_ERROR: Self = Self(1002);
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// Reserved: no status code was present
    pub const NO_STATUS: Self = Self(1005);
    /// Reserved: the connection dropped without a close frame
    pub const ABNORMAL: Self = Self(1006);
    pub const INVALID_PAYLOAD: Self = Self(1007);
    pub const POLICY_VIOLATION: Self = Self(1008);
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    pub const MANDATORY_EXTENSION: Self = Self(1010);
    pub const INTERNAL_ERROR: Self = Self(1011);
    /// Reserved: TLS handshake failure
    pub const TLS_HANDSHAKE: Self = Self(1015);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Codes that only describe a closure locally and never appear in a close frame.
    pub fn is_reserved(self) -> bool {
        matches!(self.0, 1005 | 1006 | 1015)
    }

    /// Codes an endpoint may close with, reserved ones included.
    pub fn is_valid(self) -> bool {
        matches!(self.0, 1000..=1003 | 1005..=1011 | 1015 | 3000..=4999)
    }

    /// Codes a peer may put in a close frame.
    pub fn is_valid_on_wire(self) -> bool {
        self.is_valid() && !self.is_reserved()
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum WsError {
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("protocol error {code}: {reason}")]
    Protocol { code: CloseCode, reason: String },

    #[error("invalid state: {state:?}")]
    InvalidState { state: ReadyState },

    #[error("invalid close: {reason}")]
    InvalidCloseReason { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("session closed")]
    Closed,
}

impl WsError {
    pub fn handshake<S: ToString>(reason: S) -> Self {
        Self::Handshake { reason: reason.to_string() }
    }

    pub fn protocol<S: ToString>(code: CloseCode, reason: S) -> Self {
        Self::Protocol { code, reason: reason.to_string() }
    }

    pub fn invalid_close_reason<S: ToString>(reason: S) -> Self {
        Self::InvalidCloseReason { reason: reason.to_string() }
    }

    /// The code the session closes with after this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Protocol { code, .. } => *code,
            _ => CloseCode::ABNORMAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_classes() {
        assert!(CloseCode::NORMAL.is_valid_on_wire());
        assert!(CloseCode::new(4000).is_valid_on_wire());
        assert!(CloseCode::NO_STATUS.is_reserved());
        assert!(CloseCode::NO_STATUS.is_valid());
        assert!(!CloseCode::NO_STATUS.is_valid_on_wire());
        assert!(!CloseCode::new(1004).is_valid());
        assert!(!CloseCode::new(2000).is_valid());
        assert!(!CloseCode::new(999).is_valid());
    }

    #[test]
    fn error_close_code() {
        assert_eq!(WsError::protocol(CloseCode::MESSAGE_TOO_BIG, "too big").close_code(), CloseCode::MESSAGE_TOO_BIG);
        assert_eq!(WsError::Closed.close_code(), CloseCode::ABNORMAL);
        assert_eq!(WsError::protocol(CloseCode::PROTOCOL_ERROR, "unmasked").to_string(), "protocol error 1002: unmasked");
    }
}
