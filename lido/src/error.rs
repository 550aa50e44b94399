// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

use codec::ReasonCode;

/// Represent the types of errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed bytes, impossible lengths, or a forbidden field for the
    /// negotiated protocol level. Always fatal for the connection.
    ProtocolError,

    /// The broker rejected CONNECT with a terminal reason code.
    ConnectionRefused(ReasonCode),

    /// No packet arrived within 1.5 times the keep-alive interval.
    KeepAliveTimeout,

    /// Failure of the underlying byte stream.
    TransportError,

    /// The peer violated its own advertised quota.
    FlowControlError,

    /// A client-side precondition failed; nothing was sent.
    ValidationError,

    /// A 5.0 negative acknowledgement; the code is preserved for
    /// inspection.
    ServerReasonCode(ReasonCode),

    /// The caller-supplied cancellation handle fired.
    OperationCancelled,

    /// Operation issued after `disconnect`.
    SessionClosed,

    /// Pending work abandoned because the connection ended without a
    /// reconnect path.
    ConnectionAborted,

    /// Operation that needs an active connection was issued while the
    /// session was offline.
    NotConnected,

    /// All 65535 packet ids are inflight.
    IdsExhausted,

    /// Session store failure.
    StoreError,

    /// Unusable connect options, like a malformed server URI.
    ConfigError,
}

/// Error type of the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::TransportError, format!("IoError {err}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        match err {
            codec::DecodeError::Io(io_kind) => Self::from_string(
                ErrorKind::TransportError,
                format!("Transport read error: {io_kind:?}"),
            ),
            codec::DecodeError::OutOfRange => {
                Self::new(ErrorKind::TransportError, "Transport closed mid packet")
            }
            err => Self::from_string(ErrorKind::ProtocolError, format!("{err:?}")),
        }
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        match err {
            codec::EncodeError::Io(io_kind) => Self::from_string(
                ErrorKind::TransportError,
                format!("Transport write error: {io_kind:?}"),
            ),
            codec::EncodeError::PacketTooLarge => {
                Self::new(ErrorKind::ValidationError, "Packet exceeds size limit")
            }
            err => Self::from_string(ErrorKind::ValidationError, format!("{err:?}")),
        }
    }
}

impl From<codec::topic::TopicError> for Error {
    fn from(err: codec::topic::TopicError) -> Self {
        Self::from_string(ErrorKind::ValidationError, format!("Invalid topic: {err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_preserved() {
        let err = Error::new(
            ErrorKind::ConnectionRefused(ReasonCode::NotAuthorized),
            "refused",
        );
        assert_eq!(
            err.kind(),
            &ErrorKind::ConnectionRefused(ReasonCode::NotAuthorized)
        );
        assert_eq!(err.to_string(), "ConnectionRefused(NotAuthorized): refused");
    }
}
