use std::fmt;
use std::io;

/// Errors produced by the protocol codec. Mirrors the `Wait`/`Fatal` split the
/// rest of the workspace uses: `Incomplete` is routine (the parser just needs
/// more bytes) while the other variants close the connection.
#[derive(Debug, Eq, PartialEq)]
pub enum ProtoError {
    /// Not enough bytes buffered yet to parse a complete request.
    Incomplete,
    /// An inline line or a bulk length exceeded the 256 MiB hard limit.
    RequestTooLarge,
    /// The request was structurally malformed (bad prefix, non-numeric
    /// length, negative bulk count, etc).
    Malformed(&'static str),
    Io(io::ErrorKind),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::Incomplete => write!(f, "incomplete request"),
            ProtoError::RequestTooLarge => write!(f, "protocol error: too large request"),
            ProtoError::Malformed(msg) => write!(f, "protocol error: {}", msg),
            ProtoError::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

impl std::error::Error for ProtoError {}

impl From<io::Error> for ProtoError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ProtoError::Incomplete,
            kind => ProtoError::Io(kind),
        }
    }
}

impl ProtoError {
    /// A malformed or oversized request means the connection must close;
    /// `Incomplete` means "try again once more bytes arrive".
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtoError::Incomplete)
    }
}
