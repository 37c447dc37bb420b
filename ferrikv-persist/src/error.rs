use std::fmt;
use std::io;

/// Errors a snapshot or log operation can fail with. Kept as a small hand
/// rolled enum rather than a generic wrapper so callers can distinguish a
/// corrupt file from a plain I/O failure.
#[derive(Debug)]
pub enum PersistError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(Vec<u8>),
    Corrupt(&'static str),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(err) => write!(f, "io error: {}", err),
            PersistError::BadMagic => write!(f, "not a recognized snapshot file"),
            PersistError::UnsupportedVersion(v) => {
                write!(f, "unsupported snapshot version: {:?}", v)
            }
            PersistError::Corrupt(what) => write!(f, "corrupt snapshot: {}", what),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> PersistError {
        PersistError::Io(err)
    }
}
