use ferrikv_persist::PersistError;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum PagerError {
    Io(io::Error),
    Codec(PersistError),
    SwapFileFull,
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagerError::Io(err) => write!(f, "pager io error: {}", err),
            PagerError::Codec(err) => write!(f, "pager codec error: {}", err),
            PagerError::SwapFileFull => write!(f, "swap file exhausted"),
        }
    }
}

impl std::error::Error for PagerError {}

impl From<io::Error> for PagerError {
    fn from(err: io::Error) -> PagerError {
        PagerError::Io(err)
    }
}

impl From<PersistError> for PagerError {
    fn from(err: PersistError) -> PagerError {
        PagerError::Codec(err)
    }
}
