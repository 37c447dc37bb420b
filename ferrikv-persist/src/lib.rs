//! On-disk persistence: the RDB snapshot codec (§4.8) and the append-only
//! log (§4.9), plus the `fork()`-based backgrounding both share for
//! non-blocking saves and rewrites.

pub mod aof;
pub mod error;
pub mod fork;
pub mod rdb;

pub use aof::{AofWriter, FsyncPolicy};
pub use error::PersistError;
pub use rdb::{decode_object, encode_object};
