//! Wire-level primitives shared by the rest of the workspace: the growable
//! network buffer, the inline/multi-bulk request parser, reply encoding and
//! the timestamp helpers the expiration and persistence layers build on.

pub mod buffer;
pub mod error;
pub mod parser;
pub mod reply;
pub mod time;

pub use buffer::Buffer;
pub use error::ProtoError;
pub use parser::{ParseOutcome, Parser};
pub use reply::{format_double, Reply};
