//! The virtual-memory pager (spec §4.12): swap-file page allocation,
//! swap-out candidate scoring, the threaded job pipeline, and the
//! synchronous blocking-mode fallback.

pub mod bitmap;
pub mod error;
pub mod jobs;
pub mod pager;
pub mod scoring;

pub use bitmap::PageBitmap;
pub use error::PagerError;
pub use pager::{Pager, DEFAULT_PAGE_SIZE};
pub use scoring::{pick_swap_out_candidate, Candidate};
