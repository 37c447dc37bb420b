pub mod expire;
pub mod keyspace;
pub mod memcap;
pub mod shared;
pub mod skiplist;
pub mod sort;
pub mod value;

pub use expire::active_expire_cycle;
pub use keyspace::{ClientId, Database, Entry, Keyspace};
pub use memcap::{reclaim, used_memory};
pub use shared::SharedObjects;
pub use skiplist::SkipList;
pub use sort::{sort, SortError, SortOptions};
pub use value::{Bytes, Object, ObjectRef, StrValue, Storage, SwapDescriptor, SwappedKind, ValueData, ZSet};
