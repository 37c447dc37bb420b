//! Master/replica synchronization (spec §4.10): the replica-side handshake,
//! the master-side per-replica state machine and command feed, and the
//! `MONITOR` line formatter.

pub mod handshake;
pub mod monitor;
pub mod state;

pub use handshake::{handshake_commands, parse_bulk_size_header};
pub use monitor::format_monitor_line;
pub use state::{Master, MasterReplicaState, ReplicaHandle, ReplicaRole};
