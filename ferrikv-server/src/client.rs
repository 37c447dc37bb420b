//! Per-connection client state (spec §3 "Client state"). Grounded on the
//! teacher's `Channel` (`net/channel.rs`): socket + buffered ingress/egress +
//! a small state machine, generalized here from the teacher's crypto
//! handshake states to this protocol's much simpler "optionally
//! authenticated" state.

use crate::connection::ReplyQueue;
use ferrikv_core::ClientId;
use ferrikv_proto::{Buffer, Parser};
use mio::net::TcpStream;
use std::net::SocketAddr;

/// A client parked on `BLPOP`/`BRPOP` (spec §4.4): which keys it's waiting
/// on, its absolute deadline (`None` = block forever), and which end of the
/// list each command variant pops from.
pub struct BlockedState {
    pub keys: Vec<Vec<u8>>,
    pub deadline: Option<u64>,
    pub pop_left: bool,
}

/// Why a client's input is currently being believed: ordinary client,
/// MONITOR feed subscriber, or the live replication link to one of our
/// replicas. A client can also simultaneously be *our* master connection
/// (`is_master`), in which case its replies are suppressed (spec §4.11).
pub struct Client {
    pub id: ClientId,
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub db_index: usize,
    pub input: Buffer,
    pub parser: Parser,
    pub output: ReplyQueue,
    pub authenticated: bool,
    pub is_slave: bool,
    pub is_master: bool,
    pub is_monitor: bool,
    pub in_multi: bool,
    pub multi_queue: Vec<Vec<Vec<u8>>>,
    pub multi_error: bool,
    pub blocked: Option<BlockedState>,
    pub last_interaction: u64,
    pub close_after_reply: bool,
    pub replica_id: Option<u64>,
    pub writable_registered: bool,
}

impl Client {
    pub fn new(id: ClientId, stream: TcpStream, peer_addr: SocketAddr, now: u64) -> Client {
        Client {
            id,
            stream,
            peer_addr,
            db_index: 0,
            input: Buffer::new(ferrikv_proto::parser::MAX_REQUEST_SIZE),
            parser: Parser::new(),
            output: ReplyQueue::new(),
            authenticated: false,
            is_slave: false,
            is_master: false,
            is_monitor: false,
            in_multi: false,
            multi_queue: Vec::new(),
            multi_error: false,
            blocked: None,
            last_interaction: now,
            close_after_reply: false,
            replica_id: None,
            writable_registered: false,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    /// Idle timeouts never apply to masters or replicas (spec §4.11, §5).
    pub fn exempt_from_idle_timeout(&self) -> bool {
        self.is_master || self.is_slave
    }
}
