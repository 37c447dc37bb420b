//! Command handlers, grouped by value type the way the teacher splits
//! `t51game`'s systems by the component they operate on. Every handler has
//! the shape `fn(&mut Server, ClientId, &[Vec<u8>]) -> Outcome` so the
//! dispatch table in `server.rs` can hold them as plain function pointers.

pub mod admin;
pub mod keys;
pub mod lists;
pub mod sets;
pub mod strings;
pub mod zsets;

use crate::error;
use crate::server::Server;
use ferrikv_core::ClientId;
use ferrikv_proto::Reply;

pub(crate) fn db_index(srv: &Server, id: ClientId) -> usize {
    srv.clients.get(&id).map(|c| c.db_index).unwrap_or(0)
}

pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(error::not_an_integer)
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Result<f64, Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(error::not_a_valid_float)
}
