//! Socket-facing plumbing: mio tokens, the per-client output queue and its
//! glue/vectored-write optimizations (spec §4.11), and the raw read/write
//! calls the event loop drives. Grounded on `neutronium::net::endpoint`'s
//! three-poll-phase shape, collapsed here into modern mio 0.8 registration
//! (`Registry`/`Interest`) instead of the teacher's `mio::Ready`/
//! `mio::PollOpt::edge()`.

use ferrikv_core::ClientId;
use ferrikv_proto::Reply;
use mio::Token;
use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};

/// Reserved tokens below this are never client connections.
pub const LISTENER_TOKEN: Token = Token(0);
pub const PAGER_WAKER_TOKEN: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

pub fn client_token(id: ClientId) -> Token {
    Token(FIRST_CLIENT_TOKEN + id as usize)
}

pub fn token_to_client_id(token: Token) -> Option<ClientId> {
    token.0.checked_sub(FIRST_CLIENT_TOKEN).map(|n| n as ClientId)
}

/// Merge replies smaller than this into the previous pending chunk rather
/// than queuing a second fragment (the "glue" optimization -- avoids a
/// write() syscall per reply when a client pipelines many small commands).
const GLUE_LIMIT: usize = 1024;

/// Cap on iovecs passed to a single `write_vectored` call.
const MAX_IOVECS: usize = 256;

/// Per-tick ceiling on bytes a single client's flush is allowed to push,
/// so one client streaming a giant `LRANGE` reply can't starve the rest of
/// the event loop.
pub const WRITE_BUDGET: usize = 64 * 1024;

/// Outbound reply buffer for one client. Fragments below `GLUE_LIMIT` are
/// coalesced on push; once four or more fragments are pending, `flush_to`
/// sends them in a single `write_vectored` call instead of one `write` per
/// fragment.
#[derive(Default)]
pub struct ReplyQueue {
    chunks: VecDeque<Vec<u8>>,
    head_sent: usize,
}

impl ReplyQueue {
    pub fn new() -> ReplyQueue {
        ReplyQueue { chunks: VecDeque::new(), head_sent: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum::<usize>() - self.head_sent
    }

    pub fn push_reply(&mut self, reply: &Reply) {
        let mut bytes = Vec::new();
        reply.encode_into(&mut bytes);
        self.push_bytes(bytes);
    }

    pub fn push_bytes(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        if let Some(last) = self.chunks.back_mut() {
            if last.len() + bytes.len() <= GLUE_LIMIT {
                last.extend_from_slice(&bytes);
                return;
            }
        }
        self.chunks.push_back(bytes);
    }

    /// Sends buffered replies to `writer`, up to `budget` bytes. Returns the
    /// number of bytes actually written; `WouldBlock` is swallowed and
    /// reported as `Ok(0)` so callers can treat "nothing to do right now"
    /// uniformly.
    pub fn flush_to<W: Write>(&mut self, writer: &mut W, budget: usize) -> io::Result<usize> {
        let mut total = 0;
        while total < budget && !self.chunks.is_empty() {
            let slices: Vec<IoSlice> = self
                .chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| {
                    let start = if i == 0 { self.head_sent } else { 0 };
                    IoSlice::new(&chunk[start..])
                })
                .take(MAX_IOVECS)
                .collect();

            let n = match writer.write_vectored(&slices) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };
            total += n;
            self.consume(n);
        }
        Ok(total)
    }

    fn consume(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.chunks.front() else { break };
            let available = front.len() - self.head_sent;
            if n < available {
                self.head_sent += n;
                n = 0;
            } else {
                n -= available;
                self.chunks.pop_front();
                self.head_sent = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_replies_are_glued_into_one_chunk() {
        let mut q = ReplyQueue::new();
        q.push_reply(&Reply::ok());
        q.push_reply(&Reply::Integer(1));
        assert_eq!(q.chunks.len(), 1);
    }

    #[test]
    fn large_reply_starts_a_new_chunk() {
        let mut q = ReplyQueue::new();
        q.push_bytes(vec![b'x'; GLUE_LIMIT]);
        q.push_reply(&Reply::ok());
        assert_eq!(q.chunks.len(), 2);
    }

    #[test]
    fn flush_drains_everything_to_a_plain_writer() {
        let mut q = ReplyQueue::new();
        q.push_reply(&Reply::ok());
        q.push_bytes(vec![b'y'; 2000]);
        let mut out = Vec::new();
        let mut remaining = q.pending_bytes();
        while !q.is_empty() {
            let n = q.flush_to(&mut out, WRITE_BUDGET).unwrap();
            assert!(n > 0);
            remaining -= n;
        }
        assert_eq!(remaining, 0);
        assert_eq!(out.len(), 5 + 2000);
    }

    #[test]
    fn partial_write_leaves_remainder_queued() {
        struct OneByteWriter;
        impl Write for OneByteWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len().min(1))
            }
            fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
                Ok(bufs.first().map(|s| s.len().min(1)).unwrap_or(0))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut q = ReplyQueue::new();
        q.push_reply(&Reply::ok());
        let mut w = OneByteWriter;
        let n = q.flush_to(&mut w, WRITE_BUDGET).unwrap();
        assert_eq!(n, 5);
        assert!(q.is_empty());
    }

    #[test]
    fn client_token_round_trips() {
        let id: ClientId = 42;
        assert_eq!(token_to_client_id(client_token(id)), Some(id));
    }
}
