//! Periodic housekeeping (spec §4.6, §4.8, §4.12), driven from `Server::run`
//! roughly every 100ms: active expiry, background-child reaping, the save
//! policy, pager upkeep, blocked-client timeouts, idle-client eviction, and
//! draining each replica's feed onto its socket.

use crate::client::BlockedState;
use crate::commands::admin;
use crate::server::Server;
use ferrikv_core::ClientId;
use ferrikv_persist::fork::poll_child;
use ferrikv_proto::time::timestamp_secs;
use ferrikv_proto::Reply;
use slog::{info, warn};

pub fn tick(srv: &mut Server) {
    let now = timestamp_secs();

    for (_, db) in srv.keyspace.iter_mut() {
        ferrikv_core::active_expire_cycle(db, now);
    }

    reap_rdb_child(srv, now);
    reap_aof_rewrite_child(srv);
    maybe_start_save(srv, now);
    tick_pager(srv, now);
    sweep_blocked_clients(srv, now);
    sweep_idle_clients(srv, now);
    drain_replica_feeds(srv);
}

fn reap_rdb_child(srv: &mut Server, now: u64) {
    let Some(pid) = srv.rdb_child else { return };
    let Some(success) = poll_child(pid) else { return };
    srv.rdb_child = None;
    if success {
        srv.last_save = now;
        srv.dirty = 0;
        info!(srv.log, "background save finished");
    } else {
        warn!(srv.log, "background save failed");
    }
}

/// On success, appends the writes that landed in `aof_rewrite_delta` while
/// the child was running, then re-opens the writer on the rewritten file
/// (spec §4.9 "bgrewriteaof"). The rewritten content was written straight to
/// the final path by the child rather than a temp-file-then-rename, a
/// simplification over the real two-file dance (see DESIGN.md).
fn reap_aof_rewrite_child(srv: &mut Server) {
    let Some(pid) = srv.aof_rewrite_child else { return };
    let Some(success) = poll_child(pid) else { return };
    srv.aof_rewrite_child = None;
    let delta = srv.aof_rewrite_delta.take().unwrap_or_default();

    if !success {
        warn!(srv.log, "background AOF rewrite failed");
        return;
    }

    let path = std::path::Path::new(&srv.config.dir).join(&srv.config.appendfilename);
    if let Ok(mut file) = std::fs::OpenOptions::new().append(true).open(&path) {
        use std::io::Write;
        for command in &delta {
            let _ = file.write_all(&ferrikv_persist::aof::encode_command(command));
        }
    }

    let policy = match srv.config.appendfsync {
        crate::config::AppendFsync::No => ferrikv_persist::FsyncPolicy::Never,
        crate::config::AppendFsync::Always => ferrikv_persist::FsyncPolicy::Always,
        crate::config::AppendFsync::EverySec => ferrikv_persist::FsyncPolicy::EverySec,
    };
    match ferrikv_persist::AofWriter::open(&path, policy) {
        Ok(writer) => {
            srv.aof = Some(writer);
            info!(srv.log, "background AOF rewrite finished");
        }
        Err(e) => warn!(srv.log, "failed to reopen AOF after rewrite"; "err" => %e),
    }
}

fn maybe_start_save(srv: &mut Server, now: u64) {
    if srv.rdb_child.is_some() || srv.dirty == 0 {
        return;
    }
    let due = srv
        .config
        .save_points
        .iter()
        .any(|&(secs, changes)| srv.dirty >= changes && now.saturating_sub(srv.last_save) >= secs);
    if due {
        let _ = admin::bgsave(srv, 0, &[]);
    }
}

fn tick_pager(srv: &mut Server, now: u64) {
    if srv.pager.is_none() {
        return;
    }
    if let Some(pager) = &srv.pager {
        pager.apply_completions(&mut srv.keyspace, 16);
    }
    if srv.config.vm_max_memory == 0 {
        return;
    }
    if ferrikv_core::used_memory(&srv.keyspace) <= srv.config.vm_max_memory {
        return;
    }
    let candidate = ferrikv_vm::pick_swap_out_candidate(&srv.keyspace, now);
    if let (Some(pager), Some(candidate)) = (&srv.pager, candidate) {
        pager.begin_swap_out(&mut srv.keyspace, candidate.db, &candidate.key);
    }
}

/// A `BLPOP`/`BRPOP` whose deadline has passed: dropped from every key's
/// waiter queue it was parked on and sent the nil multi-bulk reply (spec
/// §4.4 "the client... receives a nil multi-bulk reply").
struct TimedOutWaiter {
    id: ClientId,
    db: usize,
    keys: Vec<Vec<u8>>,
}

fn sweep_blocked_clients(srv: &mut Server, now: u64) {
    let timed_out: Vec<TimedOutWaiter> = srv
        .clients
        .values()
        .filter_map(|client| {
            let state: &BlockedState = client.blocked.as_ref()?;
            let due = state.deadline.map(|deadline| now >= deadline).unwrap_or(false);
            due.then(|| TimedOutWaiter {
                id: client.id,
                db: client.db_index,
                keys: state.keys.clone(),
            })
        })
        .collect();

    for waiter in timed_out {
        for key in &waiter.keys {
            srv.keyspace.db_mut(waiter.db).waiters_for(key).retain(|&w| w != waiter.id);
        }
        if let Some(client) = srv.clients.get_mut(&waiter.id) {
            client.blocked = None;
        }
        srv.reply_to(waiter.id, Reply::NilMulti);
    }
}

/// Idle timeouts never touch masters or replicas (spec §4.11, §5);
/// `timeout 0` disables the sweep entirely.
fn sweep_idle_clients(srv: &mut Server, now: u64) {
    if srv.config.timeout == 0 {
        return;
    }
    let idle: Vec<ClientId> = srv
        .clients
        .values()
        .filter(|c| !c.exempt_from_idle_timeout() && now.saturating_sub(c.last_interaction) >= srv.config.timeout)
        .map(|c| c.id)
        .collect();
    for id in idle {
        srv.remove_client(id);
    }
}

/// Pushes each replica's pending bulk-transfer and command-feed bytes onto
/// its socket's own output queue. The replica's own `ClientId` doubles as
/// its connection id (spec §4.10: "SYNC ... turns that connection into a
/// replication link").
fn drain_replica_feeds(srv: &mut Server) {
    let ids: Vec<ClientId> = srv.replicas.iter().map(|r| r.id).collect();
    for id in ids {
        let bytes = match srv.replicas.iter_mut().find(|r| r.id == id) {
            Some(replica) => {
                let mut bytes: Vec<u8> = replica.bulk_payload.drain(..).collect();
                bytes.extend(replica.output.drain(..));
                bytes
            }
            None => continue,
        };
        if !bytes.is_empty() {
            srv.send_raw(id, bytes);
        }
    }
}
