use ferrikv_proto::Reply;
use std::collections::VecDeque;

/// The replica's own view of its link to a master (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    None,
    MustConnect,
    Connected,
}

/// A replica's state as the master tracks it (spec §4.10). `SendBulk` is
/// the snapshot-streaming phase that begins once a matching background
/// save completes and ends once the writable callback has drained the
/// whole payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterReplicaState {
    WaitBgsaveStart,
    WaitBgsaveEnd,
    SendBulk,
    Online,
}

/// Master-side bookkeeping for one connected replica: its sync state, its
/// outstanding snapshot payload (while `SendBulk`), its outgoing command
/// queue, and which db its last `SELECT` prelude pointed at.
pub struct ReplicaHandle {
    pub id: u64,
    pub state: MasterReplicaState,
    pub bulk_payload: VecDeque<u8>,
    pub output: VecDeque<u8>,
    selected_db: Option<usize>,
}

impl ReplicaHandle {
    pub fn new(id: u64) -> ReplicaHandle {
        ReplicaHandle {
            id,
            state: MasterReplicaState::WaitBgsaveStart,
            bulk_payload: VecDeque::new(),
            output: VecDeque::new(),
            selected_db: None,
        }
    }

    /// Enqueues one mutating command for this replica, emitting a `SELECT
    /// <db>` prelude first if the target db changed since the last feed
    /// (spec §4.10). A no-op unless the replica is in `WaitBgsaveEnd`,
    /// `SendBulk`, or `Online`.
    pub fn feed_command(&mut self, db: usize, args: &[Vec<u8>]) {
        if !matches!(
            self.state,
            MasterReplicaState::WaitBgsaveEnd | MasterReplicaState::SendBulk | MasterReplicaState::Online
        ) {
            return;
        }
        if self.selected_db != Some(db) {
            let select = Reply::from_bulk_strings(vec![b"SELECT".to_vec(), db.to_string().into_bytes()]);
            self.output.extend(select.to_bytes());
            self.selected_db = Some(db);
        }
        let encoded = Reply::from_bulk_strings(args.iter().cloned());
        self.output.extend(encoded.to_bytes());
    }

    /// Loads the `$<size>\r\n<bytes>` bulk-transfer framing used for the
    /// initial snapshot push, queued ahead of the replica's live command
    /// feed.
    pub fn queue_bulk_payload(&mut self, snapshot: &[u8]) {
        self.bulk_payload.clear();
        self.bulk_payload.extend(format!("${}\r\n", snapshot.len()).into_bytes());
        self.bulk_payload.extend(snapshot.iter().copied());
        self.state = MasterReplicaState::SendBulk;
    }

    pub fn bulk_fully_sent(&self) -> bool {
        self.bulk_payload.is_empty()
    }

    pub fn mark_online(&mut self) {
        self.state = MasterReplicaState::Online;
    }
}

/// Master-wide replication coordination: tracks whether a background save
/// is in flight and decides each new replica's starting state (spec
/// §4.10).
#[derive(Default)]
pub struct Master {
    bgsave_running: bool,
}

impl Master {
    pub fn new() -> Master {
        Master::default()
    }

    pub fn bgsave_running(&self) -> bool {
        self.bgsave_running
    }

    /// Handles an incoming `SYNC`, returning the starting state for the
    /// requesting replica and, if it should reuse another replica's
    /// in-flight buffer, that replica's id.
    pub fn handle_sync(&mut self, replicas: &[ReplicaHandle]) -> (MasterReplicaState, Option<u64>) {
        if !self.bgsave_running {
            self.bgsave_running = true;
            return (MasterReplicaState::WaitBgsaveEnd, None);
        }
        match replicas
            .iter()
            .find(|r| r.state == MasterReplicaState::WaitBgsaveEnd)
        {
            Some(existing) => (MasterReplicaState::WaitBgsaveEnd, Some(existing.id)),
            None => (MasterReplicaState::WaitBgsaveStart, None),
        }
    }

    /// Called once a background save finishes. Every `WaitBgsaveEnd`
    /// replica gets the snapshot queued for streaming; `WaitBgsaveStart`
    /// replicas are left waiting for the *next* save cycle.
    pub fn bgsave_completed(&mut self, replicas: &mut [ReplicaHandle], snapshot: &[u8]) {
        self.bgsave_running = false;
        for replica in replicas.iter_mut() {
            if replica.state == MasterReplicaState::WaitBgsaveEnd {
                replica.queue_bulk_payload(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sync_starts_a_background_save() {
        let mut master = Master::new();
        let (state, reuse) = master.handle_sync(&[]);
        assert_eq!(state, MasterReplicaState::WaitBgsaveEnd);
        assert!(reuse.is_none());
        assert!(master.bgsave_running());
    }

    #[test]
    fn concurrent_sync_reuses_the_end_state_replicas_buffer() {
        let mut master = Master::new();
        master.handle_sync(&[]);

        let first = ReplicaHandle::new(1);
        let (state, reuse) = master.handle_sync(std::slice::from_ref(&first));
        assert_eq!(state, MasterReplicaState::WaitBgsaveEnd);
        assert_eq!(reuse, Some(1));
    }

    #[test]
    fn sync_while_saving_with_no_end_replica_waits_for_next_save() {
        let mut master = Master::new();
        master.handle_sync(&[]);

        let mut pending = ReplicaHandle::new(2);
        pending.state = MasterReplicaState::SendBulk;
        let (state, reuse) = master.handle_sync(std::slice::from_ref(&pending));
        assert_eq!(state, MasterReplicaState::WaitBgsaveStart);
        assert!(reuse.is_none());
    }

    #[test]
    fn bgsave_completion_queues_bulk_payload_for_waiting_replicas() {
        let mut master = Master::new();
        master.handle_sync(&[]);
        let mut replicas = vec![ReplicaHandle::new(1)];
        replicas[0].state = MasterReplicaState::WaitBgsaveEnd;

        master.bgsave_completed(&mut replicas, b"snapshot-bytes");
        assert_eq!(replicas[0].state, MasterReplicaState::SendBulk);
        assert!(!replicas[0].bulk_fully_sent());
        assert!(!master.bgsave_running());
    }

    #[test]
    fn feed_command_emits_select_prelude_on_db_change() {
        let mut replica = ReplicaHandle::new(1);
        replica.state = MasterReplicaState::Online;

        replica.feed_command(0, &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        replica.feed_command(0, &[b"SET".to_vec(), b"k2".to_vec(), b"v2".to_vec()]);
        replica.feed_command(1, &[b"SET".to_vec(), b"k3".to_vec(), b"v3".to_vec()]);

        let out: Vec<u8> = replica.output.into_iter().collect();
        let select_count = String::from_utf8_lossy(&out).matches("SELECT").count();
        assert_eq!(select_count, 2);
    }

    #[test]
    fn feed_command_is_a_noop_before_wait_bgsave_end() {
        let mut replica = ReplicaHandle::new(1);
        replica.feed_command(0, &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert!(replica.output.is_empty());
    }
}
