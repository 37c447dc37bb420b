use crate::value::{Bytes, Object, ObjectRef, SwapDescriptor};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Identifies a connected client for the waiter FIFO (spec §3 "waiters").
/// Defined here rather than in `ferrikv-server` so the keyspace doesn't
/// need to depend back on the connection layer.
pub type ClientId = u64;

/// A key's resident value, or a descriptor pointing at its swapped-out
/// location on the pager's swap file (spec §3: "a value in SWAPPED holds
/// only its descriptor and no payload").
pub enum Entry {
    Resident(ObjectRef),
    Swapped(SwapDescriptor),
}

impl Entry {
    pub fn resident(object: Object) -> Entry {
        Entry::Resident(Rc::new(RefCell::new(object)))
    }

    pub fn as_resident(&self) -> Option<&ObjectRef> {
        match self {
            Entry::Resident(obj) => Some(obj),
            Entry::Swapped(_) => None,
        }
    }
}

/// One of the `databases` independent keyspaces (spec §2, §3): a key→value
/// map, an expiry map, and a map of clients blocked on a given key.
#[derive(Default)]
pub struct Database {
    pub entries: HashMap<Bytes, Entry>,
    pub expiries: HashMap<Bytes, u64>,
    pub waiters: HashMap<Bytes, VecDeque<ClientId>>,
}

impl Database {
    pub fn new() -> Database {
        Database::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if `key` has an expiry recorded and it is at or before `now`.
    pub fn is_expired(&self, key: &[u8], now: u64) -> bool {
        matches!(self.expiries.get(key), Some(&at) if at <= now)
    }

    /// Deletes `key` from both `entries` and `expiries`. Waiters parked on
    /// the key are left untouched (spec §4.3: "those waiters remain
    /// parked"); the cron timeout sweep is what wakes them.
    pub fn delete(&mut self, key: &[u8]) -> Option<Entry> {
        self.expiries.remove(key);
        self.entries.remove(key)
    }

    /// Lazily expires `key` if due, then looks it up (spec §4.3 `read`).
    pub fn read(&mut self, key: &[u8], now: u64) -> Option<&Entry> {
        if self.is_expired(key, now) {
            self.delete(key);
            return None;
        }
        self.entries.get(key)
    }

    pub fn read_mut(&mut self, key: &[u8], now: u64) -> Option<&mut Entry> {
        if self.is_expired(key, now) {
            self.delete(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    /// `write` lookup (spec §4.3, §9): if `key` carries a TTL, it is deleted
    /// outright first regardless of whether the write would touch the whole
    /// value or just part of it -- the historical `lookupKeyWrite` quirk,
    /// reproduced deliberately (see DESIGN.md).
    pub fn write_lookup(&mut self, key: &[u8]) -> Option<&Entry> {
        if self.expiries.contains_key(key) {
            self.delete(key);
            return None;
        }
        self.entries.get(key)
    }

    pub fn write_lookup_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        if self.expiries.contains_key(key) {
            self.delete(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    pub fn set(&mut self, key: Bytes, entry: Entry) {
        self.expiries.remove(&key);
        self.entries.insert(key, entry);
    }

    pub fn set_expiry(&mut self, key: Bytes, at_secs: u64) {
        self.expiries.insert(key, at_secs);
    }

    pub fn clear_expiry(&mut self, key: &[u8]) -> bool {
        self.expiries.remove(key).is_some()
    }

    pub fn ttl_secs(&self, key: &[u8], now: u64) -> Option<i64> {
        self.expiries.get(key).map(|&at| at as i64 - now as i64)
    }

    /// Renames `source` to `dest`, atomically relative to other clients
    /// (single-threaded dispatch already guarantees this): the destination
    /// is deleted, then the source entry (and any TTL) is moved across.
    pub fn rename(&mut self, source: &[u8], dest: Bytes) -> bool {
        let entry = match self.entries.remove(source) {
            Some(entry) => entry,
            None => return false,
        };
        let ttl = self.expiries.remove(source);

        self.entries.remove(&dest);
        self.expiries.remove(&dest);

        self.entries.insert(dest.clone(), entry);
        if let Some(at) = ttl {
            self.expiries.insert(dest, at);
        }
        true
    }

    pub fn waiters_for(&mut self, key: &[u8]) -> &mut VecDeque<ClientId> {
        self.waiters.entry(key.to_vec()).or_default()
    }

    pub fn pop_waiter(&mut self, key: &[u8]) -> Option<ClientId> {
        let queue = self.waiters.get_mut(key)?;
        let popped = queue.pop_front();
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        popped
    }

    pub fn has_waiters(&self, key: &[u8]) -> bool {
        self.waiters.get(key).map(|q| !q.is_empty()).unwrap_or(false)
    }
}

/// The full set of independent databases (spec §2: "N independent
/// databases").
pub struct Keyspace {
    databases: Vec<Database>,
}

impl Keyspace {
    pub fn new(count: usize) -> Keyspace {
        Keyspace {
            databases: (0..count).map(|_| Database::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn db(&self, index: usize) -> &Database {
        &self.databases[index]
    }

    pub fn db_mut(&mut self, index: usize) -> &mut Database {
        &mut self.databases[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Database)> {
        self.databases.iter().enumerate()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Database)> {
        self.databases.iter_mut().enumerate()
    }

    /// Moves `key` from `source` to `dest` database. Fails (per spec §4.3)
    /// if the target already holds the key.
    pub fn move_key(&mut self, source: usize, dest: usize, key: &[u8]) -> bool {
        if self.databases[dest].entries.contains_key(key) {
            return false;
        }
        let entry = match self.databases[source].entries.remove(key) {
            Some(entry) => entry,
            None => return false,
        };
        let ttl = self.databases[source].expiries.remove(key);
        self.databases[dest].entries.insert(key.to_vec(), entry);
        if let Some(at) = ttl {
            self.databases[dest].expiries.insert(key.to_vec(), at);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{StrValue, ValueData};

    fn str_object(text: &str) -> Object {
        Object::new(ValueData::Str(StrValue::Raw(text.as_bytes().to_vec())), 0)
    }

    #[test]
    fn write_lookup_deletes_volatile_key_unconditionally() {
        let mut db = Database::new();
        db.set(b"k".to_vec(), Entry::resident(str_object("v")));
        db.set_expiry(b"k".to_vec(), 999);

        assert!(db.write_lookup(b"k").is_none());
        assert!(db.entries.get(b"k".as_slice()).is_none());
    }

    #[test]
    fn read_lazily_expires() {
        let mut db = Database::new();
        db.set(b"k".to_vec(), Entry::resident(str_object("v")));
        db.set_expiry(b"k".to_vec(), 10);

        assert!(db.read(b"k", 11).is_none());
        assert!(!db.expiries.contains_key(b"k".as_slice()));
    }

    #[test]
    fn rename_moves_value_and_ttl_and_deletes_old_target() {
        let mut db = Database::new();
        db.set(b"src".to_vec(), Entry::resident(str_object("v1")));
        db.set_expiry(b"src".to_vec(), 42);
        db.set(b"dst".to_vec(), Entry::resident(str_object("v2")));

        assert!(db.rename(b"src", b"dst".to_vec()));
        assert!(db.entries.get(b"src".as_slice()).is_none());
        assert!(db.entries.contains_key(b"dst".as_slice()));
        assert_eq!(db.expiries.get(b"dst".as_slice()), Some(&42));
    }

    #[test]
    fn move_key_fails_if_target_exists() {
        let mut ks = Keyspace::new(2);
        ks.db_mut(0).set(b"k".to_vec(), Entry::resident(str_object("v")));
        ks.db_mut(1).set(b"k".to_vec(), Entry::resident(str_object("other")));

        assert!(!ks.move_key(0, 1, b"k"));
        assert!(ks.db(0).entries.contains_key(b"k".as_slice()));
    }

    #[test]
    fn waiter_fifo_pop_order() {
        let mut db = Database::new();
        db.waiters_for(b"q").push_back(1);
        db.waiters_for(b"q").push_back(2);

        assert_eq!(db.pop_waiter(b"q"), Some(1));
        assert_eq!(db.pop_waiter(b"q"), Some(2));
        assert_eq!(db.pop_waiter(b"q"), None);
    }
}
