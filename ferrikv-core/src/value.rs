use crate::skiplist::SkipList;
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use std::rc::Rc;

pub type Bytes = Vec<u8>;

/// The five value kinds a key can hold (spec §3). `Hash` is carried for RDB
/// round-trip completeness (spec §3 lists it as a kind even though the
/// distilled command surface in spec §6 exposes no HASH-mutating command).
#[derive(Debug, Clone)]
pub enum ValueData {
    Str(StrValue),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    ZSet(ZSet),
    Hash(HashMap<Bytes, Bytes>),
}

/// STRING encoding: a value losslessly representable as a machine integer is
/// tagged `Int` and never mutated in place -- scalar commands replace the
/// object outright (spec §3, §9 copy-on-encode note).
#[derive(Debug, Clone)]
pub enum StrValue {
    Raw(Bytes),
    Int(i64),
}

impl StrValue {
    pub fn as_bytes(&self) -> Bytes {
        match self {
            StrValue::Raw(bytes) => bytes.clone(),
            StrValue::Int(n) => n.to_string().into_bytes(),
        }
    }

    /// Attempts lossless integer encoding of a raw byte string, the "attempt
    /// value-sharing and integer-encoding" step of the dispatch order (§4.2).
    pub fn encode(bytes: Bytes) -> StrValue {
        if bytes.len() <= 20 {
            if let Ok(text) = std::str::from_utf8(&bytes) {
                if let Ok(n) = text.parse::<i64>() {
                    // Reject encodings that wouldn't round-trip byte-for-byte
                    // (leading zeros, "+1", " 1", etc) so `GET` after `SET`
                    // always returns exactly what was stored.
                    if n.to_string() == text {
                        return StrValue::Int(n);
                    }
                }
            }
        }
        StrValue::Raw(bytes)
    }

    pub fn len(&self) -> usize {
        match self {
            StrValue::Raw(bytes) => bytes.len(),
            StrValue::Int(n) => n.to_string().len(),
        }
    }
}

/// A sorted set: the member→score map is authoritative (spec §4.5 ZADD
/// semantics), the skiplist is the ordered index built from it.
#[derive(Debug, Default, Clone)]
pub struct ZSet {
    pub scores: HashMap<Bytes, f64>,
    pub index: SkipList,
}

impl ZSet {
    pub fn new() -> ZSet {
        ZSet::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Inserts or updates `member`'s score. Returns `true` if this created a
    /// new member (ZADD's `:1`/`:0` return value distinction).
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.get(&member).copied() {
            Some(old_score) => {
                if old_score != score {
                    self.index.delete(old_score, &member);
                    self.index.insert(score, member.clone());
                }
                self.scores.insert(member, score);
                false
            }
            None => {
                self.index.insert(score, member.clone());
                self.scores.insert(member, score);
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.index.delete(score, member);
                true
            }
            None => false,
        }
    }

    pub fn incr_by(&mut self, member: Bytes, delta: f64) -> f64 {
        let current = self.score(&member).unwrap_or(0.0);
        let new_score = current + delta;
        self.insert(member, new_score);
        new_score
    }
}

/// Swap-out/in lifecycle, spec §3: `Memory ↔ Swapping → Swapped → Loading →
/// Memory`. Only meaningful while the pager is enabled; resident values off
/// a non-VM server sit permanently in `Memory`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Storage {
    Memory,
    Swapping,
    Loading,
}

/// A resident value object: the typed payload plus the bookkeeping the
/// pager and expiration engine need. `Rc` makes the refcount invariant
/// (spec §8 property 1) literal -- `Rc::strong_count` *is* the refcount,
/// and shared singletons are simply `Rc`s kept alive for the life of the
/// server by `crate::shared::SharedObjects`.
#[derive(Debug, Clone)]
pub struct Object {
    pub data: ValueData,
    pub storage: Storage,
    pub last_access: u64,
}

impl Object {
    pub fn new(data: ValueData, now: u64) -> Object {
        Object {
            data,
            storage: Storage::Memory,
            last_access: now,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.data {
            ValueData::Str(_) => "string",
            ValueData::List(_) => "list",
            ValueData::Set(_) => "set",
            ValueData::ZSet(_) => "zset",
            ValueData::Hash(_) => "hash",
        }
    }

    /// Rough in-memory size estimate used by the swappability score (§4.12)
    /// and the memory cap accounting (§4.7). Not byte-exact; it only needs
    /// to be monotonic in the amount of data held.
    pub fn estimated_bytes(&self) -> usize {
        match &self.data {
            ValueData::Str(s) => s.len(),
            ValueData::List(items) => items.iter().map(|i| i.len() + 8).sum(),
            ValueData::Set(items) => items.iter().map(|i| i.len() + 8).sum(),
            ValueData::ZSet(z) => z.scores.keys().map(|m| m.len() + 16).sum(),
            ValueData::Hash(map) => map.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
        }
    }
}

/// Resident values are wrapped in `RefCell` because list/set/zset commands
/// mutate the payload in place through the single keyspace-owning
/// reference, while `Rc::strong_count` still gives us the refcount for
/// free (spec §8 property 1).
pub type ObjectRef = Rc<std::cell::RefCell<Object>>;

/// Descriptor recorded for a key whose value currently lives on the swap
/// file rather than in memory (spec §3, §4.12).
#[derive(Debug, Clone, Copy)]
pub struct SwapDescriptor {
    pub page: usize,
    pub page_count: usize,
    pub last_access: u64,
    pub swapped_kind: SwappedKind,
}

/// The value kind of a swapped-out object, recorded so callers (e.g. `TYPE`)
/// don't need to load the object back in just to answer a type query.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SwappedKind {
    Str,
    List,
    Set,
    ZSet,
    Hash,
}

impl From<&ValueData> for SwappedKind {
    fn from(data: &ValueData) -> Self {
        match data {
            ValueData::Str(_) => SwappedKind::Str,
            ValueData::List(_) => SwappedKind::List,
            ValueData::Set(_) => SwappedKind::Set,
            ValueData::ZSet(_) => SwappedKind::ZSet,
            ValueData::Hash(_) => SwappedKind::Hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_encoding_round_trips_exactly() {
        assert!(matches!(StrValue::encode(b"123".to_vec()), StrValue::Int(123)));
        assert!(matches!(StrValue::encode(b"-5".to_vec()), StrValue::Int(-5)));
        // Leading zero would not round-trip back to "007" so must stay raw.
        assert!(matches!(StrValue::encode(b"007".to_vec()), StrValue::Raw(_)));
        assert!(matches!(StrValue::encode(b"+1".to_vec()), StrValue::Raw(_)));
    }

    #[test]
    fn zset_update_reports_no_new_member() {
        let mut z = ZSet::new();
        assert!(z.insert(b"x".to_vec(), 1.0));
        assert!(!z.insert(b"x".to_vec(), 2.0));
        assert_eq!(z.score(b"x"), Some(2.0));
    }

    #[test]
    fn zset_incr_by_defaults_to_zero() {
        let mut z = ZSet::new();
        assert_eq!(z.incr_by(b"x".to_vec(), 5.0), 5.0);
        assert_eq!(z.incr_by(b"x".to_vec(), -2.0), 3.0);
    }
}
