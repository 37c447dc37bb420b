//! LIST commands (spec §6, §4.4): LPUSH/RPUSH/LPOP/RPOP/LLEN/LINDEX/LSET/
//! LRANGE/LTRIM/LREM/RPOPLPUSH/BLPOP/BRPOP.

use super::{db_index, parse_i64};
use crate::client::BlockedState;
use crate::error;
use crate::server::{Outcome, Server};
use ferrikv_core::{ClientId, Object, ValueData};
use ferrikv_proto::time::timestamp_secs;
use ferrikv_proto::Reply;
use std::collections::VecDeque;

fn with_list_mut<T>(
    srv: &mut Server,
    db: usize,
    key: &[u8],
    f: impl FnOnce(&mut VecDeque<Vec<u8>>) -> Result<T, Reply>,
) -> Result<T, Reply> {
    match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => f(list),
                _ => Err(error::wrong_type()),
            }
        }
        None => {
            let now = timestamp_secs();
            let mut list = VecDeque::new();
            let result = f(&mut list)?;
            if !list.is_empty() {
                srv.set_object(db, key.to_vec(), Object::new(ValueData::List(list), now));
            }
            Ok(result)
        }
    }
}

/// Each pushed value either goes straight to the oldest blocked waiter on
/// this key (spec §4.4: "without it ever touching the list") or, absent a
/// waiter, is appended to the list itself. The reply length counts only the
/// values that actually landed in the list.
fn push(srv: &mut Server, id: ClientId, args: &[Vec<u8>], left: bool) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let mut len = None;
    for value in &args[2..] {
        if srv.keyspace.db(db).has_waiters(key) {
            srv.wake_waiter(db, key, value.clone());
            continue;
        }
        let result = with_list_mut(srv, db, key, |list| {
            if left {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
            Ok(list.len())
        });
        match result {
            Ok(new_len) => len = Some(new_len),
            Err(reply) => return Outcome::Reply(reply),
        }
    }
    srv.dirty += 1;
    let len = len.unwrap_or_else(|| match srv.resolve_read(db, key) {
        Some(obj) => match &obj.borrow().data {
            ValueData::List(list) => list.len(),
            _ => 0,
        },
        None => 0,
    });
    Outcome::Reply(Reply::Integer(len as i64))
}

pub fn lpush(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    push(srv, id, args, true)
}

pub fn rpush(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    push(srv, id, args, false)
}

fn pop(srv: &mut Server, id: ClientId, args: &[Vec<u8>], left: bool) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let popped = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => {
                    if left { list.pop_front() } else { list.pop_back() }
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => None,
    };
    let is_empty_now = matches!(
        srv.resolve_write(db, key).map(|obj| match &obj.borrow().data {
            ValueData::List(list) => list.is_empty(),
            _ => false,
        }),
        Some(true)
    );
    if is_empty_now {
        srv.keyspace.db_mut(db).delete(key);
    }
    match popped {
        Some(value) => {
            srv.dirty += 1;
            Outcome::Reply(Reply::bulk(value))
        }
        None => Outcome::Reply(Reply::NilBulk),
    }
}

pub fn lpop(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    pop(srv, id, args, true)
}

pub fn rpop(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    pop(srv, id, args, false)
}

pub fn llen(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::List(list) => Outcome::Reply(Reply::Integer(list.len() as i64)),
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Integer(0)),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    if i < 0 || i >= len {
        None
    } else {
        Some(i as usize)
    }
}

pub fn lindex(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let index = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::List(list) => match normalize_index(index, list.len()) {
                Some(i) => Outcome::Reply(Reply::bulk(list[i].clone())),
                None => Outcome::Reply(Reply::NilBulk),
            },
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::NilBulk),
    }
}

pub fn lset(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let index = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    match srv.resolve_write(db, &args[1]) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => match normalize_index(index, list.len()) {
                    Some(i) => {
                        list[i] = args[3].clone();
                        drop(obj);
                        srv.dirty += 1;
                        Outcome::Reply(Reply::ok())
                    }
                    None => Outcome::Reply(error::index_out_of_range()),
                },
                _ => Outcome::Reply(error::wrong_type()),
            }
        }
        None => Outcome::Reply(error::no_such_key()),
    }
}

pub fn lrange(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let start = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let stop = match parse_i64(&args[3]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::List(list) => {
                let (lo, hi) = clamp_range(start, stop, list.len());
                let replies = if lo > hi {
                    Vec::new()
                } else {
                    let (lo, hi) = (lo as usize, hi as usize);
                    list.iter().skip(lo).take(hi - lo + 1).map(|v| Reply::bulk(v.clone())).collect()
                };
                Outcome::Reply(Reply::Multi(replies))
            }
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Multi(Vec::new())),
    }
}

/// Normalizes a `[start, stop]` range against `len`, Redis-style (negative
/// indices count from the end, both bounds inclusive and clamped). Returns
/// `(lo, hi)` as signed offsets; callers must check `lo > hi` for "empty"
/// before casting to `usize`.
fn clamp_range(start: i64, stop: i64, len: usize) -> (i64, i64) {
    let len_i = len as i64;
    let lo = if start < 0 { (len_i + start).max(0) } else { start.min(len_i) };
    let hi = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    (lo, hi)
}

pub fn ltrim(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let start = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let stop = match parse_i64(&args[3]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let deleted = match srv.resolve_write(db, &args[1]) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => {
                    let len = list.len();
                    if stop < start || start >= len as i64 {
                        list.clear();
                    } else {
                        let (lo, hi) = clamp_range(start, stop, len);
                        if lo > hi {
                            list.clear();
                        } else {
                            let (lo, hi) = (lo as usize, hi as usize);
                            let trimmed: VecDeque<Vec<u8>> = list.iter().skip(lo).take(hi - lo + 1).cloned().collect();
                            *list = trimmed;
                        }
                    }
                    list.is_empty()
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => return Outcome::Reply(Reply::ok()),
    };
    if deleted {
        srv.keyspace.db_mut(db).delete(&args[1]);
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::ok())
}

pub fn lrem(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let count = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let target = &args[3];
    let (removed, now_empty) = match srv.resolve_write(db, &args[1]) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => {
                    let removed = remove_matching(list, target, count);
                    (removed, list.is_empty())
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => return Outcome::Reply(Reply::Integer(0)),
    };
    if now_empty {
        srv.keyspace.db_mut(db).delete(&args[1]);
    }
    if removed > 0 {
        srv.dirty += 1;
    }
    Outcome::Reply(Reply::Integer(removed))
}

fn remove_matching(list: &mut VecDeque<Vec<u8>>, target: &[u8], count: i64) -> i64 {
    if count >= 0 {
        let limit = if count == 0 { usize::MAX } else { count as usize };
        let mut removed = 0;
        let mut kept = VecDeque::with_capacity(list.len());
        for value in list.drain(..) {
            if removed < limit && value == target {
                removed += 1;
            } else {
                kept.push_back(value);
            }
        }
        *list = kept;
        removed as i64
    } else {
        let limit = (-count) as usize;
        let mut removed = 0;
        let mut kept: VecDeque<Vec<u8>> = VecDeque::with_capacity(list.len());
        for value in list.drain(..).collect::<Vec<_>>().into_iter().rev() {
            if removed < limit && value == target {
                removed += 1;
            } else {
                kept.push_front(value);
            }
        }
        *list = kept;
        removed as i64
    }
}

pub fn rpoplpush(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let source = &args[1];
    let dest = &args[2];
    let popped = match srv.resolve_write(db, source) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::List(list) => list.pop_back(),
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => None,
    };
    let value = match popped {
        Some(v) => v,
        None => return Outcome::Reply(Reply::NilBulk),
    };
    let source_now_empty = matches!(
        srv.resolve_write(db, source).map(|obj| match &obj.borrow().data {
            ValueData::List(list) => list.is_empty(),
            _ => false,
        }),
        Some(true)
    );
    if source_now_empty {
        srv.keyspace.db_mut(db).delete(source);
    }
    if !srv.keyspace.db(db).has_waiters(dest) {
        let result = with_list_mut(srv, db, dest, |list| {
            list.push_front(value.clone());
            Ok(())
        });
        if let Err(reply) = result {
            return Outcome::Reply(reply);
        }
    } else {
        srv.wake_waiter(db, dest, value.clone());
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::bulk(value))
}

fn block(srv: &mut Server, id: ClientId, args: &[Vec<u8>], pop_left: bool) -> Outcome {
    let db = db_index(srv, id);
    let keys = &args[1..args.len() - 1];
    let timeout_secs = match parse_i64(&args[args.len() - 1]) {
        Ok(n) if n >= 0 => n,
        _ => return Outcome::Reply(error::not_an_integer()),
    };

    for key in keys {
        let popped = match srv.resolve_write(db, key) {
            Some(obj) => {
                let mut obj = obj.borrow_mut();
                match &mut obj.data {
                    ValueData::List(list) => {
                        if pop_left { list.pop_front() } else { list.pop_back() }
                    }
                    _ => return Outcome::Reply(error::wrong_type()),
                }
            }
            None => None,
        };
        if let Some(value) = popped {
            let now_empty = matches!(
                srv.resolve_write(db, key).map(|obj| match &obj.borrow().data {
                    ValueData::List(list) => list.is_empty(),
                    _ => false,
                }),
                Some(true)
            );
            if now_empty {
                srv.keyspace.db_mut(db).delete(key);
            }
            srv.dirty += 1;
            return Outcome::Reply(Reply::from_bulk_strings(vec![key.clone(), value]));
        }
    }

    let now = timestamp_secs();
    let deadline = if timeout_secs == 0 { None } else { Some(now + timeout_secs as u64) };
    for key in keys {
        srv.keyspace.db_mut(db).waiters_for(key).push_back(id);
    }
    if let Some(client) = srv.clients.get_mut(&id) {
        client.blocked = Some(BlockedState { keys: keys.to_vec(), deadline, pop_left });
    }
    Outcome::NoReply
}

pub fn blpop(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    block(srv, id, args, true)
}

pub fn brpop(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    block(srv, id, args, false)
}
