//! SET commands (spec §6): SADD/SREM/SMOVE/SISMEMBER/SCARD/SPOP/
//! SRANDMEMBER/SMEMBERS/SINTER(STORE)/SUNION(STORE)/SDIFF(STORE).

use super::db_index;
use crate::error;
use crate::server::{Outcome, Server};
use ferrikv_core::{ClientId, Object, ValueData};
use ferrikv_proto::time::timestamp_secs;
use ferrikv_proto::Reply;
use hashbrown::HashSet;
use rand::Rng;

pub fn sadd(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let added = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::Set(set) => args[2..].iter().filter(|m| set.insert((*m).clone())).count(),
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => {
            let now = timestamp_secs();
            let mut set = HashSet::new();
            let added = args[2..].iter().filter(|m| set.insert((*m).clone())).count();
            if added > 0 {
                srv.set_object(db, key.clone(), Object::new(ValueData::Set(set), now));
            }
            added
        }
    };
    if added > 0 {
        srv.dirty += 1;
    }
    Outcome::Reply(Reply::Integer(added as i64))
}

pub fn srem(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let (removed, now_empty) = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::Set(set) => {
                    let removed = args[2..].iter().filter(|m| set.remove(m.as_slice())).count();
                    (removed, set.is_empty())
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => return Outcome::Reply(Reply::Integer(0)),
    };
    if now_empty {
        srv.keyspace.db_mut(db).delete(key);
    }
    if removed > 0 {
        srv.dirty += 1;
    }
    Outcome::Reply(Reply::Integer(removed as i64))
}

pub fn smove(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let source = &args[1];
    let dest = &args[2];
    let member = &args[3];

    let (removed, source_empty) = match srv.resolve_write(db, source) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::Set(set) => {
                    let removed = set.remove(member.as_slice());
                    (removed, set.is_empty())
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => (false, false),
    };
    if !removed {
        return Outcome::Reply(Reply::Integer(0));
    }
    if source_empty {
        srv.keyspace.db_mut(db).delete(source);
    }
    match srv.resolve_write(db, dest) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::Set(set) => {
                    set.insert(member.clone());
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => {
            let now = timestamp_secs();
            let mut set = HashSet::new();
            set.insert(member.clone());
            srv.set_object(db, dest.clone(), Object::new(ValueData::Set(set), now));
        }
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(1))
}

pub fn sismember(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Set(set) => Outcome::Reply(Reply::Integer(set.contains(args[2].as_slice()) as i64)),
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Integer(0)),
    }
}

pub fn scard(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Set(set) => Outcome::Reply(Reply::Integer(set.len() as i64)),
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Integer(0)),
    }
}

pub fn spop(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let (popped, now_empty) = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::Set(set) => {
                    let member = pick_random(set);
                    if let Some(m) = &member {
                        set.remove(m.as_slice());
                    }
                    (member, set.is_empty())
                }
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => return Outcome::Reply(Reply::NilBulk),
    };
    if now_empty {
        srv.keyspace.db_mut(db).delete(key);
    }
    match popped {
        Some(member) => {
            srv.dirty += 1;
            Outcome::Reply(Reply::bulk(member))
        }
        None => Outcome::Reply(Reply::NilBulk),
    }
}

pub fn srandmember(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Set(set) => match pick_random(set) {
                Some(m) => Outcome::Reply(Reply::bulk(m)),
                None => Outcome::Reply(Reply::NilBulk),
            },
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::NilBulk),
    }
}

fn pick_random(set: &HashSet<Vec<u8>>) -> Option<Vec<u8>> {
    if set.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..set.len());
    set.iter().nth(index).cloned()
}

pub fn smembers(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Set(set) => {
                Outcome::Reply(Reply::Multi(set.iter().map(|m| Reply::bulk(m.clone())).collect()))
            }
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Multi(Vec::new())),
    }
}

fn read_set(srv: &mut Server, db: usize, key: &[u8]) -> Result<HashSet<Vec<u8>>, Reply> {
    match srv.resolve_read(db, key) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Set(set) => Ok(set.clone()),
            _ => Err(error::wrong_type()),
        },
        None => Ok(HashSet::new()),
    }
}

enum SetOp {
    Inter,
    Union,
    Diff,
}

fn combine(srv: &mut Server, db: usize, keys: &[Vec<u8>], op: SetOp) -> Result<HashSet<Vec<u8>>, Reply> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        sets.push(read_set(srv, db, key)?);
    }
    let mut iter = sets.into_iter();
    let mut result = iter.next().unwrap_or_default();
    for set in iter {
        result = match op {
            SetOp::Inter => result.intersection(&set).cloned().collect(),
            SetOp::Union => result.union(&set).cloned().collect(),
            SetOp::Diff => result.difference(&set).cloned().collect(),
        };
    }
    Ok(result)
}

fn combine_reply(srv: &mut Server, id: ClientId, args: &[Vec<u8>], op: SetOp) -> Outcome {
    let db = db_index(srv, id);
    match combine(srv, db, &args[1..], op) {
        Ok(result) => Outcome::Reply(Reply::Multi(result.into_iter().map(Reply::bulk).collect())),
        Err(reply) => Outcome::Reply(reply),
    }
}

fn combine_store(srv: &mut Server, id: ClientId, args: &[Vec<u8>], op: SetOp) -> Outcome {
    let db = db_index(srv, id);
    let dest = args[1].clone();
    let result = match combine(srv, db, &args[2..], op) {
        Ok(result) => result,
        Err(reply) => return Outcome::Reply(reply),
    };
    let len = result.len();
    if result.is_empty() {
        srv.keyspace.db_mut(db).delete(&dest);
    } else {
        let now = timestamp_secs();
        srv.set_object(db, dest, Object::new(ValueData::Set(result), now));
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(len as i64))
}

pub fn sinter(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_reply(srv, id, args, SetOp::Inter)
}

pub fn sinterstore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_store(srv, id, args, SetOp::Inter)
}

pub fn sunion(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_reply(srv, id, args, SetOp::Union)
}

pub fn sunionstore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_store(srv, id, args, SetOp::Union)
}

pub fn sdiff(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_reply(srv, id, args, SetOp::Diff)
}

pub fn sdiffstore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    combine_store(srv, id, args, SetOp::Diff)
}
