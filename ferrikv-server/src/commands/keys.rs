//! Key-space commands (spec §6): DEL/EXISTS/TYPE/KEYS/RANDOMKEY/DBSIZE/
//! RENAME/RENAMENX/MOVE/SELECT/EXPIRE/EXPIREAT/TTL.

use super::db_index;
use crate::error;
use crate::server::{Outcome, Server};
use ferrikv_core::{ClientId, ValueData};
use ferrikv_proto::Reply;
use ferrikv_proto::time::timestamp_secs;

pub fn del(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let mut removed = 0;
    for key in &args[1..] {
        if srv.resolve_write(db, key).is_some() {
            srv.keyspace.db_mut(db).delete(key);
            removed += 1;
        }
    }
    if removed > 0 {
        srv.dirty += removed;
    }
    Outcome::Reply(Reply::Integer(removed as i64))
}

pub fn exists(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let found = srv.resolve_read(db, &args[1]).is_some();
    Outcome::Reply(Reply::Integer(found as i64))
}

pub fn type_cmd(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let type_name = match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Str(_) => "string",
            ValueData::List(_) => "list",
            ValueData::Set(_) => "set",
            ValueData::ZSet(_) => "zset",
            ValueData::Hash(_) => "hash",
        },
        None => "none",
    };
    Outcome::Reply(Reply::Simple(type_name.to_string()))
}

pub fn keys_cmd(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let pattern = &args[1];
    let now = timestamp_secs();
    let matched = srv
        .keyspace
        .db(db)
        .entries
        .keys()
        .filter(|k| !srv.keyspace.db(db).is_expired(k, now))
        .filter(|k| glob_match(pattern, k))
        .map(|k| Reply::bulk(k.clone()))
        .collect();
    Outcome::Reply(Reply::Multi(matched))
}

pub fn randomkey(srv: &mut Server, id: ClientId, _args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let now = timestamp_secs();
    let candidate = srv
        .keyspace
        .db(db)
        .entries
        .keys()
        .find(|k| !srv.keyspace.db(db).is_expired(k, now))
        .cloned();
    match candidate {
        Some(key) => Outcome::Reply(Reply::bulk(key)),
        None => Outcome::Reply(Reply::NilBulk),
    }
}

pub fn dbsize(srv: &mut Server, id: ClientId, _args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    Outcome::Reply(Reply::Integer(srv.keyspace.db(db).len() as i64))
}

pub fn rename(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    if srv.resolve_write(db, &args[1]).is_none() {
        return Outcome::Reply(error::no_such_key());
    }
    srv.keyspace.db_mut(db).rename(&args[1], args[2].clone());
    srv.dirty += 1;
    Outcome::Reply(Reply::ok())
}

pub fn renamenx(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    if srv.resolve_write(db, &args[1]).is_none() {
        return Outcome::Reply(error::no_such_key());
    }
    if srv.resolve_read(db, &args[2]).is_some() {
        return Outcome::Reply(Reply::Integer(0));
    }
    srv.keyspace.db_mut(db).rename(&args[1], args[2].clone());
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(1))
}

pub fn move_cmd(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let dest: usize = match std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) if n < srv.keyspace.len() => n,
        _ => return Outcome::Reply(error::not_an_integer()),
    };
    if dest == db {
        return Outcome::Reply(Reply::error("ERR source and destination objects are the same"));
    }
    if srv.resolve_write(db, &args[1]).is_none() {
        return Outcome::Reply(Reply::Integer(0));
    }
    let moved = srv.keyspace.move_key(db, dest, &args[1]);
    if moved {
        srv.dirty += 1;
    }
    Outcome::Reply(Reply::Integer(moved as i64))
}

pub fn select(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let index: usize = match std::str::from_utf8(&args[1]).ok().and_then(|s| s.parse().ok()) {
        Some(n) if n < srv.keyspace.len() => n,
        _ => return Outcome::Reply(Reply::error("ERR invalid DB index")),
    };
    if let Some(client) = srv.clients.get_mut(&id) {
        client.db_index = index;
    }
    Outcome::Reply(Reply::ok())
}

fn set_expire_at(srv: &mut Server, id: ClientId, key: &[u8], at_secs: i64) -> Outcome {
    let db = db_index(srv, id);
    if srv.resolve_write(db, key).is_none() {
        return Outcome::Reply(Reply::Integer(0));
    }
    let now = timestamp_secs();
    if at_secs <= now as i64 {
        srv.keyspace.db_mut(db).delete(key);
    } else {
        srv.keyspace.db_mut(db).set_expiry(key.to_vec(), at_secs as u64);
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(1))
}

pub fn expire(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let seconds: i64 = match std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return Outcome::Reply(error::not_an_integer()),
    };
    let now = timestamp_secs() as i64;
    set_expire_at(srv, id, &args[1], now + seconds)
}

pub fn expireat(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let at_secs: i64 = match std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return Outcome::Reply(error::not_an_integer()),
    };
    set_expire_at(srv, id, &args[1], at_secs)
}

pub fn ttl(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    if srv.resolve_read(db, &args[1]).is_none() {
        return Outcome::Reply(Reply::Integer(-2));
    }
    let now = timestamp_secs();
    match srv.keyspace.db(db).ttl_secs(&args[1], now) {
        Some(secs) => Outcome::Reply(Reply::Integer(secs.max(0))),
        None => Outcome::Reply(Reply::Integer(-1)),
    }
}

/// Minimal glob matcher supporting `*`, `?`, and `[...]` character classes,
/// the subset `KEYS` needs (spec §6).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                inner(&pattern[1..], text) || (!text.is_empty() && inner(pattern, &text[1..]))
            }
            Some(b'?') => !text.is_empty() && inner(&pattern[1..], &text[1..]),
            Some(b'[') => {
                let close = match pattern.iter().position(|&b| b == b']') {
                    Some(i) => i,
                    None => return pattern == text,
                };
                if text.is_empty() {
                    return false;
                }
                let class = &pattern[1..close];
                let matches = class.contains(&text[0]);
                matches && inner(&pattern[close + 1..], &text[1..])
            }
            Some(&c) => !text.is_empty() && text[0] == c && inner(&pattern[1..], &text[1..]),
        }
    }
    inner(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn star_matches_any_suffix() {
        assert!(glob_match(b"foo*", b"foobar"));
        assert!(!glob_match(b"foo*", b"bar"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match(b"k?y", b"key"));
        assert!(!glob_match(b"k?y", b"ky"));
    }

    #[test]
    fn char_class_matches_any_member() {
        assert!(glob_match(b"k[ae]y", b"kay"));
        assert!(glob_match(b"k[ae]y", b"key"));
        assert!(!glob_match(b"k[ae]y", b"kiy"));
    }
}
