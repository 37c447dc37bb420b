//! ZSET commands (spec §6, §4.5): ZADD/ZINCRBY/ZREM/ZREMRANGEBYSCORE/
//! ZRANGE/ZREVRANGE/ZRANGEBYSCORE/ZCARD/ZSCORE.

use super::{db_index, parse_f64};
use crate::error;
use crate::server::{Outcome, Server};
use ferrikv_core::{ClientId, Object, ValueData, ZSet};
use ferrikv_proto::time::timestamp_secs;
use ferrikv_proto::{format_double, Reply};

pub fn zadd(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    if (args.len() - 2) % 2 != 0 {
        return Outcome::Reply(error::wrong_number_of_arguments());
    }
    let db = db_index(srv, id);
    let key = &args[1];
    let mut pairs = Vec::with_capacity((args.len() - 2) / 2);
    for chunk in args[2..].chunks_exact(2) {
        let score = match parse_f64(&chunk[0]) {
            Ok(s) => s,
            Err(reply) => return Outcome::Reply(reply),
        };
        pairs.push((score, chunk[1].clone()));
    }

    let added = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::ZSet(zset) => pairs.into_iter().filter(|(score, member)| zset.insert(member.clone(), *score)).count(),
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => {
            let now = timestamp_secs();
            let mut zset = ZSet::new();
            let added = pairs.into_iter().filter(|(score, member)| zset.insert(member.clone(), *score)).count();
            srv.set_object(db, key.clone(), Object::new(ValueData::ZSet(zset), now));
            added
        }
    };
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(added as i64))
}

pub fn zincrby(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let delta = match parse_f64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let member = &args[3];

    let new_score = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::ZSet(zset) => zset.incr_by(member.clone(), delta),
                _ => return Outcome::Reply(error::wrong_type()),
            }
        }
        None => {
            let now = timestamp_secs();
            let mut zset = ZSet::new();
            let score = zset.incr_by(member.clone(), delta);
            srv.set_object(db, key.clone(), Object::new(ValueData::ZSet(zset), now));
            score
        }
    };
    srv.dirty += 1;
    Outcome::Reply(Reply::bulk(format_double(new_score).into_bytes()))
}

pub fn zrem(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let (removed, now_empty) = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::ZSet(zset) => {
                    let removed = args[2..].iter().filter(|m| zset.remove(m)).count();
                    (removed, zset.is_empty())
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

pub fn zremrangebyscore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let key = &args[1];
    let min = match parse_f64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let max = match parse_f64(&args[3]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let (removed, now_empty) = match srv.resolve_write(db, key) {
        Some(obj) => {
            let mut obj = obj.borrow_mut();
            match &mut obj.data {
                ValueData::ZSet(zset) => {
                    let matching: Vec<Vec<u8>> = zset
                        .index
                        .range_by_score(min, max, 0, None)
                        .into_iter()
                        .map(|(_, member)| member)
                        .collect();
                    for member in &matching {
                        zset.remove(member);
                    }
                    (matching.len(), zset.is_empty())
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

fn with_scores(entries: Vec<(f64, Vec<u8>)>, with_scores: bool) -> Vec<Reply> {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (score, member) in entries {
        out.push(Reply::bulk(member));
        if with_scores {
            out.push(Reply::bulk(format_double(score).into_bytes()));
        }
    }
    out
}

fn parse_withscores(args: &[Vec<u8>]) -> Result<bool, Reply> {
    match args.len() {
        0 => Ok(false),
        1 if args[0].eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        _ => Err(error::syntax_error()),
    }
}

pub fn zrange(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    range_by_rank(srv, id, args, false)
}

pub fn zrevrange(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    range_by_rank(srv, id, args, true)
}

fn range_by_rank(srv: &mut Server, id: ClientId, args: &[Vec<u8>], reverse: bool) -> Outcome {
    let db = db_index(srv, id);
    let start: i64 = match std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return Outcome::Reply(error::not_an_integer()),
    };
    let stop: i64 = match std::str::from_utf8(&args[3]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return Outcome::Reply(error::not_an_integer()),
    };
    let show_scores = match parse_withscores(&args[4..]) {
        Ok(flag) => flag,
        Err(reply) => return Outcome::Reply(reply),
    };

    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::ZSet(zset) => {
                let entries = if reverse {
                    // ZREVRANGE's start/stop count down from the highest
                    // score; translate to the ascending rank the skiplist is
                    // actually indexed by, then flip the slice (spec §4.5).
                    let len = zset.len() as i64;
                    if len == 0 {
                        Vec::new()
                    } else {
                        let norm = |idx: i64| if idx < 0 { (len + idx).max(0) } else { idx };
                        let rev_start = norm(start).min(len - 1);
                        let rev_stop = norm(stop).min(len - 1);
                        if rev_start > rev_stop {
                            Vec::new()
                        } else {
                            let mut entries = zset.index.range_by_rank(len - 1 - rev_stop, len - 1 - rev_start);
                            entries.reverse();
                            entries
                        }
                    }
                } else {
                    zset.index.range_by_rank(start, stop)
                };
                Outcome::Reply(Reply::Multi(with_scores(entries, show_scores)))
            }
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Multi(Vec::new())),
    }
}

/// Parses the optional trailing `WITHSCORES` and `LIMIT offset count` tokens
/// `ZRANGEBYSCORE` accepts, in either order. The original only recognizes a
/// fixed `LIMIT offset count` tail (spec §4.5); `WITHSCORES` is accepted
/// alongside it here since the rest of the ZRANGE family already supports it.
/// A negative `count` means "no limit", matching the original's `limit = -1`
/// sentinel; a negative `offset` clamps to zero.
fn parse_byscore_options(args: &[Vec<u8>]) -> Result<(bool, usize, Option<usize>), Reply> {
    let mut show_scores = false;
    let mut offset: i64 = 0;
    let mut count: Option<i64> = None;
    let mut i = 0;
    while i < args.len() {
        let token = args[i].to_ascii_uppercase();
        match token.as_slice() {
            b"WITHSCORES" => show_scores = true,
            b"LIMIT" => {
                if i + 2 >= args.len() {
                    return Err(error::syntax_error());
                }
                let off: i64 = std::str::from_utf8(&args[i + 1]).ok().and_then(|s| s.parse().ok()).ok_or_else(error::syntax_error)?;
                let cnt: i64 = std::str::from_utf8(&args[i + 2]).ok().and_then(|s| s.parse().ok()).ok_or_else(error::syntax_error)?;
                offset = off.max(0);
                count = Some(cnt);
                i += 2;
            }
            _ => return Err(error::syntax_error()),
        }
        i += 1;
    }
    let limit = match count {
        Some(n) if n >= 0 => Some(n as usize),
        _ => None,
    };
    Ok((show_scores, offset as usize, limit))
}

pub fn zrangebyscore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let min = match parse_f64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let max = match parse_f64(&args[3]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let (show_scores, offset, limit) = match parse_byscore_options(&args[4..]) {
        Ok(v) => v,
        Err(reply) => return Outcome::Reply(reply),
    };

    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::ZSet(zset) => {
                let entries = zset.index.range_by_score(min, max, offset, limit);
                Outcome::Reply(Reply::Multi(with_scores(entries, show_scores)))
            }
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Multi(Vec::new())),
    }
}

pub fn zcard(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::ZSet(zset) => Outcome::Reply(Reply::Integer(zset.len() as i64)),
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::Integer(0)),
    }
}

pub fn zscore(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::ZSet(zset) => match zset.score(&args[2]) {
                Some(score) => Outcome::Reply(Reply::bulk(format_double(score).into_bytes())),
                None => Outcome::Reply(Reply::NilBulk),
            },
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::NilBulk),
    }
}
