//! STRING commands (spec §6): GET/SET/SETNX/GETSET/MGET/MSET/MSETNX/INCR/
//! DECR/INCRBY/DECRBY.

use super::{db_index, parse_i64};
use crate::error;
use crate::server::{Outcome, Server};
use ferrikv_core::{ClientId, ValueData};
use ferrikv_proto::Reply;
use ferrikv_proto::time::timestamp_secs;

pub fn get(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    match srv.resolve_read(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Str(s) => Outcome::Reply(Reply::bulk(s.as_bytes())),
            _ => Outcome::Reply(error::wrong_type()),
        },
        None => Outcome::Reply(Reply::NilBulk),
    }
}

pub fn set(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let now = timestamp_secs();
    let value = srv.make_string(args[2].clone(), now);
    srv.set_value(db, args[1].clone(), value);
    srv.dirty += 1;
    Outcome::Reply(Reply::ok())
}

pub fn setnx(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    if srv.resolve_write(db, &args[1]).is_some() {
        return Outcome::Reply(Reply::Integer(0));
    }
    let now = timestamp_secs();
    let value = srv.make_string(args[2].clone(), now);
    srv.set_value(db, args[1].clone(), value);
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(1))
}

pub fn getset(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let previous = match srv.resolve_write(db, &args[1]) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Str(s) => Some(Reply::bulk(s.as_bytes())),
            _ => return Outcome::Reply(error::wrong_type()),
        },
        None => None,
    };
    let now = timestamp_secs();
    let value = srv.make_string(args[2].clone(), now);
    srv.set_value(db, args[1].clone(), value);
    srv.dirty += 1;
    Outcome::Reply(previous.unwrap_or(Reply::NilBulk))
}

pub fn mget(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let db = db_index(srv, id);
    let replies = args[1..]
        .iter()
        .map(|key| match srv.resolve_read(db, key) {
            Some(obj) => match &obj.borrow().data {
                ValueData::Str(s) => Reply::bulk(s.as_bytes()),
                _ => Reply::NilBulk,
            },
            None => Reply::NilBulk,
        })
        .collect();
    Outcome::Reply(Reply::Multi(replies))
}

pub fn mset(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    if (args.len() - 1) % 2 != 0 {
        return Outcome::Reply(error::wrong_number_of_arguments());
    }
    let db = db_index(srv, id);
    let now = timestamp_secs();
    for pair in args[1..].chunks_exact(2) {
        let value = srv.make_string(pair[1].clone(), now);
        srv.set_value(db, pair[0].clone(), value);
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::ok())
}

pub fn msetnx(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    if (args.len() - 1) % 2 != 0 {
        return Outcome::Reply(error::wrong_number_of_arguments());
    }
    let db = db_index(srv, id);
    let any_exists = args[1..].chunks_exact(2).any(|pair| srv.resolve_write(db, &pair[0]).is_some());
    if any_exists {
        return Outcome::Reply(Reply::Integer(0));
    }
    let now = timestamp_secs();
    for pair in args[1..].chunks_exact(2) {
        let value = srv.make_string(pair[1].clone(), now);
        srv.set_value(db, pair[0].clone(), value);
    }
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(1))
}

fn incr_by(srv: &mut Server, id: ClientId, key: &[u8], delta: i64) -> Outcome {
    let db = db_index(srv, id);
    let current = match srv.resolve_write(db, key) {
        Some(obj) => match &obj.borrow().data {
            ValueData::Str(s) => match std::str::from_utf8(&s.as_bytes()).ok().and_then(|t| t.parse::<i64>().ok()) {
                Some(n) => n,
                None => return Outcome::Reply(error::not_an_integer()),
            },
            _ => return Outcome::Reply(error::wrong_type()),
        },
        None => 0,
    };
    let new_value = match current.checked_add(delta) {
        Some(n) => n,
        None => return Outcome::Reply(Reply::error("ERR increment or decrement would overflow")),
    };
    let now = timestamp_secs();
    let value = srv.make_string(new_value.to_string().into_bytes(), now);
    srv.set_value(db, key.to_vec(), value);
    srv.dirty += 1;
    Outcome::Reply(Reply::Integer(new_value))
}

pub fn incr(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    incr_by(srv, id, &args[1], 1)
}

pub fn decr(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    incr_by(srv, id, &args[1], -1)
}

pub fn incrby(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let delta = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    incr_by(srv, id, &args[1], delta)
}

pub fn decrby(srv: &mut Server, id: ClientId, args: &[Vec<u8>]) -> Outcome {
    let delta = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Outcome::Reply(reply),
    };
    let negated = match delta.checked_neg() {
        Some(n) => n,
        None => return Outcome::Reply(Reply::error("ERR increment or decrement would overflow")),
    };
    incr_by(srv, id, &args[1], negated)
}
