use crate::error::PersistError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ferrikv_core::{Bytes, Database, Entry, Keyspace, Object, StrValue, ValueData, ZSet};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

const MAGIC: &[u8; 5] = b"REDIS";
const VERSION: &[u8; 4] = b"0001";

const KIND_STRING: u8 = 0;
const KIND_LIST: u8 = 1;
const KIND_SET: u8 = 2;
const KIND_ZSET: u8 = 3;
const KIND_HASH: u8 = 4;

const OP_EXPIRETIME: u8 = 253;
const OP_SELECTDB: u8 = 254;
const OP_EOF: u8 = 255;

/// String-encoding tags living in the low 6 bits of a `11` length byte
/// (spec §4.8).
const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_COMPRESSED: u8 = 3;

/// Strings at or under this length attempt integer encoding (spec §4.8:
/// "Strings ≤11 bytes attempt integer encoding").
const INT_ENCODE_THRESHOLD: usize = 11;
/// Strings over this length attempt compression when enabled (spec §4.8:
/// "strings >20 bytes attempt LZF if compression is on").
const COMPRESS_THRESHOLD: usize = 20;

/// Sentinel length bytes for non-finite ZSET scores (spec §4.8).
const SCORE_NAN: u8 = 253;
const SCORE_POS_INF: u8 = 254;
const SCORE_NEG_INF: u8 = 255;

enum Length {
    Value(u64),
    Encoded(u8),
}

fn write_length<W: Write>(w: &mut W, len: u64) -> io::Result<()> {
    if len < 1 << 6 {
        w.write_u8(len as u8)
    } else if len < 1 << 14 {
        w.write_u8(0b0100_0000 | ((len >> 8) as u8))?;
        w.write_u8((len & 0xFF) as u8)
    } else {
        w.write_u8(0b1000_0000)?;
        w.write_u32::<byteorder::BigEndian>(len as u32)
    }
}

fn read_length<R: Read>(r: &mut R) -> Result<Length, PersistError> {
    let first = r.read_u8()?;
    match first >> 6 {
        0b00 => Ok(Length::Value((first & 0x3F) as u64)),
        0b01 => {
            let second = r.read_u8()?;
            Ok(Length::Value((((first & 0x3F) as u64) << 8) | second as u64))
        }
        0b10 => Ok(Length::Value(r.read_u32::<byteorder::BigEndian>()? as u64)),
        _ => Ok(Length::Encoded(first & 0x3F)),
    }
}

fn write_encoded_tag<W: Write>(w: &mut W, tag: u8) -> io::Result<()> {
    w.write_u8(0b1100_0000 | tag)
}

/// Writes a STRING payload using the integer/compressed/raw special
/// encodings described in spec §4.8.
fn write_string<W: Write>(w: &mut W, bytes: &[u8], compress: bool) -> io::Result<()> {
    if bytes.len() <= INT_ENCODE_THRESHOLD {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if let Ok(n) = text.parse::<i64>() {
                if n.to_string() == text {
                    if let Ok(v) = i8::try_from(n) {
                        write_encoded_tag(w, ENC_INT8)?;
                        return w.write_i8(v);
                    } else if let Ok(v) = i16::try_from(n) {
                        write_encoded_tag(w, ENC_INT16)?;
                        return w.write_i16::<LittleEndian>(v);
                    } else if let Ok(v) = i32::try_from(n) {
                        write_encoded_tag(w, ENC_INT32)?;
                        return w.write_i32::<LittleEndian>(v);
                    }
                }
            }
        }
    }

    if compress && bytes.len() > COMPRESS_THRESHOLD {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;
        if compressed.len() < bytes.len() {
            write_encoded_tag(w, ENC_COMPRESSED)?;
            write_length(w, compressed.len() as u64)?;
            write_length(w, bytes.len() as u64)?;
            return w.write_all(&compressed);
        }
    }

    write_length(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> Result<Bytes, PersistError> {
    match read_length(r)? {
        Length::Value(len) => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            Ok(buf)
        }
        Length::Encoded(ENC_INT8) => Ok(r.read_i8()?.to_string().into_bytes()),
        Length::Encoded(ENC_INT16) => Ok(r.read_i16::<LittleEndian>()?.to_string().into_bytes()),
        Length::Encoded(ENC_INT32) => Ok(r.read_i32::<LittleEndian>()?.to_string().into_bytes()),
        Length::Encoded(ENC_COMPRESSED) => {
            let compressed_len = match read_length(r)? {
                Length::Value(len) => len as usize,
                Length::Encoded(_) => return Err(PersistError::Corrupt("nested special length")),
            };
            let original_len = match read_length(r)? {
                Length::Value(len) => len as usize,
                Length::Encoded(_) => return Err(PersistError::Corrupt("nested special length")),
            };
            let mut compressed = vec![0u8; compressed_len];
            r.read_exact(&mut compressed)?;
            let mut decoder = DeflateDecoder::new(&compressed[..]);
            let mut out = Vec::with_capacity(original_len);
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Length::Encoded(_) => Err(PersistError::Corrupt("unknown string encoding tag")),
    }
}

fn write_double<W: Write>(w: &mut W, score: f64) -> io::Result<()> {
    if score.is_nan() {
        w.write_u8(SCORE_NAN)
    } else if score == f64::INFINITY {
        w.write_u8(SCORE_POS_INF)
    } else if score == f64::NEG_INFINITY {
        w.write_u8(SCORE_NEG_INF)
    } else {
        let text = ferrikv_proto::reply::format_double(score);
        w.write_u8(text.len() as u8)?;
        w.write_all(text.as_bytes())
    }
}

fn read_double<R: Read>(r: &mut R) -> Result<f64, PersistError> {
    let first = r.read_u8()?;
    match first {
        SCORE_NAN => Ok(f64::NAN),
        SCORE_POS_INF => Ok(f64::INFINITY),
        SCORE_NEG_INF => Ok(f64::NEG_INFINITY),
        len => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            std::str::from_utf8(&buf)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or(PersistError::Corrupt("malformed double"))
        }
    }
}

fn object_value(entry: &Entry) -> Option<std::cell::Ref<'_, Object>> {
    entry.as_resident().map(|obj| obj.borrow())
}

/// Serializes the whole keyspace in the file layout from spec §4.8:
/// magic, version, then per non-empty database a `SELECTDB` opcode
/// followed by its entries (each optionally preceded by an `EXPIRETIME`
/// opcode), terminated by `EOF`.
pub fn save<W: Write>(keyspace: &Keyspace, writer: &mut W, compress: bool) -> Result<(), PersistError> {
    writer.write_all(MAGIC)?;
    writer.write_all(VERSION)?;

    for (db_index, db) in keyspace.iter() {
        if db.is_empty() {
            continue;
        }
        writer.write_u8(OP_SELECTDB)?;
        write_length(writer, db_index as u64)?;

        for (key, entry) in &db.entries {
            let object = match object_value(entry) {
                Some(obj) => obj,
                None => continue, // swapped entries: pager must have drained first
            };

            if let Some(&at) = db.expiries.get(key) {
                writer.write_u8(OP_EXPIRETIME)?;
                writer.write_u32::<LittleEndian>(at as u32)?;
            }

            write_value(writer, key, &object.data, compress)?;
        }
    }

    writer.write_u8(OP_EOF)?;
    Ok(())
}

fn write_value<W: Write>(w: &mut W, key: &[u8], data: &ValueData, compress: bool) -> Result<(), PersistError> {
    w.write_u8(kind_byte(data))?;
    write_string(w, key, compress)?;
    write_payload_body(w, data, compress)
}

fn kind_byte(data: &ValueData) -> u8 {
    match data {
        ValueData::Str(_) => KIND_STRING,
        ValueData::List(_) => KIND_LIST,
        ValueData::Set(_) => KIND_SET,
        ValueData::ZSet(_) => KIND_ZSET,
        ValueData::Hash(_) => KIND_HASH,
    }
}

/// Writes just the kind-specific payload (no kind byte, no key) -- the
/// part of the encoding the virtual-memory pager reuses to serialize a
/// swapped-out value onto the swap file (spec §4.12).
fn write_payload_body<W: Write>(w: &mut W, data: &ValueData, compress: bool) -> Result<(), PersistError> {
    match data {
        ValueData::Str(s) => {
            write_string(w, &s.as_bytes(), compress)?;
        }
        ValueData::List(items) => {
            write_length(w, items.len() as u64)?;
            for item in items {
                write_string(w, item, compress)?;
            }
        }
        ValueData::Set(members) => {
            write_length(w, members.len() as u64)?;
            for member in members {
                write_string(w, member, compress)?;
            }
        }
        ValueData::ZSet(zset) => {
            write_length(w, zset.len() as u64)?;
            for (member, score) in &zset.scores {
                write_string(w, member, compress)?;
                write_double(w, *score)?;
            }
        }
        ValueData::Hash(fields) => {
            write_length(w, fields.len() as u64)?;
            for (field, value) in fields {
                write_string(w, field, compress)?;
                write_string(w, value, compress)?;
            }
        }
    }
    Ok(())
}

/// Serializes a single value's kind byte plus payload, with no key -- used
/// by the pager to write/size a swapped-out object (spec §4.12).
pub fn encode_object(data: &ValueData, compress: bool) -> Result<Vec<u8>, PersistError> {
    let mut buf = Vec::new();
    buf.write_u8(kind_byte(data))?;
    write_payload_body(&mut buf, data, compress)?;
    Ok(buf)
}

/// Inverse of [`encode_object`].
pub fn decode_object(bytes: &[u8]) -> Result<ValueData, PersistError> {
    let mut cursor = bytes;
    let kind = cursor.read_u8()?;
    read_value(&mut cursor, kind)
}

/// Loads a snapshot into a fresh `Keyspace` with `databases` slots (the
/// server always knows this count from its own configuration before it
/// loads anything).
pub fn load<R: Read>(reader: &mut R, databases: usize, now: u64) -> Result<Keyspace, PersistError> {
    let mut magic = [0u8; 5];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    if &version != VERSION {
        return Err(PersistError::UnsupportedVersion(version.to_vec()));
    }

    let mut keyspace = Keyspace::new(databases);
    let mut current_db = 0usize;
    let mut pending_expiry: Option<u64> = None;

    loop {
        let opcode = reader.read_u8()?;
        match opcode {
            OP_EOF => break,
            OP_SELECTDB => {
                current_db = match read_length(reader)? {
                    Length::Value(n) => n as usize,
                    Length::Encoded(_) => return Err(PersistError::Corrupt("select-db is not a length")),
                };
                if current_db >= keyspace.len() {
                    return Err(PersistError::Corrupt("select-db index out of range"));
                }
            }
            OP_EXPIRETIME => {
                pending_expiry = Some(reader.read_u32::<LittleEndian>()? as u64);
            }
            kind => {
                let key = read_string(reader)?;
                let data = read_value(reader, kind)?;
                let db = keyspace.db_mut(current_db);
                db.set(key.clone(), Entry::resident(Object::new(data, now)));
                if let Some(at) = pending_expiry.take() {
                    db.set_expiry(key, at);
                }
            }
        }
    }

    Ok(keyspace)
}

fn read_value<R: Read>(r: &mut R, kind: u8) -> Result<ValueData, PersistError> {
    match kind {
        KIND_STRING => {
            let bytes = read_string(r)?;
            Ok(ValueData::Str(StrValue::encode(bytes)))
        }
        KIND_LIST => {
            let count = read_count(r)?;
            let mut items = std::collections::VecDeque::with_capacity(count);
            for _ in 0..count {
                items.push_back(read_string(r)?);
            }
            Ok(ValueData::List(items))
        }
        KIND_SET => {
            let count = read_count(r)?;
            let mut set = hashbrown::HashSet::with_capacity(count);
            for _ in 0..count {
                set.insert(read_string(r)?);
            }
            Ok(ValueData::Set(set))
        }
        KIND_ZSET => {
            let count = read_count(r)?;
            let mut zset = ZSet::new();
            for _ in 0..count {
                let member = read_string(r)?;
                let score = read_double(r)?;
                zset.insert(member, score);
            }
            Ok(ValueData::ZSet(zset))
        }
        KIND_HASH => {
            let count = read_count(r)?;
            let mut map = hashbrown::HashMap::with_capacity(count);
            for _ in 0..count {
                let field = read_string(r)?;
                let value = read_string(r)?;
                map.insert(field, value);
            }
            Ok(ValueData::Hash(map))
        }
        _ => Err(PersistError::Corrupt("unknown value kind opcode")),
    }
}

fn read_count<R: Read>(r: &mut R) -> Result<usize, PersistError> {
    match read_length(r)? {
        Length::Value(n) => Ok(n as usize),
        Length::Encoded(_) => Err(PersistError::Corrupt("collection count is not a length")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrikv_core::{Entry, Keyspace};

    fn roundtrip(keyspace: &Keyspace, compress: bool, databases: usize) -> Keyspace {
        let mut buf = Vec::new();
        save(keyspace, &mut buf, compress).unwrap();
        load(&mut &buf[..], databases, 0).unwrap()
    }

    #[test]
    fn round_trips_a_string_list_set_and_zset() {
        let mut ks = Keyspace::new(2);
        ks.db_mut(0).set(
            b"greeting".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(b"hello".to_vec())), 0)),
        );
        ks.db_mut(0).set(
            b"counter".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Int(42)), 0)),
        );
        let mut items = std::collections::VecDeque::new();
        items.push_back(b"a".to_vec());
        items.push_back(b"b".to_vec());
        ks.db_mut(1)
            .set(b"mylist".to_vec(), Entry::resident(Object::new(ValueData::List(items), 0)));

        let mut z = ZSet::new();
        z.insert(b"m1".to_vec(), 1.5);
        z.insert(b"m2".to_vec(), f64::INFINITY);
        ks.db_mut(1)
            .set(b"myz".to_vec(), Entry::resident(Object::new(ValueData::ZSet(z), 0)));

        let loaded = roundtrip(&ks, false, 2);

        let v = loaded.db(0).entries.get(b"greeting".as_slice()).unwrap();
        match &v.as_resident().unwrap().borrow().data {
            ValueData::Str(s) => assert_eq!(s.as_bytes(), b"hello".to_vec()),
            other => panic!("expected string, got {:?}", other),
        }

        let counter = loaded.db(0).entries.get(b"counter".as_slice()).unwrap();
        match &counter.as_resident().unwrap().borrow().data {
            ValueData::Str(StrValue::Int(42)) => {}
            other => panic!("expected shared int encoding, got {:?}", other),
        }

        let z_loaded = loaded.db(1).entries.get(b"myz".as_slice()).unwrap();
        match &z_loaded.as_resident().unwrap().borrow().data {
            ValueData::ZSet(z) => assert_eq!(z.score(b"m2"), Some(f64::INFINITY)),
            other => panic!("expected zset, got {:?}", other),
        }
    }

    #[test]
    fn integer_strings_survive_compressed_mode_unchanged() {
        let mut ks = Keyspace::new(1);
        ks.db_mut(0).set(
            b"n".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(b"-17".to_vec())), 0)),
        );
        let loaded = roundtrip(&ks, true, 1);
        let v = loaded.db(0).entries.get(b"n".as_slice()).unwrap();
        match &v.as_resident().unwrap().borrow().data {
            ValueData::Str(s) => assert_eq!(s.as_bytes(), b"-17".to_vec()),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn long_raw_string_round_trips_through_compression() {
        let payload = vec![b'x'; 500];
        let mut ks = Keyspace::new(1);
        ks.db_mut(0).set(
            b"blob".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(payload.clone())), 0)),
        );
        let loaded = roundtrip(&ks, true, 1);
        let v = loaded.db(0).entries.get(b"blob".as_slice()).unwrap();
        match &v.as_resident().unwrap().borrow().data {
            ValueData::Str(s) => assert_eq!(s.as_bytes(), payload),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn expiry_survives_round_trip() {
        let mut ks = Keyspace::new(1);
        ks.db_mut(0).set(
            b"k".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(b"v".to_vec())), 0)),
        );
        ks.db_mut(0).set_expiry(b"k".to_vec(), 123456);
        let loaded = roundtrip(&ks, false, 1);
        assert_eq!(loaded.db(0).expiries.get(b"k".as_slice()), Some(&123456));
    }

    #[test]
    fn encode_decode_object_round_trips_without_a_key() {
        let data = ValueData::Str(StrValue::Raw(b"payload".to_vec()));
        let encoded = encode_object(&data, false).unwrap();
        match decode_object(&encoded).unwrap() {
            ValueData::Str(s) => assert_eq!(s.as_bytes(), b"payload".to_vec()),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let bogus = b"NOTREDIS".to_vec();
        let err = load(&mut &bogus[..], 1, 0).unwrap_err();
        assert!(matches!(err, PersistError::BadMagic));
    }
}
