//! Reply encoding: the five wire shapes from spec §4.1 plus the two nil
//! variants. `Reply` values are built by command handlers and flattened into
//! bytes by `encode_into`, which the connection layer's output queue stores.

/// A single framed reply, or a pre-flattened byte run. The `Raw` variant
/// exists so the connection layer's "glue" optimisation (coalescing a run of
/// small replies into one buffer, §4.11) can splice already-encoded bytes
/// back into the queue without re-parsing them.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NilBulk,
    Multi(Vec<Reply>),
    NilMulti,
    Raw(Vec<u8>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_owned())
    }

    pub fn queued() -> Reply {
        Reply::Simple("QUEUED".to_owned())
    }

    pub fn error(msg: impl Into<String>) -> Reply {
        Reply::Error(msg.into())
    }

    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Reply {
        Reply::Bulk(bytes.into())
    }

    pub fn from_bulk_strings<I, S>(items: I) -> Reply
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        Reply::Multi(items.into_iter().map(|s| Reply::Bulk(s.into())).collect())
    }

    /// Encoded byte length, used by the glue optimisation to decide whether
    /// a run of replies fits under the 1024 byte coalescing threshold.
    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(bytes) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NilBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::NilMulti => out.extend_from_slice(b"*-1\r\n"),
            Reply::Multi(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Formats a floating point score the way `ZSCORE`/`ZRANGE WITHSCORES`
/// require: a fixed 17-character representation (spec §8 scenario 3, e.g.
/// `1.0` -> `1.000000000000000`, 17 bytes -- `$17\r\n1.0000...\r\n`).
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_owned() } else { "-inf".to_owned() };
    }
    format!("{:.15}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(Reply::ok().to_bytes(), b"+OK\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(Reply::bulk(&b"bar"[..]).to_bytes(), b"$3\r\nbar\r\n");
    }

    #[test]
    fn encodes_nil_bulk_and_nil_multi() {
        assert_eq!(Reply::NilBulk.to_bytes(), b"$-1\r\n");
        assert_eq!(Reply::NilMulti.to_bytes(), b"*-1\r\n");
    }

    #[test]
    fn encodes_nested_multi_bulk() {
        let reply = Reply::from_bulk_strings(vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(reply.to_bytes(), b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[test]
    fn encodes_error() {
        assert_eq!(
            Reply::error("ERR syntax error").to_bytes(),
            b"-ERR syntax error\r\n"
        );
    }
}
