use crate::buffer::Buffer;
use crate::error::ProtoError;

/// Hard limit shared by inline lines and bulk lengths (spec §4.1): a single
/// byte count at or beyond this closes the connection as a protocol error.
pub const MAX_REQUEST_SIZE: usize = 256 * 1024 * 1024;

/// Sanity bound on the number of arguments in a single multi-bulk request,
/// independent of the per-argument byte limit above.
const MAX_MULTIBULK_COUNT: i64 = 1024 * 1024;

/// Outcome of attempting to parse one command off the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not enough bytes buffered yet; try again once more data arrives.
    Incomplete,
    /// A blank inline line was consumed; nothing to dispatch.
    Empty,
    /// A full command was parsed: the argument vector, binary safe.
    Complete(Vec<Vec<u8>>),
}

/// Stateless incremental parser: every call re-scans from the head of the
/// buffer, so no parse state needs to survive between calls beyond what is
/// still sitting in the `Buffer`. `is_bulk_command` lets the caller (the
/// command table) flag commands whose inline framing carries a trailing
/// bulk payload (spec §4.1 framing 1); multi-bulk requests are always fully
/// binary safe and never consult it.
#[derive(Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Parser {
        Parser
    }

    pub fn parse(
        &mut self,
        buffer: &mut Buffer,
        is_bulk_command: impl Fn(&[u8]) -> bool,
    ) -> Result<ParseOutcome, ProtoError> {
        let data = buffer.data_slice();
        if data.is_empty() {
            return Ok(ParseOutcome::Incomplete);
        }

        let result = if data[0] == b'*' {
            parse_multibulk(data)
        } else {
            parse_inline(data, &is_bulk_command)
        };

        match result {
            Ok(Some((consumed, args))) => {
                buffer.consume(consumed);
                if args.is_empty() {
                    Ok(ParseOutcome::Empty)
                } else {
                    Ok(ParseOutcome::Complete(args))
                }
            }
            Ok(None) => Ok(ParseOutcome::Incomplete),
            Err(err) => Err(err),
        }
    }
}

/// Finds the first CRLF or bare LF in `data`, returning `(line_without_eol,
/// total_bytes_including_eol)`.
fn find_line(data: &[u8]) -> Option<(&[u8], usize)> {
    let lf = data.iter().position(|&b| b == b'\n')?;
    let (line, total) = if lf > 0 && data[lf - 1] == b'\r' {
        (&data[..lf - 1], lf + 1)
    } else {
        (&data[..lf], lf + 1)
    };
    Some((line, total))
}

fn parse_decimal(bytes: &[u8]) -> Result<i64, ProtoError> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| ProtoError::Malformed("invalid length"))?;
    text.trim()
        .parse::<i64>()
        .map_err(|_| ProtoError::Malformed("invalid length"))
}

fn parse_inline(
    data: &[u8],
    is_bulk_command: &impl Fn(&[u8]) -> bool,
) -> Result<Option<(usize, Vec<Vec<u8>>)>, ProtoError> {
    let (line, consumed) = match find_line(data) {
        Some(found) => found,
        None => {
            if data.len() >= MAX_REQUEST_SIZE {
                return Err(ProtoError::RequestTooLarge);
            }
            return Ok(None);
        }
    };

    if line.len() >= MAX_REQUEST_SIZE {
        return Err(ProtoError::RequestTooLarge);
    }

    let mut tokens: Vec<Vec<u8>> = line
        .split(|&b| b == b' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_vec())
        .collect();

    if tokens.is_empty() {
        return Ok(Some((consumed, Vec::new())));
    }

    if !is_bulk_command(&tokens[0]) {
        return Ok(Some((consumed, tokens)));
    }

    // BULK framing: the line's last token is a decimal byte count, and the
    // actual payload follows as raw bytes terminated by CRLF.
    let count_token = tokens
        .pop()
        .ok_or(ProtoError::Malformed("missing bulk length"))?;
    let bulk_len = parse_decimal(&count_token)?;

    if bulk_len < 0 || bulk_len as usize >= MAX_REQUEST_SIZE {
        return Err(ProtoError::RequestTooLarge);
    }
    let bulk_len = bulk_len as usize;

    let remaining = &data[consumed..];
    let needed = bulk_len + 2;
    if remaining.len() < needed {
        return Ok(None);
    }

    if &remaining[bulk_len..bulk_len + 2] != b"\r\n" {
        return Err(ProtoError::Malformed("missing bulk terminator"));
    }

    tokens.push(remaining[..bulk_len].to_vec());

    Ok(Some((consumed + needed, tokens)))
}

fn parse_multibulk(data: &[u8]) -> Result<Option<(usize, Vec<Vec<u8>>)>, ProtoError> {
    let (header, mut consumed) = match find_line(data) {
        Some(found) => found,
        None => {
            if data.len() >= MAX_REQUEST_SIZE {
                return Err(ProtoError::RequestTooLarge);
            }
            return Ok(None);
        }
    };

    if header.is_empty() || header[0] != b'*' {
        return Err(ProtoError::Malformed("expected '*'"));
    }

    let count = parse_decimal(&header[1..])?;
    if count < 0 {
        // Nil multi-bulk request: treat as an empty, ignorable line.
        return Ok(Some((consumed, Vec::new())));
    }
    if count > MAX_MULTIBULK_COUNT {
        return Err(ProtoError::RequestTooLarge);
    }

    let count = count as usize;
    let mut args = Vec::with_capacity(count);

    for _ in 0..count {
        let rest = &data[consumed..];
        let (len_line, len_consumed) = match find_line(rest) {
            Some(found) => found,
            None => {
                if rest.len() >= MAX_REQUEST_SIZE {
                    return Err(ProtoError::RequestTooLarge);
                }
                return Ok(None);
            }
        };

        if len_line.is_empty() || len_line[0] != b'$' {
            return Err(ProtoError::Malformed("expected '$'"));
        }

        let bulk_len = parse_decimal(&len_line[1..])?;
        if bulk_len < 0 || bulk_len as usize >= MAX_REQUEST_SIZE {
            return Err(ProtoError::RequestTooLarge);
        }
        let bulk_len = bulk_len as usize;

        consumed += len_consumed;
        let payload_region = &data[consumed..];
        let needed = bulk_len + 2;
        if payload_region.len() < needed {
            return Ok(None);
        }

        if &payload_region[bulk_len..bulk_len + 2] != b"\r\n" {
            return Err(ProtoError::Malformed("missing bulk terminator"));
        }

        args.push(payload_region[..bulk_len].to_vec());
        consumed += needed;
    }

    Ok(Some((consumed, args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_bulk(_: &[u8]) -> bool {
        false
    }

    #[test]
    fn parses_simple_inline_command() {
        let mut buf = Buffer::new(4096);
        buf.push(b"PING\r\n");
        let mut parser = Parser::new();
        match parser.parse(&mut buf, no_bulk).unwrap() {
            ParseOutcome::Complete(args) => assert_eq!(args, vec![b"PING".to_vec()]),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_multibulk_command() {
        let mut buf = Buffer::new(4096);
        buf.push(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        let mut parser = Parser::new();
        match parser.parse(&mut buf, no_bulk).unwrap() {
            ParseOutcome::Complete(args) => {
                assert_eq!(
                    args,
                    vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn leaves_partial_multibulk_untouched() {
        let mut buf = Buffer::new(4096);
        buf.push(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nba");
        let mut parser = Parser::new();
        assert_eq!(parser.parse(&mut buf, no_bulk).unwrap(), ParseOutcome::Incomplete);
        assert_eq!(buf.len(), b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nba".len());
    }

    #[test]
    fn parses_and_consumes_then_leaves_remainder() {
        let mut buf = Buffer::new(4096);
        buf.push(b"PING\r\nPING\r\n");
        let mut parser = Parser::new();
        parser.parse(&mut buf, no_bulk).unwrap();
        assert_eq!(buf.data_slice(), b"PING\r\n");
    }

    #[test]
    fn inline_bulk_framing_reads_trailing_payload() {
        let mut buf = Buffer::new(4096);
        buf.push(b"SET foo 3\r\nbar\r\n");
        let mut parser = Parser::new();
        let is_bulk = |name: &[u8]| name.eq_ignore_ascii_case(b"SET");
        match parser.parse(&mut buf, is_bulk).unwrap() {
            ParseOutcome::Complete(args) => {
                assert_eq!(
                    args,
                    vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_oversized_bulk_length() {
        let mut buf = Buffer::new(4096);
        buf.push(b"*1\r\n$999999999999\r\n");
        let mut parser = Parser::new();
        assert_eq!(
            parser.parse(&mut buf, no_bulk).unwrap_err(),
            ProtoError::RequestTooLarge
        );
    }

    #[test]
    fn blank_inline_line_is_empty_not_complete() {
        let mut buf = Buffer::new(4096);
        buf.push(b"\r\n");
        let mut parser = Parser::new();
        assert_eq!(parser.parse(&mut buf, no_bulk).unwrap(), ParseOutcome::Empty);
    }
}
