use ferrikv_proto::Reply;

/// Commands a replica sends in order to perform the handshake with its
/// configured master (spec §4.10): `AUTH` first if `masterauth` is set,
/// then `SYNC`.
pub fn handshake_commands(masterauth: Option<&[u8]>) -> Vec<Vec<u8>> {
    let mut commands = Vec::new();
    if let Some(password) = masterauth {
        commands.push(Reply::from_bulk_strings(vec![b"AUTH".to_vec(), password.to_vec()]).to_bytes());
    }
    commands.push(Reply::from_bulk_strings(vec![b"SYNC".to_vec()]).to_bytes());
    commands
}

/// Parses the `$<size>\r\n` prefix a master sends to announce the bulk
/// snapshot transfer size. Returns `(size, bytes_consumed)` on a complete
/// header, or `None` if more data is needed.
pub fn parse_bulk_size_header(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.first() != Some(&b'$') {
        return None;
    }
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    let size: usize = std::str::from_utf8(&buf[1..end]).ok()?.parse().ok()?;
    Some((size, end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_without_auth_is_just_sync() {
        let commands = handshake_commands(None);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], b"*1\r\n$4\r\nSYNC\r\n".to_vec());
    }

    #[test]
    fn handshake_with_auth_sends_auth_first() {
        let commands = handshake_commands(Some(b"secret"));
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n".to_vec());
    }

    #[test]
    fn parses_bulk_size_header() {
        let mut buf = b"$12345\r\n".to_vec();
        buf.extend_from_slice(b"rest of the bytes");
        let (size, consumed) = parse_bulk_size_header(&buf).unwrap();
        assert_eq!(size, 12345);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn incomplete_header_returns_none() {
        assert!(parse_bulk_size_header(b"$123").is_none());
    }
}
