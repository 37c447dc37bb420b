use crate::error::PersistError;
use ferrikv_proto::Reply;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// How aggressively the AOF file descriptor is fsynced (spec §4.9
/// `appendfsync` directive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    Always,
    EverySec,
    Never,
}

/// Encodes a command as the canonical multi-bulk wire form the AOF (and the
/// replication feed) both use to record mutating calls (spec §4.9, §4.10).
/// This is exactly what `Reply::from_bulk_strings` already produces, since
/// a command and a multi-bulk reply share the same `*N\r\n($len\r\n...)*`
/// shape.
pub fn encode_command(args: &[Vec<u8>]) -> Vec<u8> {
    Reply::from_bulk_strings(args.iter().cloned()).to_bytes()
}

/// Rewrites an `EXPIRE key seconds` call into an absolute `EXPIREAT key
/// at` call so the AOF replays correctly regardless of when it's loaded
/// (spec §4.9).
pub fn rewrite_expire_to_expireat(args: &[Vec<u8>], now: u64) -> Option<Vec<Vec<u8>>> {
    if args.len() != 3 {
        return None;
    }
    if !args[0].eq_ignore_ascii_case(b"EXPIRE") {
        return None;
    }
    let seconds: i64 = std::str::from_utf8(&args[2]).ok()?.parse().ok()?;
    let at = now as i64 + seconds;
    Some(vec![b"EXPIREAT".to_vec(), args[1].clone(), at.to_string().into_bytes()])
}

/// Append-only log handle: a growing in-process buffer flushed to the
/// underlying file per the configured fsync policy.
pub struct AofWriter {
    file: File,
    policy: FsyncPolicy,
    last_fsync_secs: u64,
}

impl AofWriter {
    pub fn open(path: &Path, policy: FsyncPolicy) -> Result<AofWriter, PersistError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(AofWriter {
            file,
            policy,
            last_fsync_secs: 0,
        })
    }

    /// Appends one command's canonical encoding and fsyncs according to
    /// policy. `now` is only consulted for `EverySec`.
    pub fn append(&mut self, args: &[Vec<u8>], now: u64) -> Result<(), PersistError> {
        let encoded = encode_command(args);
        self.file.write_all(&encoded)?;
        match self.policy {
            FsyncPolicy::Always => self.file.sync_data()?,
            FsyncPolicy::EverySec => {
                if now > self.last_fsync_secs {
                    self.file.sync_data()?;
                    self.last_fsync_secs = now;
                }
            }
            FsyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Forces an fsync regardless of policy -- used before process exit and
    /// after an AOF short write is detected (spec §7: "AOF short writes
    /// ... the process exits to preserve durability guarantees").
    pub fn flush(&mut self) -> Result<(), PersistError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Parses one full command (a multi-bulk frame) from an AOF/replay stream.
/// Used both to load the AOF at startup and to feed a replica's SYNC
/// stream. Returns `Ok(None)` on clean EOF between frames.
pub fn read_command<R: BufRead>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>, PersistError> {
    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        return Ok(None);
    }
    let header = header.trim_end_matches(['\r', '\n']);
    if !header.starts_with('*') {
        return Err(PersistError::Corrupt("expected multi-bulk command header"));
    }
    let count: usize = header[1..]
        .parse()
        .map_err(|_| PersistError::Corrupt("bad multi-bulk count"))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let mut bulk_header = String::new();
        if reader.read_line(&mut bulk_header)? == 0 {
            return Err(PersistError::Corrupt("truncated AOF entry"));
        }
        let bulk_header = bulk_header.trim_end_matches(['\r', '\n']);
        if !bulk_header.starts_with('$') {
            return Err(PersistError::Corrupt("expected bulk length"));
        }
        let len: usize = bulk_header[1..]
            .parse()
            .map_err(|_| PersistError::Corrupt("bad bulk length"))?;
        let mut bytes = vec![0u8; len + 2];
        reader.read_exact(&mut bytes)?;
        bytes.truncate(len);
        args.push(bytes);
    }
    Ok(Some(args))
}

/// Replays every command in an AOF file through `apply`, as a synthetic
/// client would at startup (spec §4.9 "Loading at startup").
pub fn replay<R: io::Read, F: FnMut(Vec<Vec<u8>>)>(reader: R, mut apply: F) -> Result<(), PersistError> {
    let mut reader = BufReader::new(reader);
    while let Some(args) = read_command(&mut reader)? {
        apply(args);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_command_as_multibulk() {
        let args = vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()];
        assert_eq!(encode_command(&args), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn rewrites_expire_to_expireat() {
        let args = vec![b"EXPIRE".to_vec(), b"k".to_vec(), b"10".to_vec()];
        let rewritten = rewrite_expire_to_expireat(&args, 1000).unwrap();
        assert_eq!(rewritten, vec![b"EXPIREAT".to_vec(), b"k".to_vec(), b"1010".to_vec()]);
    }

    #[test]
    fn non_expire_commands_are_not_rewritten() {
        let args = vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()];
        assert!(rewrite_expire_to_expireat(&args, 1000).is_none());
    }

    #[test]
    fn replay_drives_every_command_through_the_callback() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_command(&[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]));
        buf.extend_from_slice(&encode_command(&[b"DEL".to_vec(), b"a".to_vec()]));

        let mut seen = Vec::new();
        replay(Cursor::new(buf), |args| seen.push(args)).unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][0], b"SET".to_vec());
        assert_eq!(seen[1][0], b"DEL".to_vec());
    }

    #[test]
    fn read_command_rejects_malformed_header() {
        let mut reader = BufReader::new(Cursor::new(b"not-a-frame\r\n".to_vec()));
        let err = read_command(&mut reader).unwrap_err();
        assert!(matches!(err, PersistError::Corrupt(_)));
    }
}
