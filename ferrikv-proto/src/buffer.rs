use slice_deque::SliceDeque;
use std::io;

type ByteDeque = SliceDeque<u8>;

/// A dynamically growable, double ended byte queue. Data is appended at the
/// tail and consumed from the head; both ends expose a contiguous slice so
/// the parser and the socket read/write calls never have to deal with
/// wraparound.
///
/// Unlike the fixed-capacity channel buffer this is adapted from, a
/// `Buffer` grows on demand up to `max_size` rather than erroring out on the
/// first write past a hard-coded capacity -- client input is attacker
/// controlled and the 256 MiB protocol limit is enforced by the parser, not
/// the buffer.
pub struct Buffer {
    data: ByteDeque,
    max_size: usize,
}

const GROWTH_INCREMENT: usize = 16 * 1024;

impl Buffer {
    #[inline]
    pub fn new(max_size: usize) -> Buffer {
        let mut data = ByteDeque::new();
        data.reserve(GROWTH_INCREMENT);
        Buffer { data, max_size }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    #[inline]
    pub fn move_head(&mut self, count: usize) {
        unsafe { self.data.move_head(count as isize) }
    }

    #[inline]
    pub fn move_tail(&mut self, count: usize) {
        unsafe { self.data.move_tail(count as isize) }
    }

    /// Slice containing buffered, not yet consumed data.
    #[inline]
    pub fn data_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.len();
        self.move_head(len);
    }

    /// Discard the first `count` bytes, typically once a full command has
    /// been parsed out of the front of the buffer.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        self.move_head(count);
    }

    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.write_slice()[..bytes.len()].copy_from_slice(bytes);
        self.move_tail(bytes.len());
    }

    fn ensure_capacity(&mut self, additional: usize) {
        while self.free_capacity() < additional {
            let grown = self.data.capacity() + GROWTH_INCREMENT;
            self.data.reserve(grown - self.data.capacity());
        }
    }

    /// Mutable slice of currently free capacity to write new data into.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        unsafe { self.data.tail_head_slice() }
    }

    /// Reads as much as is available off `reader` into the buffer, growing
    /// it as needed up to `max_size`. Returns the number of bytes read,
    /// `0` meaning the peer would block (non-blocking socket) or EOF.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        if self.free_capacity() == 0 {
            if self.len() >= self.max_size {
                return Err(io::Error::new(io::ErrorKind::Other, "buffer overrun"));
            }
            self.ensure_capacity(GROWTH_INCREMENT);
        }

        let slice = self.write_slice();
        let read_count = reader.read(slice)?;
        self.move_tail(read_count);
        Ok(read_count)
    }

    /// Writes buffered data to `writer`, advancing the head by however much
    /// was actually accepted. Returns the number of bytes sent.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let write_count = writer.write(self.data.as_slice())?;
        if write_count == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        self.move_head(write_count);
        Ok(write_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_consume_roundtrip() {
        let mut buf = Buffer::new(1024);
        buf.push(b"hello world");
        assert_eq!(buf.data_slice(), b"hello world");
        buf.consume(6);
        assert_eq!(buf.data_slice(), b"world");
    }

    #[test]
    fn ingress_grows_past_initial_reservation() {
        let payload = vec![7u8; GROWTH_INCREMENT * 3];
        let mut buf = Buffer::new(usize::MAX);
        let mut remaining = &payload[..];
        let mut total = 0;
        while total < payload.len() {
            let n = buf.ingress(&mut remaining).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, payload.len());
        assert_eq!(buf.data_slice(), &payload[..]);
    }

    #[test]
    fn egress_writes_out_and_consumes() {
        let mut buf = Buffer::new(1024);
        buf.push(b"abc");
        let mut out = Vec::new();
        let n = buf.egress(&mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, b"abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn egress_zero_write_is_an_error() {
        struct ZeroWriter;
        impl io::Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut buf = Buffer::new(1024);
        buf.push(b"x");
        let result = buf.egress(ZeroWriter);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WriteZero);
    }
}
