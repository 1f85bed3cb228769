//! Stream view over a buffer's content.

use std::io::{self, BufRead, Read, Seek, SeekFrom};

use super::lock::ReadLock;

/// A `Read + BufRead + Seek` view over a buffer, for serializers.
///
/// Holds a read lock for its whole lifetime, so the buffer stays resident
/// (and unmodified) until the stream is dropped.
pub struct RestoreStream<'a> {
    lock: ReadLock<'a>,
    position: u64,
}

impl<'a> RestoreStream<'a> {
    pub(crate) fn new(lock: ReadLock<'a>) -> Self {
        Self { lock, position: 0 }
    }

    /// Returns the total number of bytes in the stream.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.lock.len() as u64
    }

    /// Returns `true` if the stream has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock.is_empty()
    }

    /// Returns the current read position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Releases the stream, returning the underlying read lock.
    #[must_use]
    pub fn into_lock(self) -> ReadLock<'a> {
        self.lock
    }

    fn remaining(&self) -> &[u8] {
        let start = usize::try_from(self.position)
            .unwrap_or(usize::MAX)
            .min(self.lock.len());
        &self.lock[start..]
    }
}

impl Read for RestoreStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let remaining = self.remaining();
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            n
        };
        self.position += n as u64;
        Ok(n)
    }
}

impl BufRead for RestoreStream<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.remaining())
    }

    fn consume(&mut self, amt: usize) {
        self.position = self.position.saturating_add(amt as u64).min(self.len());
    }
}

impl Seek for RestoreStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::{AllocationPolicy, BufferObject, BufferState};
    use crate::manager::{BufferManager, BufferManagerConfig, PolicyKind};
    use outcore_common::memory::FixedMemoryMonitor;
    use std::io::{BufRead, Read, Seek, SeekFrom};
    use std::sync::Arc;

    fn manager() -> Arc<BufferManager> {
        let config = BufferManagerConfig::default().with_policy(PolicyKind::Never);
        BufferManager::new(config, Arc::new(FixedMemoryMonitor::default())).unwrap()
    }

    #[test]
    fn test_stream_reads_dumped_buffer() {
        let manager = manager();
        let buffer = BufferObject::new(&manager);
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        buffer.set_buffer(content.clone().into_boxed_slice()).unwrap();
        assert!(manager.dump(&buffer).unwrap());
        assert_eq!(buffer.state(), BufferState::Dumped);

        let mut stream = manager.open_restore_stream(&buffer).unwrap();
        assert_eq!(buffer.state(), BufferState::Resident);
        assert_eq!(buffer.lock_count(), 1);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, content);
        drop(stream);
        assert_eq!(buffer.lock_count(), 0);
    }

    #[test]
    fn test_stream_pins_buffer() {
        let manager = manager();
        let buffer = BufferObject::new(&manager);
        buffer.allocate(8192, AllocationPolicy::Heap).unwrap();

        let stream = buffer.restore_stream().unwrap();
        assert!(!manager.dump(&buffer).unwrap());
        drop(stream);
        assert!(manager.dump(&buffer).unwrap());
    }

    #[test]
    fn test_seek_and_buf_read() {
        let manager = manager();
        let buffer = BufferObject::new(&manager);
        buffer
            .set_buffer(b"line one\nline two\n".to_vec().into_boxed_slice())
            .unwrap();

        let mut stream = buffer.restore_stream().unwrap();
        assert_eq!(stream.seek(SeekFrom::Start(9)).unwrap(), 9);
        let mut line = String::new();
        stream.read_line(&mut line).unwrap();
        assert_eq!(line, "line two\n");

        assert_eq!(stream.seek(SeekFrom::End(-4)).unwrap(), 14);
        assert_eq!(stream.seek(SeekFrom::Current(-14)).unwrap(), 0);
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());

        // Past the end reads nothing.
        stream.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
