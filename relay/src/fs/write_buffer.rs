use super::Storage;
use std::io;

/// Default accumulation capacity for one in-flight upload.
pub const WRITE_BUFFER_CAPACITY: usize = 16 * 1024;

/// Accumulates payload chunks of one upload and flushes them to storage in
/// bounded pieces, so a large file never sits in memory whole.
pub struct WriteBuffer {
    file_name: String,
    accumulated: Vec<u8>,
    capacity: usize,
    written_offset: u64,
}

impl WriteBuffer {
    pub fn new(file_name: String) -> Self {
        Self::with_capacity(file_name, WRITE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(file_name: String, capacity: usize) -> Self {
        Self {
            file_name,
            accumulated: Vec::with_capacity(capacity),
            capacity,
            written_offset: 0,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Bytes already flushed to storage for this file.
    pub fn written_offset(&self) -> u64 {
        self.written_offset
    }

    /// Bytes currently accumulated and not yet flushed.
    pub fn pending(&self) -> usize {
        self.accumulated.len()
    }

    /// Copies `bytes` into the buffer, flushing each time the buffer fills.
    /// On a storage error nothing accumulated is discarded, so the same call
    /// can be retried without losing or duplicating data.
    pub fn append(&mut self, storage: &dyn Storage, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            if self.accumulated.len() == self.capacity {
                self.flush(storage)?;
            }

            let room = self.capacity - self.accumulated.len();
            let take = room.min(bytes.len());
            self.accumulated.extend_from_slice(&bytes[.. take]);
            bytes = &bytes[take ..];
        }
        Ok(())
    }

    /// Appends everything accumulated to the target file and empties the
    /// buffer. A no-op when nothing is pending.
    pub fn flush(&mut self, storage: &dyn Storage) -> io::Result<()> {
        if self.accumulated.is_empty() {
            return Ok(());
        }

        storage.append(&self.file_name, &self.accumulated)?;
        self.written_offset += self.accumulated.len() as u64;
        self.accumulated.clear();
        Ok(())
    }
}
