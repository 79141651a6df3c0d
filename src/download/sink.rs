use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

/// Random-access write destination shared by the workers of one session.
/// Implementations serialize their own writes; callers never hold a sink
/// lock across network reads.
pub trait DownloadSink: Send + Sync {
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()>;

    /// Reserves space for the final file. Best effort.
    fn allocate(&self, _total: u64) -> std::io::Result<()> {
        Ok(())
    }
}

/// File-backed sink. One mutex serializes the seek + write pairs so
/// concurrent workers cannot tear each other's writes.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn new(file: File) -> Self {
        Self { file: Mutex::new(file) }
    }

    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl DownloadSink for FileSink {
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn allocate(&self, total: u64) -> std::io::Result<()> {
        self.file.lock().set_len(total)
    }
}

/// In-memory sink, mainly for tests.
#[derive(Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

impl DownloadSink for MemorySink {
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        let mut data = self.buf.lock();
        let end = offset as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn allocate(&self, total: u64) -> std::io::Result<()> {
        let mut data = self.buf.lock();
        if data.len() < total as usize {
            data.resize(total as usize, 0);
        }
        Ok(())
    }
}
