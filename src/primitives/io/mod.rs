#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{Result, SlotdirError};

/// Positioned I/O over the database file. The buffer cache is the only caller.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`; a short file is `UnexpectedEof`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file when needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// File-backed implementation sharing one handle between clones.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(SlotdirError::from)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn pread(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.inner.read_at(dst, off)
    }

    #[cfg(unix)]
    fn pwrite(&self, src: &[u8], off: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.inner.write_at(src, off)
    }

    #[cfg(windows)]
    fn pread(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.inner.seek_read(dst, off)
    }

    #[cfg(windows)]
    fn pwrite(&self, src: &[u8], off: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.inner.seek_write(src, off)
    }

    #[cfg(not(any(unix, windows)))]
    fn pread(&self, _dst: &mut [u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn pwrite(&self, _src: &[u8], _off: u64) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    fn read_exact(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = self.pread(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            dst = &mut std::mem::take(&mut dst)[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_all(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = self.pwrite(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        trace!(off, len = dst.len(), "io.read_at");
        self.read_exact(off, dst).map_err(SlotdirError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        self.write_all(off, src).map_err(SlotdirError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(SlotdirError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata().map_err(SlotdirError::from)?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(SlotdirError::from)
    }
}

/// In-memory file used by tests and tooling that never touches disk.
#[derive(Clone, Default)]
pub struct MemFileIo {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemFileIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let start = off as usize;
        let end = start
            .checked_add(dst.len())
            .ok_or(SlotdirError::Invalid("read offset overflow"))?;
        if end > bytes.len() {
            return Err(SlotdirError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read_at reached EOF",
            )));
        }
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = off as usize;
        let end = start
            .checked_add(src.len())
            .ok_or(SlotdirError::Invalid("write offset overflow"))?;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.bytes.lock().resize(len as usize, 0);
        Ok(())
    }
}
