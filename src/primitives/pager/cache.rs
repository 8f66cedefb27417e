use parking_lot::{lock_api::ArcRwLockReadGuard, Mutex, RawRwLock};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::frame::{Frame, FrameWriteGuard};
use crate::primitives::io::FileIo;
use crate::types::{
    page::{self, PageHeader, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE},
    page_crc32, Lsn, PageId, Result, SlotdirError,
};

/// Configuration for a [`BufferCache`].
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Verify the page checksum whenever a page is read from the file.
    pub verify_checksums: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            verify_checksums: true,
        }
    }
}

/// Lock strength requested when acquiring a page for modification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Ordinary exclusive lock.
    Exclusive,
    /// Exclusive lock held by the only pinner of the page. Required before
    /// moving entry bytes around, since pinned readers may hold positions into them.
    Cleanup,
}

/// Counters describing cache activity.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Lookups served from an existing frame.
    pub hits: u64,
    /// Lookups that had to consult the file.
    pub misses: u64,
    /// Pages written back by flushes.
    pub pages_flushed: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    pages_flushed: AtomicU64,
}

/// Shared page cache over a [`FileIo`].
///
/// Frames are never evicted; the cache lives for one replay pass or one
/// tooling session. All mutation goes through acquire, lock, mutate,
/// mark dirty, release, which keeps concurrent readers safe.
pub struct BufferCache {
    io: Arc<dyn FileIo>,
    options: CacheOptions,
    frames: Mutex<HashMap<PageId, Arc<Frame>>>,
    counters: CacheCounters,
}

impl BufferCache {
    /// Creates a cache over `io`.
    pub fn new(io: Arc<dyn FileIo>, options: CacheOptions) -> Result<Self> {
        if options.page_size < MIN_PAGE_SIZE || options.page_size > u16::MAX as u32 + 1 {
            return Err(SlotdirError::Invalid("page size out of range"));
        }
        Ok(Self {
            io,
            options,
            frames: Mutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.options.page_size
    }

    /// Number of pages addressable in the file or the cache, whichever is larger.
    pub fn page_count(&self) -> Result<u64> {
        let on_disk = self.io.len()? / self.options.page_size as u64;
        let cached = self
            .frames
            .lock()
            .keys()
            .map(|id| id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        Ok(on_disk.max(cached))
    }

    /// Share-locks a page for reading. Returns `None` when the page does not exist.
    pub fn read(&self, id: PageId) -> Result<Option<PageRef>> {
        let Some(frame) = self.pinned_frame(id, Acquire::Existing)? else {
            return Ok(None);
        };
        let guard = frame.buf.read_arc();
        Ok(Some(PageRef {
            id,
            frame,
            guard: Some(guard),
        }))
    }

    /// Locks an existing page for modification. Returns `None` when the page does not exist.
    pub fn lock(&self, id: PageId, mode: LockMode) -> Result<Option<PageGuard>> {
        let Some(frame) = self.pinned_frame(id, Acquire::Existing)? else {
            return Ok(None);
        };
        Ok(Some(lock_frame(frame, mode)))
    }

    /// Locks a page whose contents are about to be overwritten.
    ///
    /// The stored copy is not trusted: one that fails verification (a torn
    /// write) is discarded and the page starts zero-filled, as if it never
    /// existed. A page already cached is used as is.
    pub fn lock_for_overwrite(&self, id: PageId, mode: LockMode) -> Result<PageGuard> {
        let frame = self
            .pinned_frame(id, Acquire::Overwrite)?
            .ok_or(SlotdirError::NotFound)?;
        Ok(lock_frame(frame, mode))
    }

    /// Exclusively locks a page and zero-fills it, creating it when it does not exist.
    pub fn lock_zeroed(&self, id: PageId) -> Result<PageGuard> {
        let mut page = self.lock_for_overwrite(id, LockMode::Exclusive)?;
        page.data_mut().fill(0);
        page.mark_dirty();
        Ok(page)
    }

    /// Writes every dirty page back and syncs the file. Returns the number of pages written.
    pub fn flush(&self) -> Result<usize> {
        let mut frames: Vec<Arc<Frame>> = self.frames.lock().values().cloned().collect();
        frames.sort_by_key(|frame| frame.id);
        let mut written = 0usize;
        for frame in frames {
            if self.write_back(&frame)? {
                written += 1;
            }
        }
        self.io.sync_all()?;
        debug!(pages = written, "pager.flush");
        Ok(written)
    }

    /// Writes a single page back if it is dirty. Returns whether anything was written.
    pub fn flush_page(&self, id: PageId) -> Result<bool> {
        let frame = self.frames.lock().get(&id).cloned();
        let Some(frame) = frame else {
            return Ok(false);
        };
        let written = self.write_back(&frame)?;
        if written {
            self.io.sync_all()?;
        }
        Ok(written)
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            pages_flushed: self.counters.pages_flushed.load(Ordering::Relaxed),
        }
    }

    fn write_back(&self, frame: &Frame) -> Result<bool> {
        let image = {
            let buf = frame.buf.read();
            if !frame.take_dirty() {
                return Ok(false);
            }
            let mut image = buf.to_vec();
            seal_checksum(frame.id, &mut image)?;
            image
        };
        let offset = self.page_offset(frame.id)?;
        if let Err(err) = self.io.write_at(offset, &image) {
            frame.mark_dirty();
            return Err(err);
        }
        self.counters.pages_flushed.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn pinned_frame(&self, id: PageId, acquire: Acquire) -> Result<Option<Arc<Frame>>> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            frame.pin();
            return Ok(Some(frame.clone()));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = match acquire {
            Acquire::Overwrite => self.load_for_overwrite(id)?,
            Acquire::Existing => self.load(id)?,
        };
        let bytes = match loaded {
            Some(bytes) => bytes,
            None if acquire == Acquire::Overwrite => {
                vec![0u8; self.options.page_size as usize].into_boxed_slice()
            }
            None => return Ok(None),
        };
        let frame = Arc::new(Frame::new(id, bytes));
        frame.pin();
        frames.insert(id, frame.clone());
        Ok(Some(frame))
    }

    fn load(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        let Some(buf) = self.read_raw(id)? else {
            return Ok(None);
        };
        if self.options.verify_checksums {
            verify_checksum(id, &buf)?;
        }
        Ok(Some(buf))
    }

    fn load_for_overwrite(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        let Some(buf) = self.read_raw(id)? else {
            return Ok(None);
        };
        if self.options.verify_checksums {
            if let Err(err) = verify_checksum(id, &buf) {
                warn!(page = id.0, error = %err, "pager.load.discarded");
                return Ok(None);
            }
        }
        Ok(Some(buf))
    }

    fn read_raw(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        let offset = self.page_offset(id)?;
        let mut buf = vec![0u8; self.options.page_size as usize].into_boxed_slice();
        match self.io.read_at(offset, &mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(SlotdirError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn page_offset(&self, id: PageId) -> Result<u64> {
        id.0.checked_mul(self.options.page_size as u64)
            .ok_or(SlotdirError::Invalid("page offset overflow"))
    }
}

/// How a cache miss treats the stored copy of a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Acquire {
    /// Verified load; a page absent from the file is not created.
    Existing,
    /// Unverified load; an absent or unverifiable page starts zero-filled.
    Overwrite,
}

fn lock_frame(frame: Arc<Frame>, mode: LockMode) -> PageGuard {
    let guard = match mode {
        LockMode::Exclusive => frame.buf.write_arc(),
        LockMode::Cleanup => frame.lock_cleanup(),
    };
    PageGuard {
        id: frame.id,
        frame,
        guard: Some(guard),
    }
}

fn seal_checksum(id: PageId, image: &mut [u8]) -> Result<()> {
    if page::is_new(image) {
        return Ok(());
    }
    page::clear_crc32(image)?;
    let crc = page_crc32(id.0, image);
    image[page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn verify_checksum(id: PageId, buf: &[u8]) -> Result<()> {
    if page::is_new(buf) {
        return Ok(());
    }
    let header = PageHeader::decode(buf)?;
    if header.page_no != id {
        warn!(expected = id.0, found = header.page_no.0, "pager.load.page_no_mismatch");
        return Err(SlotdirError::Corruption("page number mismatch"));
    }
    let mut scratch = buf.to_vec();
    page::clear_crc32(&mut scratch)?;
    if page_crc32(id.0, &scratch) != header.crc32 {
        warn!(page = id.0, "pager.load.checksum_mismatch");
        return Err(SlotdirError::Corruption("page checksum mismatch"));
    }
    Ok(())
}

/// A share-locked, pinned page.
pub struct PageRef {
    /// Page identifier.
    pub id: PageId,
    frame: Arc<Frame>,
    guard: Option<ArcRwLockReadGuard<RawRwLock, Box<[u8]>>>,
}

impl PageRef {
    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        self.guard
            .as_ref()
            .map(|guard| &guard[..])
            .expect("page guard missing")
    }

    /// Returns the LSN stamped on the page.
    pub fn lsn(&self) -> Lsn {
        page::page_lsn(self.data())
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
        }
        self.frame.unpin();
    }
}

/// An exclusively locked, pinned page. Dropping it releases the lock and the pin.
pub struct PageGuard {
    /// Page identifier.
    pub id: PageId,
    frame: Arc<Frame>,
    guard: Option<FrameWriteGuard>,
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PageGuard {
    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        self.guard
            .as_ref()
            .map(|guard| &guard[..])
            .expect("page guard missing")
    }

    /// Returns the page bytes for modification. Callers must [`mark_dirty`](Self::mark_dirty).
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.guard
            .as_mut()
            .map(|guard| &mut guard[..])
            .expect("page guard missing")
    }

    /// Returns the LSN stamped on the page.
    pub fn lsn(&self) -> Lsn {
        page::page_lsn(self.data())
    }

    /// Flags the page for write-back.
    pub fn mark_dirty(&self) {
        self.frame.mark_dirty();
    }

    /// Marks the page dirty and stamps it with `lsn`.
    pub fn stamp(&mut self, lsn: Lsn) {
        page::set_page_lsn(self.data_mut(), lsn);
        self.mark_dirty();
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
        }
        self.frame.unpin();
    }
}
