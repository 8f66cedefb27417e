//! Redo of slot directory log records.
//!
//! [`RedoEngine::redo`] replays one decoded record against the buffer cache;
//! [`Replayer`] drives it over a whole log. Fatal errors are never swallowed:
//! the caller must stop recovery when one is returned.

mod decision;
mod handlers;
mod replay;

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, error};

use crate::primitives::io::FileIo;
use crate::primitives::pager::{BufferCache, CacheOptions};
use crate::types::{page::DEFAULT_PAGE_SIZE, Lsn, PageId, Result, SlotdirError};
use crate::wal::{OpCode, RedoRecord};

pub use decision::RedoAction;
pub use replay::{ReplayStats, Replayer};

/// Configuration for the redo engine.
#[derive(Clone, Debug)]
pub struct RedoOptions {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Reserved page number of the metadata page.
    pub meta_page: PageId,
    /// Verify page checksums when pages are loaded from the file.
    pub verify_checksums: bool,
}

impl Default for RedoOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            meta_page: PageId(0),
            verify_checksums: true,
        }
    }
}

impl RedoOptions {
    /// Sets the page size.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the reserved metadata page number.
    pub fn meta_page(mut self, meta_page: PageId) -> Self {
        self.meta_page = meta_page;
        self
    }

    /// Enables or disables checksum verification on load.
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Buffer cache options matching these redo options.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            page_size: self.page_size,
            verify_checksums: self.verify_checksums,
        }
    }
}

/// What happened to one block of a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockOutcome {
    /// Block role within the record.
    pub block: u8,
    /// Page the block referenced.
    pub page: PageId,
    /// Decision taken for the page.
    pub action: RedoAction,
}

/// Result of replaying one record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedoSummary {
    /// Operation replayed.
    pub op: OpCode,
    /// End position of the record.
    pub end_lsn: Lsn,
    /// Per-block outcomes, in acquisition order.
    pub blocks: SmallVec<[BlockOutcome; 4]>,
}

impl RedoSummary {
    /// Outcome for the given block role.
    pub fn action(&self, block: u8) -> Option<RedoAction> {
        self.blocks
            .iter()
            .find(|outcome| outcome.block == block)
            .map(|outcome| outcome.action)
    }
}

/// Applies slot directory records to pages held in a [`BufferCache`].
pub struct RedoEngine {
    cache: Arc<BufferCache>,
    options: RedoOptions,
}

impl RedoEngine {
    /// Creates an engine over an existing cache.
    pub fn new(cache: Arc<BufferCache>, options: RedoOptions) -> Result<Self> {
        if cache.page_size() != options.page_size {
            return Err(SlotdirError::Invalid(
                "cache page size differs from redo options",
            ));
        }
        Ok(Self { cache, options })
    }

    /// Creates an engine with its own cache over `io`.
    pub fn open(io: Arc<dyn FileIo>, options: RedoOptions) -> Result<Self> {
        let cache = Arc::new(BufferCache::new(io, options.cache_options())?);
        Self::new(cache, options)
    }

    /// The shared buffer cache.
    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    /// Engine configuration.
    pub fn options(&self) -> &RedoOptions {
        &self.options
    }

    /// Replays one record.
    pub fn redo(&self, record: &RedoRecord) -> Result<RedoSummary> {
        let op = match record.op() {
            Ok(op) => op,
            Err(err) => {
                error!(info = record.info, lsn = record.end_lsn.0, "redo.unknown_opcode");
                return Err(err.into());
            }
        };
        debug!(
            op = op.name(),
            lsn = record.end_lsn.0,
            blocks = record.blocks.len(),
            "redo.dispatch"
        );
        let result = match op {
            OpCode::AllocateEntry => handlers::allocate_entry(&self.cache, &self.options, record),
            OpCode::Clean => handlers::clean(&self.cache, record),
            OpCode::ClearLocation => handlers::clear_location(&self.cache, record),
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(op = op.name(), lsn = record.end_lsn.0, error = %err, "redo.fatal");
            }
        }
        result
    }

    /// Writes every dirty page back to the file.
    pub fn flush(&self) -> Result<usize> {
        self.cache.flush()
    }
}
