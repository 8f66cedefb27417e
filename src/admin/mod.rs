//! Offline inspection of a slot directory file.

use std::path::Path;
use std::sync::Arc;

use crate::primitives::{io::StdFileIo, pager::BufferCache};
use crate::redo::RedoOptions;
use crate::types::Result;

/// Chain and back-reference verification.
pub mod verify;

pub use verify::{
    verify_back_reference, verify_chain, BackReferenceReport, ChainPage, ChainReport,
    VerifyFinding, VerifySeverity,
};

/// Opens a buffer cache over the file at `path`.
pub fn open_cache(path: impl AsRef<Path>, options: &RedoOptions) -> Result<Arc<BufferCache>> {
    let io = StdFileIo::open(path)?;
    Ok(Arc::new(BufferCache::new(
        Arc::new(io),
        options.cache_options(),
    )?))
}
