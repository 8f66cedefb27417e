//! The per-block redo decision.

use tracing::{debug, warn};

use crate::primitives::pager::{BufferCache, LockMode, PageGuard};
use crate::types::{FatalError, Result};
use crate::wal::RedoRecord;

/// What replay did with one referenced page.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RedoAction {
    /// The page prefix was restored from the record's full-page image.
    Reconstruct,
    /// The logged change was re-applied to the page.
    ApplyDelta,
    /// The page already reflects the record, or no longer exists.
    Skip,
}

impl RedoAction {
    /// True when trailer fields must be (re)written.
    pub fn touches_page(self) -> bool {
        !matches!(self, RedoAction::Skip)
    }
}

/// Acquires the page named by block `block_id` and decides how to redo it.
///
/// A block carrying an image is always reconstructed; the prefix is restored,
/// stamped and dirtied here, the trailer is left for the handler. The stored
/// page is not verified first, so an image repairs a torn page: such a page is
/// treated as new and its trailer starts empty. Without an image the page LSN
/// decides. The returned guard, when present, keeps the page
/// locked until the caller drops it, even for [`RedoAction::Skip`].
pub(crate) fn read_for_redo(
    cache: &BufferCache,
    record: &RedoRecord,
    block_id: u8,
    mode: LockMode,
) -> Result<(RedoAction, Option<PageGuard>)> {
    let block = record.require_block(block_id)?;
    if let Some(image) = &block.image {
        if image.page_no()? != block.page {
            return Err(FatalError::MalformedRecord("page image names a different page").into());
        }
        let mut page = cache.lock_for_overwrite(block.page, mode)?;
        image.restore(page.data_mut())?;
        page.stamp(record.end_lsn);
        debug!(
            block = block_id,
            page = block.page.0,
            lsn = record.end_lsn.0,
            "redo.block.reconstruct"
        );
        return Ok((RedoAction::Reconstruct, Some(page)));
    }
    let Some(page) = cache.lock(block.page, mode)? else {
        warn!(
            block = block_id,
            page = block.page.0,
            lsn = record.end_lsn.0,
            "redo.block.missing"
        );
        return Ok((RedoAction::Skip, None));
    };
    let page_lsn = page.lsn();
    if page_lsn >= record.end_lsn {
        debug!(
            block = block_id,
            page = block.page.0,
            page_lsn = page_lsn.0,
            lsn = record.end_lsn.0,
            "redo.block.skip"
        );
        return Ok((RedoAction::Skip, Some(page)));
    }
    Ok((RedoAction::ApplyDelta, Some(page)))
}

/// Zero-fills the page named by block `block_id` for re-initialization.
pub(crate) fn init_for_redo(
    cache: &BufferCache,
    record: &RedoRecord,
    block_id: u8,
) -> Result<PageGuard> {
    let block = record.require_block(block_id)?;
    debug!(block = block_id, page = block.page.0, "redo.block.init");
    cache.lock_zeroed(block.page)
}
