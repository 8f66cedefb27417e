//! One handler per slot directory operation.

use smallvec::SmallVec;
use tracing::debug;

use super::decision::{init_for_redo, read_for_redo, RedoAction};
use super::{BlockOutcome, RedoOptions, RedoSummary};
use crate::primitives::pager::{BufferCache, LockMode, PageGuard};
use crate::storage::{dir_page, heap, meta, SlotLocation};
use crate::types::{FatalError, Lsn, PageId, Result};
use crate::wal::{
    block,
    payload::{decode_meta_anchors, decode_offsets},
    AllocatePayload, OpCode, RedoRecord,
};

/// Replays an allocate-entry record.
///
/// Blocks are acquired in role order and all stay locked until the record is
/// fully applied.
pub(crate) fn allocate_entry(
    cache: &BufferCache,
    options: &RedoOptions,
    record: &RedoRecord,
) -> Result<RedoSummary> {
    record.validate_blocks()?;
    let payload = AllocatePayload::decode(&record.main_data)?;
    let dir_block = record.require_block(block::DIRECTORY)?;
    let data_block = record.require_block(block::DATA)?;
    let meta_block = record.block(block::META);
    if record.block(block::PREV_TAIL).is_some() && meta_block.is_none() {
        return Err(FatalError::MalformedRecord("previous tail block without metadata block").into());
    }
    if dir_block.data.is_empty() {
        return Err(FatalError::MalformedRecord("allocate-entry carries no entry bytes").into());
    }
    let meta_state = match meta_block {
        Some(meta_block) if meta_block.page != options.meta_page => {
            return Err(FatalError::MetaPageMismatch {
                expected: options.meta_page,
                actual: meta_block.page,
            }
            .into());
        }
        Some(meta_block) => Some((meta_block.page, decode_meta_anchors(&meta_block.data)?)),
        None => None,
    };
    let mut summary = RedoSummary::new(OpCode::AllocateEntry, record.end_lsn);
    let mut held: SmallVec<[PageGuard; 4]> = SmallVec::new();

    let (action, dir) = if record.init_page() {
        let mut page = init_for_redo(cache, record, block::DIRECTORY)?;
        dir_page::init(page.data_mut(), dir_block.page)?;
        (RedoAction::ApplyDelta, Some(page))
    } else {
        read_for_redo(cache, record, block::DIRECTORY, LockMode::Exclusive)?
    };
    if let Some(mut page) = dir {
        if action == RedoAction::ApplyDelta {
            let placed = dir_page::add_entry(page.data_mut(), &dir_block.data, Some(payload.offset))?;
            if placed != Some(payload.offset) {
                return Err(FatalError::EntryPlacement {
                    page: dir_block.page,
                    requested: payload.offset,
                    placed,
                }
                .into());
            }
        }
        if action.touches_page() {
            dir_page::set_prev(page.data_mut(), payload.prev_link)?;
            page.stamp(record.end_lsn);
        }
        held.push(page);
    }
    summary.push(block::DIRECTORY, dir_block.page, action);

    let (action, data) = read_for_redo(cache, record, block::DATA, LockMode::Exclusive)?;
    if let Some(mut page) = data {
        if action.touches_page() {
            let location = SlotLocation::new(dir_block.page, payload.offset);
            heap::set_back_reference(page.data_mut(), location)?;
            page.stamp(record.end_lsn);
        }
        held.push(page);
    }
    summary.push(block::DATA, data_block.page, action);

    if let Some((meta_page, state)) = meta_state {
        let mut page = init_for_redo(cache, record, block::META)?;
        meta::init(page.data_mut(), meta_page, state)?;
        page.stamp(record.end_lsn);
        held.push(page);
        summary.push(block::META, meta_page, RedoAction::ApplyDelta);

        if let Some(tail_block) = record.block(block::PREV_TAIL) {
            let (action, tail) = read_for_redo(cache, record, block::PREV_TAIL, LockMode::Exclusive)?;
            if let Some(mut page) = tail {
                if action.touches_page() {
                    dir_page::set_next(page.data_mut(), payload.next_link)?;
                    page.stamp(record.end_lsn);
                }
                held.push(page);
            }
            summary.push(block::PREV_TAIL, tail_block.page, action);
        }
    }

    debug!(
        lsn = record.end_lsn.0,
        offset = payload.offset.0,
        pages = held.len(),
        "redo.allocate_entry.done"
    );
    drop(held);
    Ok(summary)
}

/// Replays a clean record under the cleanup lock.
///
/// Prunability hints are deliberately not recomputed here.
pub(crate) fn clean(cache: &BufferCache, record: &RedoRecord) -> Result<RedoSummary> {
    record.validate_blocks()?;
    let dir_block = record.require_block(0)?;
    let unused = decode_offsets(&dir_block.data)?;
    let mut summary = RedoSummary::new(OpCode::Clean, record.end_lsn);

    let (action, page) = read_for_redo(cache, record, 0, LockMode::Cleanup)?;
    if let Some(mut page) = page {
        if action == RedoAction::ApplyDelta {
            dir_page::prune(page.data_mut(), &unused)?;
        }
        if action.touches_page() {
            page.stamp(record.end_lsn);
        }
    }
    summary.push(0, dir_block.page, action);
    debug!(lsn = record.end_lsn.0, pruned = unused.len(), "redo.clean.done");
    Ok(summary)
}

/// Replays a clear-back-reference record.
pub(crate) fn clear_location(cache: &BufferCache, record: &RedoRecord) -> Result<RedoSummary> {
    record.validate_blocks()?;
    let data_block = record.require_block(0)?;
    let mut summary = RedoSummary::new(OpCode::ClearLocation, record.end_lsn);

    let (action, page) = read_for_redo(cache, record, 0, LockMode::Exclusive)?;
    if let Some(mut page) = page {
        if action.touches_page() {
            heap::clear_back_reference(page.data_mut())?;
            page.stamp(record.end_lsn);
        }
    }
    summary.push(0, data_block.page, action);
    Ok(summary)
}

impl RedoSummary {
    fn new(op: OpCode, end_lsn: Lsn) -> Self {
        Self {
            op,
            end_lsn,
            blocks: SmallVec::new(),
        }
    }

    fn push(&mut self, block: u8, page: PageId, action: RedoAction) {
        self.blocks.push(BlockOutcome {
            block,
            page,
            action,
        });
    }
}
