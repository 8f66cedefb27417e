//! Payload codecs and forward-path record builders.

use smallvec::SmallVec;

use super::record::{info, BlockRef, OpCode, RedoRecord};
use crate::primitives::bytes::{buf::Cursor, ord};
use crate::storage::MetaState;
use crate::types::{
    decode_page_ptr, encode_page_ptr, FatalError, Lsn, OffsetNumber, PageId, Result,
    SlotdirError,
};

/// Block roles of an allocate-entry record.
pub mod block {
    /// Directory page receiving the entry.
    pub const DIRECTORY: u8 = 0;
    /// Data page owning the entry.
    pub const DATA: u8 = 1;
    /// Metadata page.
    pub const META: u8 = 2;
    /// Previous tail of the directory chain.
    pub const PREV_TAIL: u8 = 3;
}

/// Main data of an allocate-entry record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocatePayload {
    /// Offset the entry was placed at.
    pub offset: OffsetNumber,
    /// New `prev` link of the directory page.
    pub prev_link: Option<PageId>,
    /// New `next` link of the previous chain tail.
    pub next_link: Option<PageId>,
}

impl AllocatePayload {
    /// Encoded size in bytes.
    pub const LEN: usize = 18;

    /// Encodes the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::LEN];
        ord::put_u16_be(&mut out[0..2], self.offset.0);
        ord::put_u64_be(&mut out[2..10], encode_page_ptr(self.prev_link));
        ord::put_u64_be(&mut out[10..18], encode_page_ptr(self.next_link));
        out
    }

    /// Decodes the payload, rejecting truncated or trailing bytes.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(src);
        let offset = OffsetNumber(cur.u16()?);
        let prev_link = decode_page_ptr(cur.u64()?);
        let next_link = decode_page_ptr(cur.u64()?);
        cur.finish()?;
        if !offset.is_valid() {
            return Err(FatalError::MalformedRecord("allocate-entry offset is zero").into());
        }
        Ok(Self {
            offset,
            prev_link,
            next_link,
        })
    }
}

/// Encodes the metadata anchors carried by block 2.
pub fn encode_meta_anchors(state: MetaState) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    ord::put_u64_be(&mut out[0..8], encode_page_ptr(state.first_used));
    ord::put_u64_be(&mut out[8..16], encode_page_ptr(state.last_used));
    out
}

/// Decodes the metadata anchors carried by block 2.
pub fn decode_meta_anchors(src: &[u8]) -> Result<MetaState> {
    let mut cur = Cursor::new(src);
    let first_used = decode_page_ptr(cur.u64()?);
    let last_used = decode_page_ptr(cur.u64()?);
    cur.finish()?;
    Ok(MetaState {
        first_used,
        last_used,
    })
}

/// Encodes a clean payload: `count u16` followed by the offsets.
pub fn encode_offsets(offsets: &[OffsetNumber]) -> Result<Vec<u8>> {
    let count = u16::try_from(offsets.len())
        .map_err(|_| SlotdirError::Invalid("too many offsets in one clean record"))?;
    let mut out = vec![0u8; 2 + offsets.len() * 2];
    ord::put_u16_be(&mut out[0..2], count);
    for (slot, offset) in out[2..].chunks_exact_mut(2).zip(offsets) {
        ord::put_u16_be(slot, offset.0);
    }
    Ok(out)
}

/// Decodes a clean payload.
pub fn decode_offsets(src: &[u8]) -> Result<SmallVec<[OffsetNumber; 16]>> {
    let mut cur = Cursor::new(src);
    let count = cur.u16()? as usize;
    let mut offsets = SmallVec::with_capacity(count);
    for _ in 0..count {
        offsets.push(OffsetNumber(cur.u16()?));
    }
    cur.finish()?;
    Ok(offsets)
}

/// Builder for allocate-entry records.
#[derive(Clone, Debug)]
pub struct AllocateEntry {
    dir_page: PageId,
    data_page: PageId,
    offset: OffsetNumber,
    entry: Vec<u8>,
    prev_link: Option<PageId>,
    next_link: Option<PageId>,
    init_page: bool,
    meta: Option<(PageId, MetaState)>,
    prev_tail: Option<PageId>,
}

impl AllocateEntry {
    /// An entry placed at `offset` on `dir_page`, owned by `data_page`.
    pub fn new(dir_page: PageId, data_page: PageId, offset: OffsetNumber, entry: &[u8]) -> Self {
        Self {
            dir_page,
            data_page,
            offset,
            entry: entry.to_vec(),
            prev_link: None,
            next_link: None,
            init_page: false,
            meta: None,
            prev_tail: None,
        }
    }

    /// Sets the directory page's `prev` link.
    pub fn prev_link(mut self, prev: Option<PageId>) -> Self {
        self.prev_link = prev;
        self
    }

    /// Sets the `next` link written to the previous tail.
    pub fn next_link(mut self, next: Option<PageId>) -> Self {
        self.next_link = next;
        self
    }

    /// Marks the directory page as freshly allocated.
    pub fn init_page(mut self) -> Self {
        self.init_page = true;
        self
    }

    /// Rewrites the metadata page with `state`.
    pub fn with_meta(mut self, meta_page: PageId, state: MetaState) -> Self {
        self.meta = Some((meta_page, state));
        self
    }

    /// Links the previous chain tail forward. Requires [`with_meta`](Self::with_meta).
    pub fn with_prev_tail(mut self, page: PageId) -> Self {
        self.prev_tail = Some(page);
        self
    }

    /// Builds the record ending at `end_lsn`.
    pub fn build(self, end_lsn: Lsn) -> Result<RedoRecord> {
        if self.prev_tail.is_some() && self.meta.is_none() {
            return Err(SlotdirError::Invalid(
                "previous tail requires a metadata block",
            ));
        }
        let mut info_byte = OpCode::AllocateEntry.bits();
        if self.init_page {
            info_byte |= info::INIT_PAGE;
        }
        let mut record = RedoRecord::new(info_byte, end_lsn);
        record.main_data = AllocatePayload {
            offset: self.offset,
            prev_link: self.prev_link,
            next_link: self.next_link,
        }
        .encode();
        record
            .blocks
            .push(BlockRef::new(block::DIRECTORY, self.dir_page).with_data(self.entry));
        record.blocks.push(BlockRef::new(block::DATA, self.data_page));
        if let Some((meta_page, state)) = self.meta {
            record
                .blocks
                .push(BlockRef::new(block::META, meta_page).with_data(encode_meta_anchors(state)));
        }
        if let Some(prev_tail) = self.prev_tail {
            record.blocks.push(BlockRef::new(block::PREV_TAIL, prev_tail));
        }
        Ok(record)
    }
}

/// Builder for clean records.
#[derive(Clone, Debug)]
pub struct Clean {
    dir_page: PageId,
    unused: Vec<OffsetNumber>,
}

impl Clean {
    /// Prunes `unused` from `dir_page`.
    pub fn new(dir_page: PageId, unused: &[OffsetNumber]) -> Self {
        Self {
            dir_page,
            unused: unused.to_vec(),
        }
    }

    /// Builds the record ending at `end_lsn`.
    pub fn build(self, end_lsn: Lsn) -> Result<RedoRecord> {
        let mut record = RedoRecord::new(OpCode::Clean.bits(), end_lsn);
        record
            .blocks
            .push(BlockRef::new(0, self.dir_page).with_data(encode_offsets(&self.unused)?));
        Ok(record)
    }
}

/// Builder for clear-back-reference records.
#[derive(Clone, Copy, Debug)]
pub struct ClearLocation {
    data_page: PageId,
}

impl ClearLocation {
    /// Clears the back-reference of `data_page`.
    pub fn new(data_page: PageId) -> Self {
        Self { data_page }
    }

    /// Builds the record ending at `end_lsn`.
    pub fn build(self, end_lsn: Lsn) -> RedoRecord {
        let mut record = RedoRecord::new(OpCode::ClearLocation.bits(), end_lsn);
        record.blocks.push(BlockRef::new(0, self.data_page));
        record
    }
}
