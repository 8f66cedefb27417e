//! The metadata page anchoring the directory chain.

use std::ops::Range;

use crate::primitives::bytes::ord;
use crate::types::{
    decode_page_ptr, encode_page_ptr,
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    PageId, Result, SlotdirError,
};

const FIRST_USED: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const LAST_USED: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 16;

/// Head and tail of the directory chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MetaState {
    /// First directory page in the chain.
    pub first_used: Option<PageId>,
    /// Last directory page in the chain.
    pub last_used: Option<PageId>,
}

impl MetaState {
    /// Builds a state from both anchors.
    pub fn new(first_used: Option<PageId>, last_used: Option<PageId>) -> Self {
        Self {
            first_used,
            last_used,
        }
    }

    /// True when the chain holds no pages.
    pub fn is_empty(&self) -> bool {
        self.first_used.is_none() && self.last_used.is_none()
    }
}

/// Overwrites `page` with a fresh metadata page holding `state`.
pub fn init(page: &mut [u8], page_no: PageId, state: MetaState) -> Result<()> {
    if page.len() < LAST_USED.end {
        return Err(SlotdirError::Invalid("page too small for the metadata page"));
    }
    page.fill(0);
    PageHeader::new(page_no, PageKind::Meta, page.len() as u32)?.encode(page)?;
    write(page, state);
    Ok(())
}

/// Reads both anchors, verifying the page kind.
pub fn read(page: &[u8]) -> Result<MetaState> {
    page::expect_kind(page, PageKind::Meta)?;
    if page.len() < LAST_USED.end {
        return Err(SlotdirError::Corruption("metadata page truncated"));
    }
    Ok(MetaState {
        first_used: decode_page_ptr(ord::get_u64_be(&page[FIRST_USED])),
        last_used: decode_page_ptr(ord::get_u64_be(&page[LAST_USED])),
    })
}

/// Overwrites both anchors on an existing metadata page.
pub fn set(page: &mut [u8], state: MetaState) -> Result<()> {
    page::expect_kind(page, PageKind::Meta)?;
    if page.len() < LAST_USED.end {
        return Err(SlotdirError::Corruption("metadata page truncated"));
    }
    write(page, state);
    Ok(())
}

fn write(page: &mut [u8], state: MetaState) {
    ord::put_u64_be(&mut page[FIRST_USED], encode_page_ptr(state.first_used));
    ord::put_u64_be(&mut page[LAST_USED], encode_page_ptr(state.last_used));
}
