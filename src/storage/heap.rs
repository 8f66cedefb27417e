//! Data-page trailer carrying the back-reference into the slot directory.
//!
//! Tuple bytes on a data page are opaque here; only the last 16 bytes matter:
//! `dir_page u64 | offset u16 | flags u16 | reserved u32`.

use std::ops::Range;

use crate::primitives::bytes::ord;
use crate::types::{
    decode_page_ptr, encode_page_ptr,
    page::{self, PageHeader, PageKind},
    OffsetNumber, PageId, Result, SlotdirError,
};

/// Size of the data-page trailer.
pub const TRAILER_LEN: usize = PageKind::Data.trailer_len();

/// Location of a directory entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SlotLocation {
    /// Directory page holding the entry.
    pub page: PageId,
    /// Offset of the entry on that page.
    pub offset: OffsetNumber,
}

impl SlotLocation {
    /// Builds a location.
    pub fn new(page: PageId, offset: OffsetNumber) -> Self {
        Self { page, offset }
    }
}

fn trailer_range(page: &[u8]) -> Result<Range<usize>> {
    page::expect_kind(page, PageKind::Data)?;
    let start = page
        .len()
        .checked_sub(TRAILER_LEN)
        .ok_or(SlotdirError::Corruption("data page truncated"))?;
    Ok(start..page.len())
}

/// Formats `page` as an empty data page without a back-reference.
pub fn init_data_page(page: &mut [u8], page_no: PageId) -> Result<()> {
    page.fill(0);
    PageHeader::new(page_no, PageKind::Data, page.len() as u32)?.encode(page)?;
    clear_back_reference(page)
}

/// Reads the back-reference; `None` when absent.
pub fn back_reference(page: &[u8]) -> Result<Option<SlotLocation>> {
    let trailer = &page[trailer_range(page)?];
    let Some(dir_page) = decode_page_ptr(ord::get_u64_be(&trailer[0..8])) else {
        return Ok(None);
    };
    Ok(Some(SlotLocation {
        page: dir_page,
        offset: OffsetNumber(ord::get_u16_be(&trailer[8..10])),
    }))
}

/// Points the data page at a directory entry.
pub fn set_back_reference(page: &mut [u8], location: SlotLocation) -> Result<()> {
    let range = trailer_range(page)?;
    write_trailer(&mut page[range], Some(location));
    Ok(())
}

/// Marks the back-reference absent.
pub fn clear_back_reference(page: &mut [u8]) -> Result<()> {
    let range = trailer_range(page)?;
    write_trailer(&mut page[range], None);
    Ok(())
}

fn write_trailer(trailer: &mut [u8], location: Option<SlotLocation>) {
    trailer.fill(0);
    ord::put_u64_be(&mut trailer[0..8], encode_page_ptr(location.map(|l| l.page)));
    if let Some(location) = location {
        ord::put_u16_be(&mut trailer[8..10], location.offset.0);
    }
}
