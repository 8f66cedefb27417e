//! Overflow slot directory pages.
//!
//! Layout after the common 32-byte page header:
//!
//! ```text
//! [32..40)         lower u16 | upper u16 | flags u16 | reserved u16
//! [40..lower)      line pointers, 4 bytes each: pos u16 (0 = unused), len u16
//! [lower..upper)   free space
//! [upper..special) entry bytes, packed against the trailer
//! [special..end)   trailer: prev_page u64 | next_page u64
//! ```
//!
//! Entries are addressed by 1-based offset number (the line pointer index),
//! never by byte position, so compaction leaves every surviving offset intact.

use std::ops::Range;

use tracing::warn;

use crate::primitives::bytes::ord;
use crate::types::{
    decode_page_ptr, encode_page_ptr,
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    FatalError, OffsetNumber, PageId, Result, SlotdirError,
};

const LOWER: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 2;
const UPPER: Range<usize> = PAGE_HDR_LEN + 2..PAGE_HDR_LEN + 4;
const FLAGS: Range<usize> = PAGE_HDR_LEN + 4..PAGE_HDR_LEN + 6;
const RESERVED: Range<usize> = PAGE_HDR_LEN + 6..PAGE_HDR_LEN + 8;

/// Byte offset of the first line pointer.
pub const LINE_POINTERS_START: usize = PAGE_HDR_LEN + 8;
/// Size of one line pointer.
pub const LINE_POINTER_LEN: usize = 4;
/// Size of the trailer at the tail of the page.
pub const TRAILER_LEN: usize = PageKind::Directory.trailer_len();

/// Set when at least one line pointer below `lower` is unused.
const FLAG_HAS_FREE_LP: u16 = 0x0001;

/// Chain links stored in the trailer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Trailer {
    /// Previous page in the directory chain.
    pub prev: Option<PageId>,
    /// Next page in the directory chain.
    pub next: Option<PageId>,
}

/// Decoded directory header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// Page number from the common header.
    pub page_no: PageId,
    /// End of the line pointer array.
    pub lower: usize,
    /// Start of the entry bytes.
    pub upper: usize,
    /// Start of the trailer.
    pub special: usize,
    /// Page-level hint bits.
    pub flags: u16,
}

impl Header {
    /// Decodes and validates the header of a directory page.
    pub fn parse(page: &[u8]) -> Result<Self> {
        let common = page::expect_kind(page, PageKind::Directory)?;
        let special = special_offset(page)?;
        let lower = ord::get_u16_be(&page[LOWER]) as usize;
        let upper = ord::get_u16_be(&page[UPPER]) as usize;
        let flags = ord::get_u16_be(&page[FLAGS]);
        if lower < LINE_POINTERS_START || (lower - LINE_POINTERS_START) % LINE_POINTER_LEN != 0 {
            return Err(SlotdirError::Corruption("directory lower bound misaligned"));
        }
        if lower > upper || upper > special {
            return Err(SlotdirError::Corruption(
                "directory free space pointers out of range",
            ));
        }
        Ok(Self {
            page_no: common.page_no,
            lower,
            upper,
            special,
            flags,
        })
    }

    /// Highest offset number with a line pointer.
    pub fn max_offset(&self) -> u16 {
        ((self.lower - LINE_POINTERS_START) / LINE_POINTER_LEN) as u16
    }

    /// Contiguous free bytes between the line pointers and the entry bytes.
    pub fn contiguous_free(&self) -> usize {
        self.upper - self.lower
    }

    fn write(&self, page: &mut [u8]) {
        ord::put_u16_be(&mut page[LOWER], self.lower as u16);
        ord::put_u16_be(&mut page[UPPER], self.upper as u16);
        ord::put_u16_be(&mut page[FLAGS], self.flags);
        page[RESERVED].fill(0);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct LinePointer {
    pos: usize,
    len: usize,
}

impl LinePointer {
    const UNUSED: LinePointer = LinePointer { pos: 0, len: 0 };

    fn is_used(self) -> bool {
        self.pos != 0
    }
}

fn line_pointer_range(offset: u16) -> Range<usize> {
    let start = LINE_POINTERS_START + (offset as usize - 1) * LINE_POINTER_LEN;
    start..start + LINE_POINTER_LEN
}

fn read_line_pointer(page: &[u8], offset: u16) -> LinePointer {
    let raw = &page[line_pointer_range(offset)];
    LinePointer {
        pos: ord::get_u16_be(&raw[0..2]) as usize,
        len: ord::get_u16_be(&raw[2..4]) as usize,
    }
}

fn write_line_pointer(page: &mut [u8], offset: u16, lp: LinePointer) {
    let raw = &mut page[line_pointer_range(offset)];
    ord::put_u16_be(&mut raw[0..2], lp.pos as u16);
    ord::put_u16_be(&mut raw[2..4], lp.len as u16);
}

fn special_offset(page: &[u8]) -> Result<usize> {
    page.len()
        .checked_sub(TRAILER_LEN)
        .filter(|&special| special > LINE_POINTERS_START)
        .ok_or(SlotdirError::Invalid("page too small for a directory page"))
}

/// Formats `page` as an empty directory page with no chain neighbours.
pub fn init(page: &mut [u8], page_no: PageId) -> Result<()> {
    let special = special_offset(page)?;
    if page.len() > u16::MAX as usize + 1 {
        return Err(SlotdirError::Invalid("page too large for a directory page"));
    }
    page.fill(0);
    PageHeader::new(page_no, PageKind::Directory, page.len() as u32)?.encode(page)?;
    let header = Header {
        page_no,
        lower: LINE_POINTERS_START,
        upper: special,
        special,
        flags: 0,
    };
    header.write(page);
    write_trailer(page, special, Trailer::default());
    Ok(())
}

/// Reads the chain links.
pub fn trailer(page: &[u8]) -> Result<Trailer> {
    page::expect_kind(page, PageKind::Directory)?;
    let special = special_offset(page)?;
    Ok(Trailer {
        prev: decode_page_ptr(ord::get_u64_be(&page[special..special + 8])),
        next: decode_page_ptr(ord::get_u64_be(&page[special + 8..special + 16])),
    })
}

/// Overwrites both chain links.
pub fn set_trailer(page: &mut [u8], trailer: Trailer) -> Result<()> {
    page::expect_kind(page, PageKind::Directory)?;
    let special = special_offset(page)?;
    write_trailer(page, special, trailer);
    Ok(())
}

/// Overwrites the link to the previous page in the chain.
pub fn set_prev(page: &mut [u8], prev: Option<PageId>) -> Result<()> {
    let current = trailer(page)?;
    set_trailer(page, Trailer { prev, ..current })
}

/// Overwrites the link to the next page in the chain.
pub fn set_next(page: &mut [u8], next: Option<PageId>) -> Result<()> {
    let current = trailer(page)?;
    set_trailer(page, Trailer { next, ..current })
}

fn write_trailer(page: &mut [u8], special: usize, trailer: Trailer) {
    ord::put_u64_be(&mut page[special..special + 8], encode_page_ptr(trailer.prev));
    ord::put_u64_be(
        &mut page[special + 8..special + 16],
        encode_page_ptr(trailer.next),
    );
}

/// Returns the bytes stored at `offset`, or `None` if the slot is unused or out of range.
pub fn entry(page: &[u8], offset: OffsetNumber) -> Result<Option<&[u8]>> {
    let header = Header::parse(page)?;
    if !offset.is_valid() || offset.0 > header.max_offset() {
        return Ok(None);
    }
    let lp = read_line_pointer(page, offset.0);
    if !lp.is_used() {
        return Ok(None);
    }
    if lp.pos < header.upper || lp.pos + lp.len > header.special || lp.len == 0 {
        return Err(SlotdirError::Corruption("directory entry extent out of range"));
    }
    Ok(Some(&page[lp.pos..lp.pos + lp.len]))
}

/// Offsets currently holding an entry, ascending.
pub fn live_offsets(page: &[u8]) -> Result<Vec<OffsetNumber>> {
    let header = Header::parse(page)?;
    Ok((1..=header.max_offset())
        .filter(|&off| read_line_pointer(page, off).is_used())
        .map(OffsetNumber)
        .collect())
}

/// All live entries with their offsets, ascending by offset.
pub fn entries(page: &[u8]) -> Result<Vec<(OffsetNumber, &[u8])>> {
    let mut out = Vec::new();
    for offset in live_offsets(page)? {
        if let Some(bytes) = entry(page, offset)? {
            out.push((offset, bytes));
        }
    }
    Ok(out)
}

/// Number of live entries.
pub fn entry_count(page: &[u8]) -> Result<usize> {
    Ok(live_offsets(page)?.len())
}

/// Highest allocated offset; `0` for a structurally empty page.
pub fn max_offset(page: &[u8]) -> Result<u16> {
    Ok(Header::parse(page)?.max_offset())
}

/// Free bytes available once the page is compacted.
pub fn free_space(page: &[u8]) -> Result<usize> {
    let header = Header::parse(page)?;
    let used: usize = (1..=header.max_offset())
        .map(|off| read_line_pointer(page, off))
        .filter(|lp| lp.is_used())
        .map(|lp| lp.len)
        .sum();
    Ok(header.special - header.lower - used)
}

/// Places `bytes` as a new entry.
///
/// With `requested = Some(k)` the entry goes exactly to offset `k`, which must be
/// unused and at most one past the current maximum. With `None` the first unused
/// line pointer is reused, or a new one appended. Returns `None` when the entry
/// cannot be placed.
pub fn add_entry(
    page: &mut [u8],
    bytes: &[u8],
    requested: Option<OffsetNumber>,
) -> Result<Option<OffsetNumber>> {
    if bytes.is_empty() {
        return Err(SlotdirError::Invalid("directory entries cannot be empty"));
    }
    let mut header = Header::parse(page)?;
    let max = header.max_offset();
    let target = match requested {
        Some(offset) => {
            if !offset.is_valid() || offset.0 as usize > max as usize + 1 {
                warn!(
                    page = header.page_no.0,
                    offset = offset.0,
                    max,
                    "dir_page.add_entry.offset_too_large"
                );
                return Ok(None);
            }
            if offset.0 <= max && read_line_pointer(page, offset.0).is_used() {
                warn!(
                    page = header.page_no.0,
                    offset = offset.0,
                    "dir_page.add_entry.offset_in_use"
                );
                return Ok(None);
            }
            offset.0
        }
        None => match first_unused(page, &header) {
            Some(offset) => offset,
            None => match max.checked_add(1) {
                Some(offset) => offset,
                None => return Ok(None),
            },
        },
    };
    let appends_line_pointer = target > max;
    let needed = bytes.len() + if appends_line_pointer { LINE_POINTER_LEN } else { 0 };
    if header.contiguous_free() < needed {
        if free_space(page)? < needed {
            return Ok(None);
        }
        repair_fragmentation(page, false)?;
        header = Header::parse(page)?;
    }
    let pos = header.upper - bytes.len();
    page[pos..header.upper].copy_from_slice(bytes);
    header.upper = pos;
    if appends_line_pointer {
        header.lower += LINE_POINTER_LEN;
    }
    header.write(page);
    write_line_pointer(
        page,
        target,
        LinePointer {
            pos,
            len: bytes.len(),
        },
    );
    refresh_free_hint(page)?;
    Ok(Some(OffsetNumber(target)))
}

/// Marks every listed offset unused and repacks the surviving entries.
///
/// Surviving entries keep their offsets and their relative physical order;
/// trailing unused line pointers are dropped. Listing an offset twice, or an
/// offset without a live entry, is fatal and leaves the page untouched.
pub fn prune(page: &mut [u8], unused: &[OffsetNumber]) -> Result<()> {
    let header = Header::parse(page)?;
    let max = header.max_offset();
    let mut seen = vec![false; max as usize + 1];
    for &offset in unused {
        let live = offset.is_valid()
            && offset.0 <= max
            && !seen[offset.0 as usize]
            && read_line_pointer(page, offset.0).is_used();
        if !live {
            return Err(FatalError::PruneMissingOffset {
                page: header.page_no,
                offset,
            }
            .into());
        }
        seen[offset.0 as usize] = true;
    }
    for &offset in unused {
        write_line_pointer(page, offset.0, LinePointer::UNUSED);
    }
    repair_fragmentation(page, true)
}

/// Packs live entry bytes against the trailer and zeroes the freed space.
fn repair_fragmentation(page: &mut [u8], truncate_line_pointers: bool) -> Result<()> {
    let mut header = Header::parse(page)?;
    let mut live: Vec<(u16, LinePointer)> = (1..=header.max_offset())
        .map(|off| (off, read_line_pointer(page, off)))
        .filter(|(_, lp)| lp.is_used())
        .collect();
    for (_, lp) in &live {
        if lp.pos < header.upper || lp.pos + lp.len > header.special {
            return Err(SlotdirError::Corruption("directory entry extent out of range"));
        }
    }
    live.sort_by(|a, b| b.1.pos.cmp(&a.1.pos));

    let base = header.upper;
    let scratch = page[base..header.special].to_vec();
    let mut upper = header.special;
    for (off, lp) in live {
        upper -= lp.len;
        let src = lp.pos - base;
        page[upper..upper + lp.len].copy_from_slice(&scratch[src..src + lp.len]);
        write_line_pointer(page, off, LinePointer { pos: upper, len: lp.len });
    }

    if truncate_line_pointers {
        let mut max = header.max_offset();
        while max > 0 && !read_line_pointer(page, max).is_used() {
            max -= 1;
        }
        header.lower = LINE_POINTERS_START + max as usize * LINE_POINTER_LEN;
    }
    header.upper = upper;
    page[header.lower..header.upper].fill(0);
    header.write(page);
    refresh_free_hint(page)
}

fn first_unused(page: &[u8], header: &Header) -> Option<u16> {
    if header.flags & FLAG_HAS_FREE_LP == 0 {
        return None;
    }
    (1..=header.max_offset()).find(|&off| !read_line_pointer(page, off).is_used())
}

fn refresh_free_hint(page: &mut [u8]) -> Result<()> {
    let mut header = Header::parse(page)?;
    let has_free = (1..=header.max_offset()).any(|off| !read_line_pointer(page, off).is_used());
    if has_free {
        header.flags |= FLAG_HAS_FREE_LP;
    } else {
        header.flags &= !FLAG_HAS_FREE_LP;
    }
    header.write(page);
    Ok(())
}
