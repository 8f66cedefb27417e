#![forbid(unsafe_code)]
//! Identifiers, errors and the page header shared by every layer.

use std::fmt;

mod checksum;

pub use checksum::page_crc32;

/// Page number inside the database file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Log position. Pages are stamped with the end position of the last record applied to them.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

/// 1-based logical slot number of an entry on a directory page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct OffsetNumber(pub u16);

impl OffsetNumber {
    /// The reserved "no offset" value.
    pub const INVALID: OffsetNumber = OffsetNumber(0);
    /// First usable offset on a page.
    pub const FIRST: OffsetNumber = OffsetNumber(1);

    /// Returns true when the offset names a real slot.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Sentinel stored on disk for "no page".
pub const NO_PAGE: u64 = u64::MAX;

/// Encodes an optional page pointer using [`NO_PAGE`] for `None`.
pub fn encode_page_ptr(page: Option<PageId>) -> u64 {
    page.map(|p| p.0).unwrap_or(NO_PAGE)
}

/// Decodes an on-disk page pointer.
pub fn decode_page_ptr(raw: u64) -> Option<PageId> {
    if raw == NO_PAGE {
        None
    } else {
        Some(PageId(raw))
    }
}

/// Conditions under which replay must stop: the log and the page state disagree
/// about structure and nothing local can repair it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// The record carries an operation code this engine does not understand.
    #[error("unknown slot directory op code {0:#04x}")]
    UnknownOpcode(u8),
    /// An entry could not be placed at the offset the log recorded.
    #[error("failed to place entry on page {page:?}: requested {requested:?}, placed {placed:?}")]
    EntryPlacement {
        /// Directory page receiving the entry.
        page: PageId,
        /// Offset named by the record.
        requested: OffsetNumber,
        /// Offset actually produced, `None` when nothing was placed.
        placed: Option<OffsetNumber>,
    },
    /// The metadata block does not live at the reserved page number.
    #[error("metadata block references page {actual:?}, expected {expected:?}")]
    MetaPageMismatch {
        /// Configured metadata page.
        expected: PageId,
        /// Page named by the record or found in the header.
        actual: PageId,
    },
    /// A prune listed an offset that holds no live entry (or listed it twice).
    #[error("prune of page {page:?} references missing offset {offset:?}")]
    PruneMissingOffset {
        /// Directory page being pruned.
        page: PageId,
        /// Offending offset.
        offset: OffsetNumber,
    },
    /// The record itself is structurally invalid.
    #[error("malformed record: {0}")]
    MalformedRecord(&'static str),
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum SlotdirError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Requested item does not exist.
    #[error("not found")]
    NotFound,
    /// Unrecoverable replay failure.
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
}

impl SlotdirError {
    /// Returns true for the unrecoverable class of errors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SlotdirError::Fatal(_))
    }

    /// Returns the fatal cause, if any.
    pub fn as_fatal(&self) -> Option<&FatalError> {
        match self {
            SlotdirError::Fatal(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlotdirError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OffsetNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for OffsetNumber {
    fn from(value: u16) -> Self {
        OffsetNumber(value)
    }
}

impl From<OffsetNumber> for u16 {
    fn from(value: OffsetNumber) -> Self {
        value.0
    }
}

pub mod page {
    //! Common on-disk page header used by every page kind.

    use core::convert::TryFrom;

    use super::{Lsn, PageId, Result, SlotdirError};
    use crate::primitives::bytes::ord;

    /// Magic bytes opening every initialized page.
    pub const PAGE_MAGIC: [u8; 4] = *b"SLTD";
    /// On-disk format version.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Default page size in bytes.
    pub const DEFAULT_PAGE_SIZE: u32 = 8192;
    /// Smallest supported page size.
    pub const MIN_PAGE_SIZE: u32 = 256;
    /// Length of the common header.
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        #![allow(missing_docs)]
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_SIZE: Range<usize> = 8..12;
        pub const PAGE_NO: Range<usize> = 12..20;
        pub const LSN: Range<usize> = 20..28;
        pub const CRC32: Range<usize> = 28..32;
    }

    /// Kind of page, which also fixes the size of its trailer.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        /// Anchor page holding the head and tail of the directory chain.
        Meta = 1,
        /// Overflow slot directory page.
        Directory = 2,
        /// Data page carrying a back-reference in its trailer.
        Data = 3,
    }

    impl PageKind {
        /// On-disk tag.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }

        /// Length of the trailer ("special" area) at the tail of the page.
        /// Full-page images never include these bytes.
        pub const fn trailer_len(self) -> usize {
            match self {
                PageKind::Meta => 0,
                PageKind::Directory => 16,
                PageKind::Data => 16,
            }
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = SlotdirError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Meta),
                2 => Ok(PageKind::Directory),
                3 => Ok(PageKind::Data),
                _ => Err(SlotdirError::Corruption("unknown page kind")),
            }
        }
    }

    /// Decoded common page header.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        /// Format version.
        pub format_version: u16,
        /// Page kind.
        pub kind: PageKind,
        /// Page size in bytes.
        pub page_size: u32,
        /// Page number the page was written for.
        pub page_no: PageId,
        /// End position of the last record applied.
        pub lsn: Lsn,
        /// Checksum sealed on flush.
        pub crc32: u32,
    }

    impl PageHeader {
        /// Header for a fresh page with LSN 0.
        pub fn new(page_no: PageId, kind: PageKind, page_size: u32) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN + kind.trailer_len() {
                return Err(SlotdirError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                lsn: Lsn(0),
                crc32: 0,
            })
        }

        /// Replaces the LSN.
        pub fn with_lsn(mut self, lsn: Lsn) -> Self {
            self.lsn = lsn;
            self
        }

        /// Writes the header into the first 32 bytes of `dst`.
        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(SlotdirError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::LSN].copy_from_slice(&self.lsn.0.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        /// Parses and validates a header.
        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(SlotdirError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(SlotdirError::Corruption("invalid page magic"));
            }
            let format_version = ord::get_u16_be(&hdr[header::FORMAT_VERSION]);
            if format_version != PAGE_FORMAT_VERSION {
                return Err(SlotdirError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(SlotdirError::Corruption(
                    "page header reserved byte not zero",
                ));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = ord::get_u32_be(&hdr[header::PAGE_SIZE]);
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(SlotdirError::Corruption("page size smaller than header"));
            }
            let page_no = PageId(ord::get_u64_be(&hdr[header::PAGE_NO]));
            let lsn = Lsn(ord::get_u64_be(&hdr[header::LSN]));
            let crc32 = ord::get_u32_be(&hdr[header::CRC32]);
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no,
                lsn,
                crc32,
            })
        }
    }

    /// Returns true when the page has never been written (all zero bytes).
    pub fn is_new(buf: &[u8]) -> bool {
        buf.iter().all(|&b| b == 0)
    }

    /// Reads the page LSN. A new page reads as `Lsn(0)`.
    pub fn page_lsn(buf: &[u8]) -> Lsn {
        if buf.len() < PAGE_HDR_LEN || buf[header::MAGIC] != PAGE_MAGIC {
            return Lsn(0);
        }
        Lsn(ord::get_u64_be(&buf[header::LSN]))
    }

    /// Stamps the page LSN in place.
    pub fn set_page_lsn(buf: &mut [u8], lsn: Lsn) {
        ord::put_u64_be(&mut buf[header::LSN], lsn.0);
    }

    /// Decodes the header and checks the page kind.
    pub fn expect_kind(buf: &[u8], kind: PageKind) -> Result<PageHeader> {
        let header = PageHeader::decode(buf)?;
        if header.kind != kind {
            return Err(SlotdirError::Corruption("unexpected page kind"));
        }
        Ok(header)
    }

    /// Zeroes the checksum field.
    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(SlotdirError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }
}
