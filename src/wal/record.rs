use std::fmt;

use smallvec::SmallVec;

use crate::storage::{dir_page, heap};
use crate::types::{
    page::{self, PageHeader, PageKind},
    FatalError, Lsn, PageId, Result, SlotdirError,
};

/// Bits of the `info` byte.
pub mod info {
    /// Mask selecting the operation code.
    pub const OP_MASK: u8 = 0x70;
    /// Allocate-entry operation.
    pub const ALLOCATE_ENTRY: u8 = 0x00;
    /// Clean (prune) operation.
    pub const CLEAN: u8 = 0x10;
    /// Clear-back-reference operation.
    pub const CLEAR_LOCATION: u8 = 0x20;
    /// Block 0 of an allocate-entry record is a brand-new page.
    pub const INIT_PAGE: u8 = 0x80;
}

/// Operations carried by slot directory records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OpCode {
    /// Add an entry to a directory page and link the owning data page to it.
    AllocateEntry,
    /// Remove dead entries from a directory page.
    Clean,
    /// Clear a data page's back-reference.
    ClearLocation,
}

impl OpCode {
    /// Decodes the operation code from an `info` byte.
    pub fn from_info(info_byte: u8) -> std::result::Result<Self, FatalError> {
        match info_byte & info::OP_MASK {
            info::ALLOCATE_ENTRY => Ok(OpCode::AllocateEntry),
            info::CLEAN => Ok(OpCode::Clean),
            info::CLEAR_LOCATION => Ok(OpCode::ClearLocation),
            other => Err(FatalError::UnknownOpcode(other)),
        }
    }

    /// Operation bits as stored in the `info` byte.
    pub fn bits(self) -> u8 {
        match self {
            OpCode::AllocateEntry => info::ALLOCATE_ENTRY,
            OpCode::Clean => info::CLEAN,
            OpCode::ClearLocation => info::CLEAR_LOCATION,
        }
    }

    /// Short lowercase name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::AllocateEntry => "allocate_entry",
            OpCode::Clean => "clean",
            OpCode::ClearLocation => "clear_location",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A full-page image: every byte of the page except its trailer.
#[derive(Clone, Eq, PartialEq)]
pub struct PageImage {
    bytes: Vec<u8>,
}

impl PageImage {
    /// Captures the image of an initialized page.
    pub fn capture(page: &[u8]) -> Result<Self> {
        let header = PageHeader::decode(page)?;
        let len = page
            .len()
            .checked_sub(header.kind.trailer_len())
            .ok_or(SlotdirError::Corruption("page shorter than its trailer"))?;
        Ok(Self {
            bytes: page[..len].to_vec(),
        })
    }

    /// Wraps raw image bytes read from the log.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Page number recorded in the image header.
    pub fn page_no(&self) -> Result<PageId> {
        Ok(self.header()?.page_no)
    }

    fn header(&self) -> Result<PageHeader> {
        PageHeader::decode(&self.bytes)
            .map_err(|_| FatalError::MalformedRecord("page image header invalid").into())
    }

    /// Overwrites the page prefix with the image.
    ///
    /// The trailer is left as it was, except when the page previously held no
    /// page of the image's kind: then it starts out empty.
    pub fn restore(&self, page: &mut [u8]) -> Result<()> {
        let header = self.header()?;
        if self.bytes.len() + header.kind.trailer_len() != page.len()
            || header.page_size as usize != page.len()
        {
            return Err(FatalError::MalformedRecord("page image size mismatch").into());
        }
        let had_kind = page::expect_kind(page, header.kind).is_ok();
        page[..self.bytes.len()].copy_from_slice(&self.bytes);
        if !had_kind {
            match header.kind {
                PageKind::Directory => dir_page::set_trailer(page, dir_page::Trailer::default())?,
                PageKind::Data => heap::clear_back_reference(page)?,
                PageKind::Meta => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One page referenced by a record.
#[derive(Clone, Debug)]
pub struct BlockRef {
    /// Role of the page within the record (0..=3).
    pub id: u8,
    /// Page referenced.
    pub page: PageId,
    /// Full-page image, when the record carries one.
    pub image: Option<PageImage>,
    /// Per-block payload.
    pub data: Vec<u8>,
}

impl BlockRef {
    /// A reference without image or payload.
    pub fn new(id: u8, page: PageId) -> Self {
        Self {
            id,
            page,
            image: None,
            data: Vec::new(),
        }
    }

    /// Attaches a per-block payload.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// Highest block id any record uses.
pub const MAX_BLOCK_ID: u8 = 3;

/// A decoded log record, as handed to the redo engine.
#[derive(Clone, Debug)]
pub struct RedoRecord {
    /// Operation code and flags.
    pub info: u8,
    /// Referenced pages.
    pub blocks: SmallVec<[BlockRef; 4]>,
    /// Record-level payload.
    pub main_data: Vec<u8>,
    /// Log position just past this record.
    pub end_lsn: Lsn,
}

impl RedoRecord {
    /// Creates a record without blocks.
    pub fn new(info: u8, end_lsn: Lsn) -> Self {
        Self {
            info,
            blocks: SmallVec::new(),
            main_data: Vec::new(),
            end_lsn,
        }
    }

    /// Decoded operation code.
    pub fn op(&self) -> std::result::Result<OpCode, FatalError> {
        OpCode::from_info(self.info)
    }

    /// Whether the `INIT_PAGE` flag is set.
    pub fn init_page(&self) -> bool {
        self.info & info::INIT_PAGE != 0
    }

    /// Returns the block with the given role.
    pub fn block(&self, id: u8) -> Option<&BlockRef> {
        self.blocks.iter().find(|block| block.id == id)
    }

    /// Returns the block with the given role or a malformed-record error.
    pub fn require_block(&self, id: u8) -> std::result::Result<&BlockRef, FatalError> {
        self.block(id)
            .ok_or(FatalError::MalformedRecord("mandatory block reference missing"))
    }

    /// Adds a full-page image to an existing block.
    pub fn attach_image(&mut self, id: u8, image: PageImage) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|block| block.id == id)
            .ok_or(SlotdirError::NotFound)?;
        block.image = Some(image);
        Ok(())
    }

    /// Checks block ids are in range and no page or id appears twice.
    pub fn validate_blocks(&self) -> std::result::Result<(), FatalError> {
        for (i, block) in self.blocks.iter().enumerate() {
            if block.id > MAX_BLOCK_ID {
                return Err(FatalError::MalformedRecord("block id out of range"));
            }
            for other in &self.blocks[i + 1..] {
                if other.id == block.id {
                    return Err(FatalError::MalformedRecord("duplicate block id"));
                }
                if other.page == block.page {
                    return Err(FatalError::MalformedRecord(
                        "two block references name the same page",
                    ));
                }
            }
        }
        Ok(())
    }
}
