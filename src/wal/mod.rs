//! Decoded slot directory log records.
//!
//! Framing, checksumming and reading the log itself belong to the log manager;
//! this module only models what one decoded record carries and how its
//! payloads are laid out.

pub mod payload;
mod record;
mod source;

pub use payload::{block, AllocateEntry, AllocatePayload, Clean, ClearLocation};
pub use record::{info, BlockRef, OpCode, PageImage, RedoRecord, MAX_BLOCK_ID};
pub use source::{MemoryLog, RecordSource};
