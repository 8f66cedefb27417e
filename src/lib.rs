//! Write-ahead-log redo for the overflow slot directory.
//!
//! Data pages that run out of inline transaction slots spill extra slot
//! entries into chained directory pages anchored by a metadata page. This crate
//! models those pages and replays the log records that mutate them, so that a
//! crash or a standby replica ends up with byte-identical directory pages,
//! chain links and data-page back-references.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod redo;
pub mod storage;
pub mod types;
pub mod wal;

pub use redo::{RedoAction, RedoEngine, RedoOptions, RedoSummary, Replayer, ReplayStats};
pub use types::{FatalError, Lsn, OffsetNumber, PageId, Result, SlotdirError};
