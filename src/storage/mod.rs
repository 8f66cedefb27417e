//! Page models for the slot directory.
//!
//! Every function here works on a plain page buffer; acquiring, locking and
//! stamping pages is the caller's business.

/// Overflow slot directory pages.
pub mod dir_page;
/// Data-page trailer and back-references.
pub mod heap;
/// The metadata page anchoring the directory chain.
pub mod meta;

pub use heap::SlotLocation;
pub use meta::MetaState;
