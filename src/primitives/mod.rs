//! Low-level building blocks the slot directory engine runs on.
//!
//! Includes byte utilities, positioned file I/O, and the shared page cache
//! through which every page is acquired, locked, mutated and released.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Positioned I/O abstractions over the database file.
pub mod io;

/// Shared page cache with share, exclusive and cleanup locking.
pub mod pager;
