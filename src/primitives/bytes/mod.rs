#![forbid(unsafe_code)]
//! Big-endian field helpers and a slice cursor shared by the page and log codecs.

pub mod ord {
    //! Fixed-width big-endian accessors.
    //!
    //! Callers pass slices whose length was already validated against the page
    //! or record layout; a short slice is a programming error and panics.

    use core::convert::TryInto;

    /// Writes a u16 in big-endian order.
    pub fn put_u16_be(dst: &mut [u8], v: u16) {
        dst[..2].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u16.
    pub fn get_u16_be(src: &[u8]) -> u16 {
        let bytes: [u8; 2] = src[..2].try_into().expect("u16 field is 2 bytes");
        u16::from_be_bytes(bytes)
    }

    /// Writes a u32 in big-endian order.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32.
    pub fn get_u32_be(src: &[u8]) -> u32 {
        let bytes: [u8; 4] = src[..4].try_into().expect("u32 field is 4 bytes");
        u32::from_be_bytes(bytes)
    }

    /// Writes a u64 in big-endian order.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        dst[..8].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u64.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let bytes: [u8; 8] = src[..8].try_into().expect("u64 field is 8 bytes");
        u64::from_be_bytes(bytes)
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing untrusted payloads.

    use core::fmt;

    use super::ord;
    use crate::types::{FatalError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    ///
    /// Every short read is reported as a malformed record: the cursor only ever
    /// parses bytes that came out of the log.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(FatalError::MalformedRecord("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(FatalError::MalformedRecord("payload truncated").into());
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a big-endian u16.
        pub fn u16(&mut self) -> Result<u16> {
            Ok(ord::get_u16_be(self.take(2)?))
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            Ok(ord::get_u64_be(self.take(8)?))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Fails unless every byte was consumed.
        pub fn finish(&self) -> Result<()> {
            if self.remaining() != 0 {
                return Err(FatalError::MalformedRecord("trailing bytes in payload").into());
            }
            Ok(())
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
