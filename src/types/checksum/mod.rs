#![forbid(unsafe_code)]

use crc32fast::Hasher;

/// Page checksum keyed by page number, so a page written at the wrong offset fails validation.
///
/// `payload` must have its CRC field zeroed.
pub fn page_crc32(page_no: u64, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
