// Error taxonomy for CHM container parsing and LZX decompression.
//
// Everything surfaces as a single `ChmError`. Container-level failures
// (`InvalidMagic`, `TruncatedData`, `Parse`) are fatal at open time and leave
// no partially-initialized extractor behind. `Decompression` aborts only the
// extraction call that hit it; the extractor stays usable for other entries.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ChmError>;

/// Errors produced while opening a CHM container or extracting an entry.
#[derive(Debug, Error)]
pub enum ChmError {
    /// A 4-byte record signature did not match.
    #[error("invalid signature: expected {expected:?}, found {found:02X?}")]
    InvalidMagic {
        expected: &'static str,
        found: [u8; 4],
    },

    /// Fewer bytes were available than a fixed-size record requires.
    #[error("truncated data: need {needed} bytes at offset {offset}, {available} available")]
    TruncatedData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Structural inconsistency in the directory or control records.
    #[error("malformed container: {0}")]
    Parse(String),

    /// Malformed LZX bitstream or an out-of-window back-reference.
    #[error("LZX decompression failed: {0}")]
    Decompression(String),

    /// Byte-slice bounds violation in offset arithmetic.
    #[error("byte range {start}..{end} out of bounds (len {len})")]
    Range { start: u64, end: u64, len: usize },

    /// I/O failure while reading the container stream at open time.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
