// LZX decompression.
//
// # Modules
//
// - `bitstream` — 16-bit little-endian, MSB-first bit reader
// - `tree`      — canonical Huffman decode tables and pretree length decoding
// - `decoder`   — frame decompression with chained window state

pub mod bitstream;
pub mod decoder;
pub mod tree;

// Re-export key types for convenience.
pub use bitstream::BitReader;
pub use decoder::{EXTRA_BITS, FRAME_SIZE, LzxState, POSITION_BASE};
pub use tree::DecodeTable;
