// CHM (ITSF) container format.
//
// This module owns everything container-shaped; the LZX bitstream itself
// lives in `crate::lzx`.
//
// # Modules
//
// - `bytes`     — byte-range utilities and ENCINT varint decoding
// - `header`    — ITSF file header, ITSP directory header, PMGL/PMGI chunks
// - `control`   — LZXC control data and the LZX reset table
// - `directory` — PMGL chunk walk into the ordered entry listing
// - `extractor` — open/enumerate/extract orchestration and the frame cache

pub mod bytes;
pub mod control;
pub mod directory;
pub mod extractor;
pub mod header;

// Re-export key types for convenience.
pub use control::{LzxcControlData, LzxcResetTable};
pub use directory::{DirectoryEntry, DirectoryListing, EntryKind};
pub use extractor::ChmExtractor;
pub use header::{ChunkHeader, ItsfHeader, ItspHeader};
