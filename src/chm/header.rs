// ITSF file header, ITSP directory header and PMGL/PMGI chunk headers.
//
// Field layouts follow the unofficial CHM format notes ("Microsoft's HTML
// Help (.chm) format"); chmlib agrees on every field this crate reads.
// Parsers are pure: a header is either fully decoded into an immutable value
// struct or the parse fails, never both.

use crate::chm::bytes;
use crate::error::{ChmError, Result};

// ---------------------------------------------------------------------------
// Record signatures and sizes
// ---------------------------------------------------------------------------

pub const ITSF_MAGIC: [u8; 4] = *b"ITSF";
pub const ITSP_MAGIC: [u8; 4] = *b"ITSP";
pub const PMGL_MAGIC: [u8; 4] = *b"PMGL";
pub const PMGI_MAGIC: [u8; 4] = *b"PMGI";

/// ITSF header length for version 2 (no data-offset field).
pub const ITSF_V2_LEN: usize = 0x58;
/// ITSF header length for version 3.
pub const ITSF_V3_LEN: usize = 0x60;
/// ITSP header length (version 1, the only one ever shipped).
pub const ITSP_V1_LEN: usize = 0x54;
/// PMGL listing-chunk header length.
pub const PMGL_LEN: usize = 0x14;
/// PMGI index-chunk header length.
pub const PMGI_LEN: usize = 0x08;

fn check_magic(buf: &[u8], expected: [u8; 4], name: &'static str) -> Result<()> {
    let found = match buf.get(..4) {
        Some(b) => [b[0], b[1], b[2], b[3]],
        None => {
            return Err(ChmError::TruncatedData {
                offset: 0,
                needed: 4,
                available: buf.len(),
            });
        }
    };
    if found != expected {
        return Err(ChmError::InvalidMagic {
            expected: name,
            found,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ITSF file header
// ---------------------------------------------------------------------------

/// Parsed ITSF file header.
///
/// Layout: `ITSF` magic, version, total header length, a timestamp, the
/// Windows language ID, two GUIDs, a section table (offset/length pairs) whose
/// second entry is the directory, and — in version 3 only — the absolute
/// offset of the content section at 0x58. For version 2 the content section
/// starts right after the directory, so `data_offset` is computed.
#[derive(Debug, Clone)]
pub struct ItsfHeader {
    /// Format version (2 or 3).
    pub version: u32,
    /// Total header length in bytes.
    pub header_len: u32,
    /// DOS-epoch timestamp of the last modification.
    pub timestamp: u32,
    /// Windows language ID.
    pub lang_id: u32,
    /// Absolute offset of the directory (ITSP header + chunks).
    pub dir_offset: u64,
    /// Directory length in bytes.
    pub dir_len: u64,
    /// Absolute offset of the content section.
    pub data_offset: u64,
}

impl ItsfHeader {
    /// Decode the ITSF header from the start of the container buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_magic(data, ITSF_MAGIC, "ITSF")?;
        if data.len() < ITSF_V2_LEN {
            return Err(ChmError::TruncatedData {
                offset: 0,
                needed: ITSF_V2_LEN,
                available: data.len(),
            });
        }

        let version = bytes::read_u32_le(data, 0x04)?;
        let header_len = bytes::read_u32_le(data, 0x08)?;
        let timestamp = bytes::read_u32_le(data, 0x10)?;
        let lang_id = bytes::read_u32_le(data, 0x14)?;
        // 0x18..0x38: two GUIDs, not interpreted.
        // 0x38..0x48: section 0 (file-size record), not interpreted.
        let dir_offset = bytes::read_u64_le(data, 0x48)?;
        let dir_len = bytes::read_u64_le(data, 0x50)?;

        let min_len = match version {
            2 => ITSF_V2_LEN,
            3 => ITSF_V3_LEN,
            _ => {
                return Err(ChmError::Parse(format!(
                    "unsupported ITSF version {version}"
                )));
            }
        };
        if (header_len as usize) < min_len {
            return Err(ChmError::Parse(format!(
                "ITSF v{version} header length {header_len:#X} shorter than {min_len:#X}"
            )));
        }

        // Version 3 carries the content-section offset at 0x58; version 2
        // places the content right after the directory.
        let data_offset = if version == 3 && data.len() >= ITSF_V3_LEN {
            bytes::read_u64_le(data, 0x58)?
        } else {
            dir_offset
                .checked_add(dir_len)
                .ok_or_else(|| ChmError::Parse("directory offset + length overflows".into()))?
        };

        Ok(Self {
            version,
            header_len,
            timestamp,
            lang_id,
            dir_offset,
            dir_len,
            data_offset,
        })
    }
}

// ---------------------------------------------------------------------------
// ITSP directory header
// ---------------------------------------------------------------------------

/// Parsed ITSP directory header.
#[derive(Debug, Clone)]
pub struct ItspHeader {
    /// Format version (always 1).
    pub version: u32,
    /// Header length (always 0x54).
    pub header_len: u32,
    /// Directory chunk size in bytes (usually 0x1000).
    pub chunk_size: u32,
    /// "Density" of the quickref section, usually 2.
    pub quickref_density: u32,
    /// Depth of the index tree: 1 = no PMGI index, 2 = one PMGI level.
    pub index_depth: u32,
    /// Chunk number of the root PMGI chunk, -1 if there is none.
    pub index_root: i32,
    /// Chunk number of the first PMGL (listing) chunk.
    pub first_chunk: u32,
    /// Chunk number of the last PMGL (listing) chunk.
    pub last_chunk: u32,
    /// Total number of directory chunks.
    pub num_chunks: u32,
    /// Windows language ID.
    pub lang_id: u32,
}

impl ItspHeader {
    /// Decode the ITSP header from a slice starting at the directory offset.
    pub fn parse(data: &[u8]) -> Result<Self> {
        check_magic(data, ITSP_MAGIC, "ITSP")?;
        if data.len() < ITSP_V1_LEN {
            return Err(ChmError::TruncatedData {
                offset: 0,
                needed: ITSP_V1_LEN,
                available: data.len(),
            });
        }

        let version = bytes::read_u32_le(data, 0x04)?;
        let header_len = bytes::read_u32_le(data, 0x08)?;
        let chunk_size = bytes::read_u32_le(data, 0x10)?;
        let quickref_density = bytes::read_u32_le(data, 0x14)?;
        let index_depth = bytes::read_u32_le(data, 0x18)?;
        let index_root = bytes::read_i32_le(data, 0x1C)?;
        let first_chunk = bytes::read_u32_le(data, 0x20)?;
        let last_chunk = bytes::read_u32_le(data, 0x24)?;
        let num_chunks = bytes::read_u32_le(data, 0x2C)?;
        let lang_id = bytes::read_u32_le(data, 0x30)?;

        if version != 1 {
            return Err(ChmError::Parse(format!(
                "unsupported ITSP version {version}"
            )));
        }
        if header_len as usize != ITSP_V1_LEN {
            return Err(ChmError::Parse(format!(
                "ITSP header length {header_len:#X}, expected {ITSP_V1_LEN:#X}"
            )));
        }
        if (chunk_size as usize) < PMGL_LEN {
            return Err(ChmError::Parse(format!(
                "directory chunk size {chunk_size:#X} too small"
            )));
        }

        Ok(Self {
            version,
            header_len,
            chunk_size,
            quickref_density,
            index_depth,
            index_root,
            first_chunk,
            last_chunk,
            num_chunks,
            lang_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Directory chunk headers
// ---------------------------------------------------------------------------

/// Header of one directory chunk: a PMGL listing chunk or a PMGI index chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkHeader {
    /// Listing chunk: entries follow the 0x14-byte header; `free_space` bytes
    /// at the chunk end hold the quickref area and padding.
    Pmgl {
        free_space: u32,
        block_prev: i32,
        block_next: i32,
    },
    /// Index chunk, skipped during listing enumeration.
    Pmgi { free_space: u32 },
}

impl ChunkHeader {
    /// Decode a chunk header from the start of a directory chunk.
    pub fn parse(chunk: &[u8]) -> Result<Self> {
        let sig = chunk.get(..4).ok_or(ChmError::TruncatedData {
            offset: 0,
            needed: 4,
            available: chunk.len(),
        })?;
        if sig == PMGL_MAGIC {
            if chunk.len() < PMGL_LEN {
                return Err(ChmError::TruncatedData {
                    offset: 0,
                    needed: PMGL_LEN,
                    available: chunk.len(),
                });
            }
            Ok(ChunkHeader::Pmgl {
                free_space: bytes::read_u32_le(chunk, 0x04)?,
                block_prev: bytes::read_i32_le(chunk, 0x0C)?,
                block_next: bytes::read_i32_le(chunk, 0x10)?,
            })
        } else if sig == PMGI_MAGIC {
            Ok(ChunkHeader::Pmgi {
                free_space: bytes::read_u32_le(chunk, 0x04)?,
            })
        } else {
            Err(ChmError::Parse(format!(
                "bad directory chunk signature {sig:02X?}"
            )))
        }
    }

    /// Length of this chunk's header record.
    #[inline]
    pub fn header_len(&self) -> usize {
        match self {
            ChunkHeader::Pmgl { .. } => PMGL_LEN,
            ChunkHeader::Pmgi { .. } => PMGI_LEN,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
