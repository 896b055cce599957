// LZXC control data and reset table for the compressed content section.
//
// The control data fixes the decoder parameters (window size, reset
// cadence); the reset table maps uncompressed frame numbers to byte offsets
// in the compressed content stream. Both live in ordinary section-0 entries
// of the directory.

use crate::chm::bytes;
use crate::error::{ChmError, Result};
use crate::lzx::FRAME_SIZE;

pub const LZXC_MAGIC: [u8; 4] = *b"LZXC";

/// Control-data record length for version 1.
pub const LZXC_V1_LEN: usize = 0x18;
/// Reset-table header length; the address table follows at `table_offset`.
pub const RESET_TABLE_HEADER_LEN: usize = 0x28;

// ---------------------------------------------------------------------------
// Control data
// ---------------------------------------------------------------------------

/// Parsed LZXC control data.
///
/// Version 2 stores `reset_interval` and `window_size` in units of 0x8000
/// bytes; both are scaled to bytes here. `reset_frame_interval` is the derived
/// cadence, in frames, at which the decoder history is fully reset.
#[derive(Debug, Clone)]
pub struct LzxcControlData {
    /// Record version (1 or 2).
    pub version: u32,
    /// History reset interval in bytes of uncompressed data.
    pub reset_interval: u32,
    /// LZX history window size in bytes (power of two, 2^15..=2^21).
    pub window_size: u32,
    /// Windows of data cached per reset.
    pub windows_per_reset: u32,
    /// Frames between full history resets.
    pub reset_frame_interval: u32,
}

impl LzxcControlData {
    /// Decode a control-data record (starting at its leading size field).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < LZXC_V1_LEN {
            return Err(ChmError::TruncatedData {
                offset: 0,
                needed: LZXC_V1_LEN,
                available: data.len(),
            });
        }
        let sig = [data[4], data[5], data[6], data[7]];
        if sig != LZXC_MAGIC {
            return Err(ChmError::InvalidMagic {
                expected: "LZXC",
                found: sig,
            });
        }

        let version = bytes::read_u32_le(data, 0x08)?;
        let mut reset_interval = bytes::read_u32_le(data, 0x0C)?;
        let mut window_size = bytes::read_u32_le(data, 0x10)?;
        let windows_per_reset = bytes::read_u32_le(data, 0x14)?;

        match version {
            1 => {}
            2 => {
                // Version 2 counts in 0x8000-byte units.
                reset_interval = reset_interval
                    .checked_mul(FRAME_SIZE as u32)
                    .ok_or_else(|| ChmError::Parse("LZXC reset interval overflows".into()))?;
                window_size = window_size
                    .checked_mul(FRAME_SIZE as u32)
                    .ok_or_else(|| ChmError::Parse("LZXC window size overflows".into()))?;
            }
            _ => {
                return Err(ChmError::Parse(format!(
                    "unsupported LZXC version {version}"
                )));
            }
        }

        if !window_size.is_power_of_two() || !(1u32 << 15..=1u32 << 21).contains(&window_size) {
            return Err(ChmError::Parse(format!(
                "LZX window size {window_size:#X} not a power of two in 2^15..=2^21"
            )));
        }

        let half_window = window_size / 2;
        if reset_interval == 0 || reset_interval % half_window != 0 {
            return Err(ChmError::Parse(format!(
                "LZXC reset interval {reset_interval:#X} not a multiple of half the window"
            )));
        }
        let reset_frame_interval = (reset_interval / half_window)
            .checked_mul(windows_per_reset.max(1))
            .ok_or_else(|| ChmError::Parse("LZXC reset cadence overflows".into()))?;

        Ok(Self {
            version,
            reset_interval,
            window_size,
            windows_per_reset,
            reset_frame_interval,
        })
    }
}

// ---------------------------------------------------------------------------
// Reset table
// ---------------------------------------------------------------------------

/// Parsed LZX reset table: one compressed-stream offset per 0x8000-byte frame.
#[derive(Debug, Clone)]
pub struct LzxcResetTable {
    /// Record version.
    pub version: u32,
    /// Number of frames in the content stream.
    pub block_count: u32,
    /// Total uncompressed length of the content stream.
    pub uncompressed_len: u64,
    /// Total compressed length of the content stream.
    pub compressed_len: u64,
    /// Uncompressed frame length (always 0x8000).
    pub frame_len: u64,
    /// Compressed-stream offset of each frame, non-decreasing.
    pub block_addresses: Vec<u64>,
}

impl LzxcResetTable {
    /// Decode a reset-table record.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RESET_TABLE_HEADER_LEN {
            return Err(ChmError::TruncatedData {
                offset: 0,
                needed: RESET_TABLE_HEADER_LEN,
                available: data.len(),
            });
        }

        let version = bytes::read_u32_le(data, 0x00)?;
        let block_count = bytes::read_u32_le(data, 0x04)?;
        let entry_size = bytes::read_u32_le(data, 0x08)?;
        let table_offset = bytes::read_u32_le(data, 0x0C)?;
        let uncompressed_len = bytes::read_u64_le(data, 0x10)?;
        let compressed_len = bytes::read_u64_le(data, 0x18)?;
        let frame_len = bytes::read_u64_le(data, 0x20)?;

        if entry_size != 8 {
            return Err(ChmError::Parse(format!(
                "reset table entry size {entry_size}, expected 8"
            )));
        }
        if frame_len != FRAME_SIZE as u64 {
            return Err(ChmError::Parse(format!(
                "reset table frame length {frame_len:#X}, expected {FRAME_SIZE:#X}"
            )));
        }
        let table_end = (table_offset as usize)
            .checked_add(block_count as usize * 8)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                ChmError::Parse(format!(
                    "reset table with {block_count} entries overruns its record"
                ))
            })?;
        if uncompressed_len > block_count as u64 * frame_len {
            return Err(ChmError::Parse(format!(
                "uncompressed length {uncompressed_len} exceeds {block_count} frames"
            )));
        }

        let mut block_addresses = Vec::with_capacity(block_count as usize);
        let mut prev = 0u64;
        let mut pos = table_offset as usize;
        while pos < table_end {
            let addr = bytes::read_u64_le(data, pos)?;
            if addr < prev || addr > compressed_len {
                return Err(ChmError::Parse(format!(
                    "reset table address {addr:#X} out of order or past the compressed stream"
                )));
            }
            block_addresses.push(addr);
            prev = addr;
            pos += 8;
        }

        Ok(Self {
            version,
            block_count,
            uncompressed_len,
            compressed_len,
            frame_len,
            block_addresses,
        })
    }

    /// Compressed byte range of frame `n`, relative to the content stream.
    pub fn frame_span(&self, n: u32) -> Result<(u64, u64)> {
        let start = *self
            .block_addresses
            .get(n as usize)
            .ok_or_else(|| ChmError::Parse(format!("frame {n} beyond reset table")))?;
        let end = match self.block_addresses.get(n as usize + 1) {
            Some(&next) => next,
            None => self.compressed_len,
        };
        Ok((start, end))
    }

    /// Uncompressed length of frame `n` (the last frame may be short).
    pub fn frame_output_len(&self, n: u32) -> usize {
        let start = n as u64 * self.frame_len;
        (self.uncompressed_len.saturating_sub(start)).min(self.frame_len) as usize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
