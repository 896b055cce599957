// Canonical Huffman decode tables and path-length (pretree) decoding.
//
// The table layout is the classic two-level scheme: codes no longer than
// `nbits` map directly through a `1 << nbits` prefix table; longer codes
// continue through pairs of internal-node entries appended after it. Symbols
// are assigned canonical codes in (length, symbol-index) order, which is also
// the order the LZX encoders emit them in.

use crate::error::{ChmError, Result};
use crate::lzx::bitstream::BitReader;

/// Symbols in every pretree.
pub const PRETREE_MAXSYMBOLS: usize = 20;
/// Bits per raw pretree path length.
pub const PRETREE_NUM_ELEMENTS_BITS: u32 = 4;
/// Prefix-table width for pretree decoding.
pub const PRETREE_TABLEBITS: u32 = 6;
/// Longest Huffman code the format allows.
pub const MAX_CODE_LENGTH: u32 = 16;

/// Marker for an unused table slot while building.
const UNUSED: u16 = u16::MAX;

// ---------------------------------------------------------------------------
// Decode table
// ---------------------------------------------------------------------------

/// A built decode table plus the per-symbol code lengths it was built from.
#[derive(Debug, Clone)]
pub struct DecodeTable {
    table: Vec<u16>,
    lens: Vec<u8>,
    nsyms: u16,
    nbits: u32,
}

impl DecodeTable {
    /// Build a decode table for `lens` with a `1 << nbits` prefix table.
    ///
    /// Returns `Ok(None)` for an empty set of lengths (a legal LZX encoding
    /// for a tree that is never consulted). An incomplete or oversubscribed
    /// non-empty code is malformed input.
    pub fn build(lens: &[u8], nbits: u32) -> Result<Option<DecodeTable>> {
        let nsyms = lens.len();
        let mut table = vec![0u16; (1 << nbits) + (nsyms << 1)];

        let table_mask: u32 = 1 << nbits;
        let mut bit_mask: u32 = table_mask >> 1;
        let mut pos: u32 = 0;

        // Direct-mapped entries for codes no longer than nbits.
        for bit_num in 1..=nbits {
            for (sym, &len) in lens.iter().enumerate() {
                if u32::from(len) != bit_num {
                    continue;
                }
                let leaf = pos as usize;
                pos += bit_mask;
                if pos > table_mask {
                    return Err(ChmError::Decompression(
                        "oversubscribed Huffman code".to_string(),
                    ));
                }
                for slot in &mut table[leaf..leaf + bit_mask as usize] {
                    *slot = sym as u16;
                }
            }
            bit_mask >>= 1;
        }

        if pos != table_mask {
            // Mark the untouched prefix entries, then place the long codes.
            for slot in &mut table[pos as usize..table_mask as usize] {
                *slot = UNUSED;
            }

            let mut next_symbol = if table_mask >> 1 < nsyms as u32 {
                nsyms as u32
            } else {
                table_mask >> 1
            };

            let mut pos = (pos as u64) << 16;
            let table_mask = (table_mask as u64) << 16;
            let mut bit_mask: u64 = 1 << 15;

            for bit_num in nbits + 1..=MAX_CODE_LENGTH {
                for (sym, &len) in lens.iter().enumerate() {
                    if u32::from(len) != bit_num {
                        continue;
                    }
                    if pos >= table_mask {
                        return Err(ChmError::Decompression(
                            "oversubscribed Huffman code".to_string(),
                        ));
                    }
                    let mut leaf = (pos >> 16) as usize;
                    for fill in 0..bit_num - nbits {
                        if table[leaf] == UNUSED {
                            let pair = (next_symbol as usize) << 1;
                            if pair + 1 >= table.len() {
                                return Err(ChmError::Decompression(
                                    "Huffman table overflow".to_string(),
                                ));
                            }
                            table[pair] = UNUSED;
                            table[pair + 1] = UNUSED;
                            table[leaf] = next_symbol as u16;
                            next_symbol += 1;
                        }
                        leaf = (table[leaf] as usize) << 1;
                        if (pos >> (15 - fill)) & 1 != 0 {
                            leaf += 1;
                        }
                    }
                    table[leaf] = sym as u16;
                    pos += bit_mask;
                }
                bit_mask >>= 1;
            }

            if pos != table_mask {
                // Either an incomplete code or no code at all.
                if lens.iter().any(|&l| l != 0) {
                    return Err(ChmError::Decompression(
                        "incomplete Huffman code".to_string(),
                    ));
                }
                return Ok(None);
            }
        }

        Ok(Some(DecodeTable {
            table,
            lens: lens.to_vec(),
            nsyms: nsyms as u16,
            nbits,
        }))
    }

    /// Decode one symbol from the bitstream.
    pub fn read_symbol(&self, r: &mut BitReader<'_>) -> Result<u16> {
        let window = r.peek16();
        let mut sym = self.table[(window >> (16 - self.nbits)) as usize];

        if sym >= self.nsyms {
            // Long code: walk the internal-node pairs one bit at a time.
            let mut bit = self.nbits;
            loop {
                if bit >= MAX_CODE_LENGTH || sym == UNUSED {
                    return Err(ChmError::Decompression(
                        "corrupt Huffman stream".to_string(),
                    ));
                }
                let idx = ((sym as usize) << 1) | ((window >> (15 - bit)) & 1) as usize;
                sym = *self.table.get(idx).ok_or_else(|| {
                    ChmError::Decompression("corrupt Huffman stream".to_string())
                })?;
                bit += 1;
                if sym < self.nsyms {
                    break;
                }
            }
        }

        let len = u32::from(self.lens[sym as usize]);
        if len == 0 {
            return Err(ChmError::Decompression(
                "symbol with zero code length".to_string(),
            ));
        }
        r.remove(len);
        Ok(sym)
    }
}

// ---------------------------------------------------------------------------
// Path-length decoding
// ---------------------------------------------------------------------------

/// Read the pretree-coded path lengths for `lens[first..last]`.
///
/// The 20 pretree lengths arrive as raw 4-bit values; the tree lengths then
/// follow as deltas against the previous block's lengths, with run codes 17
/// (short zero run), 18 (long zero run) and 19 (short same-value run).
pub fn read_lengths(
    r: &mut BitReader<'_>,
    lens: &mut [u8],
    first: usize,
    last: usize,
) -> Result<()> {
    let mut pre_lens = [0u8; PRETREE_MAXSYMBOLS];
    for len in &mut pre_lens {
        *len = r.read_bits(PRETREE_NUM_ELEMENTS_BITS) as u8;
    }
    let pretree = DecodeTable::build(&pre_lens, PRETREE_TABLEBITS)?
        .ok_or_else(|| ChmError::Decompression("empty pretree".to_string()))?;

    let mut i = first;
    while i < last {
        let code = pretree.read_symbol(r)?;
        match code {
            0..=16 => {
                lens[i] = ((u32::from(lens[i]) + 17 - u32::from(code)) % 17) as u8;
                i += 1;
            }
            17 => {
                let run = r.read_bits(4) as usize + 4;
                write_run(lens, &mut i, last, run, 0)?;
            }
            18 => {
                let run = r.read_bits(5) as usize + 20;
                write_run(lens, &mut i, last, run, 0)?;
            }
            19 => {
                let run = r.read_bits(1) as usize + 4;
                let delta = pretree.read_symbol(r)?;
                if delta > 16 {
                    return Err(ChmError::Decompression(
                        "run code with non-length delta".to_string(),
                    ));
                }
                let value = ((u32::from(lens[i]) + 17 - u32::from(delta)) % 17) as u8;
                write_run(lens, &mut i, last, run, value)?;
            }
            _ => {
                return Err(ChmError::Decompression(format!(
                    "pretree symbol {code} out of range"
                )));
            }
        }
    }
    r.check_overrun()
}

fn write_run(lens: &mut [u8], i: &mut usize, last: usize, run: usize, value: u8) -> Result<()> {
    let end = *i + run;
    if end > last {
        return Err(ChmError::Decompression(
            "length run overruns its table".to_string(),
        ));
    }
    lens[*i..end].fill(value);
    *i = end;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
