// LZX frame decompressor.
//
// Content is produced in 0x8000-byte frames. Each frame's compressed bytes
// form their own 16-bit-aligned bitstream segment, but decoder state — the
// history window, the R0/R1/R2 repeated-offset registers, the persistent
// code-length tables and any partially decoded block — chains from the
// previous frame. Frames at reset-interval boundaries start from a fully
// reset state, which is what makes random access via the reset table
// possible at all.
//
// Matches mspack's reading of the format where the Microsoft documentation
// is wrong (aligned-offset extra bits, length-tree emptiness).

use log::trace;

use crate::error::{ChmError, Result};
use crate::lzx::bitstream::BitReader;
use crate::lzx::tree::{self, DecodeTable};

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// Uncompressed bytes per frame.
pub const FRAME_SIZE: usize = 0x8000;
/// Literal symbols in the main tree.
pub const NUM_CHARS: usize = 256;
/// Match-length symbols in the length tree.
pub const NUM_SECONDARY_LENGTHS: usize = 249;
/// Position slots for the largest (2 MiB) window.
pub const MAX_POSITION_SLOTS: usize = 50;

const MIN_MATCH: u32 = 2;
const NUM_PRIMARY_LENGTHS: u32 = 7;
const LENGTH_MAXSYMBOLS: usize = NUM_SECONDARY_LENGTHS + 1;
const MAINTREE_TABLEBITS: u32 = 12;
const LENGTH_TABLEBITS: u32 = 12;
const ALIGNED_MAXSYMBOLS: usize = 8;
const ALIGNED_TABLEBITS: u32 = 7;
/// E8 translation stops after this many frames.
const E8_MAX_FRAMES: u32 = 32768;

/// Extra offset bits per position slot.
pub const EXTRA_BITS: [u8; MAX_POSITION_SLOTS] = {
    let mut eb = [0u8; MAX_POSITION_SLOTS];
    let mut i = 4;
    while i < MAX_POSITION_SLOTS {
        let e = i / 2 - 1;
        eb[i] = if e > 17 { 17 } else { e as u8 };
        i += 1;
    }
    eb
};

/// Base formatted offset per position slot.
pub const POSITION_BASE: [u32; MAX_POSITION_SLOTS] = {
    let mut pb = [0u32; MAX_POSITION_SLOTS];
    let mut i = 1;
    while i < MAX_POSITION_SLOTS {
        pb[i] = pb[i - 1] + (1 << EXTRA_BITS[i - 1]);
        i += 1;
    }
    pb
};

/// Position slots used by a window of the given size: the smallest slot whose
/// base reaches the window, or all of them for the 2 MiB window.
fn position_slots(window_size: u32) -> usize {
    POSITION_BASE
        .iter()
        .position(|&base| window_size <= base)
        .unwrap_or(MAX_POSITION_SLOTS)
}

// ---------------------------------------------------------------------------
// Block types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    Verbatim,
    Aligned,
    Uncompressed,
}

impl BlockType {
    fn from_bits(v: u32) -> Result<Self> {
        match v {
            1 => Ok(BlockType::Verbatim),
            2 => Ok(BlockType::Aligned),
            3 => Ok(BlockType::Uncompressed),
            _ => Err(ChmError::Decompression(format!("invalid block type {v}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Repeated-offset registers
// ---------------------------------------------------------------------------

/// The three most recent match offsets, all initialized to 1.
#[derive(Debug, Clone, Copy)]
struct Lookback {
    r0: u32,
    r1: u32,
    r2: u32,
}

impl Lookback {
    fn new() -> Self {
        Self { r0: 1, r1: 1, r2: 1 }
    }

    #[inline]
    fn most_recent(&mut self) -> u32 {
        self.r0
    }

    #[inline]
    fn second_most_recent(&mut self) -> u32 {
        std::mem::swap(&mut self.r0, &mut self.r1);
        self.r0
    }

    #[inline]
    fn third_most_recent(&mut self) -> u32 {
        std::mem::swap(&mut self.r0, &mut self.r2);
        self.r0
    }

    #[inline]
    fn push(&mut self, offset: u32) {
        self.r2 = self.r1;
        self.r1 = self.r0;
        self.r0 = offset;
    }
}

// ---------------------------------------------------------------------------
// Window cursor
// ---------------------------------------------------------------------------

/// Write cursor over the circular history window.
struct WindowCursor<'a> {
    window: &'a mut [u8],
    mask: usize,
    pos: usize,
    /// Bytes produced since the last reset; bounds valid match offsets.
    written: u64,
}

impl WindowCursor<'_> {
    #[inline]
    fn put(&mut self, byte: u8) {
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) & self.mask;
        self.written += 1;
    }

    fn copy_match(&mut self, offset: u32, len: u32) -> Result<()> {
        let reach = self.written.min(self.window.len() as u64);
        if offset == 0 || u64::from(offset) > reach {
            return Err(ChmError::Decompression(format!(
                "match offset {offset} outside decoded history ({reach} bytes)"
            )));
        }
        let mut src = (self.pos + self.window.len() - offset as usize) & self.mask;
        // Byte-by-byte keeps the overlapping-copy semantics matches rely on.
        for _ in 0..len {
            self.window[self.pos] = self.window[src];
            self.pos = (self.pos + 1) & self.mask;
            src = (src + 1) & self.mask;
        }
        self.written += u64::from(len);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decoder state
// ---------------------------------------------------------------------------

/// Complete LZX decoder state for one compressed content stream.
///
/// Cloning captures a history snapshot: a clone taken after frame `n`
/// continues with frame `n + 1` exactly as the original would, which is how
/// the extractor's frame cache seeds partial walks.
#[derive(Clone)]
pub struct LzxState {
    window: Vec<u8>,
    mask: usize,
    window_pos: usize,
    regs: Lookback,

    main_lens: Vec<u8>,
    length_lens: Vec<u8>,
    main_table: Option<DecodeTable>,
    length_table: Option<DecodeTable>,
    aligned_table: Option<DecodeTable>,

    block_type: Option<BlockType>,
    block_length: u32,
    block_remaining: u32,
    /// Bytes already decoded for the next frame by a block-final match that
    /// ran past the frame boundary.
    carried: usize,

    header_read: bool,
    intel_file_size: u32,
    intel_cur_pos: u32,
    intel_started: bool,
    frames_read: u32,

    written: u64,
}

impl LzxState {
    /// Create a fresh decoder for the given window size (power of two,
    /// 2^15..=2^21 bytes).
    pub fn new(window_size: u32) -> Result<Self> {
        if !window_size.is_power_of_two()
            || !(1u32 << 15..=1u32 << 21).contains(&window_size)
        {
            return Err(ChmError::Decompression(format!(
                "unsupported LZX window size {window_size:#X}"
            )));
        }
        let slots = position_slots(window_size);
        Ok(Self {
            window: vec![0; window_size as usize],
            mask: window_size as usize - 1,
            window_pos: 0,
            regs: Lookback::new(),
            main_lens: vec![0; NUM_CHARS + (slots << 3)],
            length_lens: vec![0; LENGTH_MAXSYMBOLS],
            main_table: None,
            length_table: None,
            aligned_table: None,
            block_type: None,
            block_length: 0,
            block_remaining: 0,
            carried: 0,
            header_read: false,
            intel_file_size: 0,
            intel_cur_pos: 0,
            intel_started: false,
            frames_read: 0,
            written: 0,
        })
    }

    /// Window size in bytes.
    #[inline]
    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Reset to the state a reset-interval boundary demands: cleared window,
    /// unit R registers, zeroed length tables, header re-read.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.window_pos = 0;
        self.regs = Lookback::new();
        self.main_lens.fill(0);
        self.length_lens.fill(0);
        self.main_table = None;
        self.length_table = None;
        self.aligned_table = None;
        self.block_type = None;
        self.block_length = 0;
        self.block_remaining = 0;
        self.carried = 0;
        self.header_read = false;
        self.intel_file_size = 0;
        self.intel_cur_pos = 0;
        self.intel_started = false;
        self.frames_read = 0;
        self.written = 0;
    }

    /// Decompress one frame from its compressed segment, returning exactly
    /// `out_len` bytes. State advances past the frame; on error the caller
    /// must discard this state.
    pub fn decompress_frame(&mut self, input: &[u8], out_len: usize) -> Result<Vec<u8>> {
        if out_len > FRAME_SIZE {
            return Err(ChmError::Decompression(format!(
                "frame length {out_len} exceeds {FRAME_SIZE}"
            )));
        }

        let mut r = BitReader::new(input);

        if !self.header_read {
            self.header_read = true;
            if r.read_bits(1) == 1 {
                let hi = r.read_bits(16);
                let lo = r.read_bits(16);
                self.intel_file_size = (hi << 16) | lo;
            }
            r.check_overrun()?;
        }

        let frame_start = (self.window_pos + self.window.len() - self.carried) & self.mask;
        let consumed_carry = self.carried.min(out_len);
        let mut togo = out_len - consumed_carry;
        self.carried -= consumed_carry;

        while togo > 0 {
            if self.block_remaining == 0 {
                self.read_block_header(&mut r)?;
            }
            let block_type = self.block_type.ok_or_else(|| {
                ChmError::Decompression("no block in progress".to_string())
            })?;
            let want = togo.min(self.block_remaining as usize);

            let mut cur = WindowCursor {
                window: &mut self.window,
                mask: self.mask,
                pos: self.window_pos,
                written: self.written,
            };
            let produced = match block_type {
                BlockType::Verbatim => decode_run(
                    &mut r,
                    self.main_table.as_ref(),
                    self.length_table.as_ref(),
                    None,
                    &mut self.regs,
                    &mut cur,
                    want,
                )?,
                BlockType::Aligned => decode_run(
                    &mut r,
                    self.main_table.as_ref(),
                    self.length_table.as_ref(),
                    self.aligned_table.as_ref(),
                    &mut self.regs,
                    &mut cur,
                    want,
                )?,
                BlockType::Uncompressed => {
                    for &byte in r.copy_bytes(want)? {
                        cur.put(byte);
                    }
                    want
                }
            };
            self.window_pos = cur.pos;
            self.written = cur.written;

            if produced as u64 > u64::from(self.block_remaining) {
                return Err(ChmError::Decompression(
                    "match overruns its block".to_string(),
                ));
            }
            self.block_remaining -= produced as u32;
            if self.block_remaining == 0
                && block_type == BlockType::Uncompressed
                && self.block_length & 1 == 1
            {
                r.skip_pad_byte();
            }

            if produced > togo {
                self.carried += produced - togo;
                togo = 0;
            } else {
                togo -= produced;
            }
            r.check_overrun()?;
        }

        let mut out = self.frame_slice(frame_start, out_len);

        let frame_no = self.frames_read;
        self.frames_read += 1;
        if frame_no < E8_MAX_FRAMES && self.intel_file_size != 0 {
            if self.intel_started && out.len() > 10 {
                translate_e8(&mut out, self.intel_cur_pos, self.intel_file_size);
            }
            self.intel_cur_pos = self.intel_cur_pos.wrapping_add(out.len() as u32);
        }

        trace!(
            "decoded frame: {} bytes, window at {:#X}, {} carried",
            out.len(),
            self.window_pos,
            self.carried
        );
        Ok(out)
    }

    fn read_block_header(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        let block_type = BlockType::from_bits(r.read_bits(3))?;
        let hi = r.read_bits(16);
        let lo = r.read_bits(8);
        let block_length = (hi << 8) | lo;
        if block_length == 0 {
            return Err(ChmError::Decompression("zero-length block".to_string()));
        }

        match block_type {
            BlockType::Aligned => {
                let mut aligned_lens = [0u8; ALIGNED_MAXSYMBOLS];
                for len in &mut aligned_lens {
                    *len = r.read_bits(3) as u8;
                }
                self.aligned_table = Some(
                    DecodeTable::build(&aligned_lens, ALIGNED_TABLEBITS)?.ok_or_else(|| {
                        ChmError::Decompression("empty aligned offset tree".to_string())
                    })?,
                );
                self.read_main_trees(r)?;
            }
            BlockType::Verbatim => {
                self.read_main_trees(r)?;
            }
            BlockType::Uncompressed => {
                self.intel_started = true;
                r.align16();
                let r0 = r.read_u32_raw()?;
                let r1 = r.read_u32_raw()?;
                let r2 = r.read_u32_raw()?;
                if r0 == 0 || r1 == 0 || r2 == 0 {
                    return Err(ChmError::Decompression(
                        "zero repeated offset in uncompressed block".to_string(),
                    ));
                }
                self.regs = Lookback { r0, r1, r2 };
            }
        }

        self.block_type = Some(block_type);
        self.block_length = block_length;
        self.block_remaining = block_length;
        r.check_overrun()
    }

    fn read_main_trees(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        let main_syms = self.main_lens.len();
        tree::read_lengths(r, &mut self.main_lens, 0, NUM_CHARS)?;
        tree::read_lengths(r, &mut self.main_lens, NUM_CHARS, main_syms)?;
        self.main_table = Some(
            DecodeTable::build(&self.main_lens, MAINTREE_TABLEBITS)?
                .ok_or_else(|| ChmError::Decompression("empty main tree".to_string()))?,
        );
        if self.main_lens[0xE8] != 0 {
            self.intel_started = true;
        }
        tree::read_lengths(r, &mut self.length_lens, 0, NUM_SECONDARY_LENGTHS)?;
        self.length_table = DecodeTable::build(&self.length_lens, LENGTH_TABLEBITS)?;
        Ok(())
    }

    /// Copy `len` window bytes starting at `start`, wrapping if needed.
    fn frame_slice(&self, start: usize, len: usize) -> Vec<u8> {
        let end = start + len;
        if end <= self.window.len() {
            self.window[start..end].to_vec()
        } else {
            let mut out = Vec::with_capacity(len);
            out.extend_from_slice(&self.window[start..]);
            out.extend_from_slice(&self.window[..end - self.window.len()]);
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Symbol run decoding
// ---------------------------------------------------------------------------

/// Decode symbols until at least `want` bytes are produced. A block-final
/// match may overshoot; the caller accounts the surplus to the next frame.
fn decode_run(
    r: &mut BitReader<'_>,
    main: Option<&DecodeTable>,
    length: Option<&DecodeTable>,
    aligned: Option<&DecodeTable>,
    regs: &mut Lookback,
    cur: &mut WindowCursor<'_>,
    want: usize,
) -> Result<usize> {
    let main =
        main.ok_or_else(|| ChmError::Decompression("block without a main tree".to_string()))?;

    let mut produced = 0usize;
    while produced < want {
        let sym = usize::from(main.read_symbol(r)?);
        if sym < NUM_CHARS {
            cur.put(sym as u8);
            produced += 1;
            continue;
        }

        let sym = sym - NUM_CHARS;
        let mut match_len = sym as u32 & NUM_PRIMARY_LENGTHS;
        if match_len == NUM_PRIMARY_LENGTHS {
            let footer = length.ok_or_else(|| {
                ChmError::Decompression("extended match length with an empty length tree".to_string())
            })?;
            match_len += u32::from(footer.read_symbol(r)?);
        }
        match_len += MIN_MATCH;

        let slot = sym >> 3;
        let match_offset = match slot {
            0 => regs.most_recent(),
            1 => regs.second_most_recent(),
            2 => regs.third_most_recent(),
            _ => {
                let extra = u32::from(EXTRA_BITS[slot]);
                let mut offset = POSITION_BASE[slot] - 2;
                match aligned {
                    Some(aligned_table) if extra >= 3 => {
                        if extra > 3 {
                            offset += r.read_bits(extra - 3) << 3;
                        }
                        offset += u32::from(aligned_table.read_symbol(r)?);
                    }
                    _ => offset += r.read_bits(extra),
                }
                regs.push(offset);
                offset
            }
        };

        cur.copy_match(match_offset, match_len)?;
        produced += match_len as usize;
    }
    Ok(produced)
}

/// Rewrite x86 CALL operands from absolute back to relative form.
///
/// Every 0xE8 byte is treated as an opcode whose following little-endian
/// i32, when it lies in `[-cur_pos, file_size)`, was translated by the
/// encoder and is undone here. The window keeps the untranslated bytes; only
/// the frame output is rewritten.
fn translate_e8(out: &mut [u8], cur_pos: u32, file_size: u32) {
    let file_size = i64::from(file_size);
    let mut cur = i64::from(cur_pos);
    let end = out.len().saturating_sub(10);

    let mut i = 0usize;
    while i < end {
        if out[i] != 0xE8 {
            i += 1;
            cur += 1;
            continue;
        }
        let abs = i64::from(i32::from_le_bytes([
            out[i + 1],
            out[i + 2],
            out[i + 3],
            out[i + 4],
        ]));
        if abs >= -cur && abs < file_size {
            let rel = if abs >= 0 { abs - cur } else { abs + file_size };
            out[i + 1..i + 5].copy_from_slice(&(rel as i32).to_le_bytes());
        }
        i += 5;
        cur += 5;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
