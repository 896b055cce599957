// Shared test support: a synthetic CHM container builder and a minimal LZX
// encoder whose streams the decoder under test must accept.
//
// The encoder emits one block per frame with fixed complete canonical codes:
// literals at 8 or 9 bits plus up to four explicit match symbols filling the
// remaining code space. Code assignment follows the same (length,
// symbol-index) canonical order the decoder's table builder uses.

#![allow(dead_code)]

use oxichm::chm::bytes;
use oxichm::lzx::{EXTRA_BITS, POSITION_BASE};

/// Uncompressed bytes per frame.
pub const FRAME: usize = 0x8000;
/// Directory chunk size used by the builder.
pub const CHUNK_SIZE: usize = 0x1000;
/// Frames between decoder resets for the builder's control data.
pub const RESET_INTERVAL: usize = 2;
/// Main tree symbols for the 64 KiB test window (256 literals + 32 slots * 8).
const MAIN_SYMS: usize = 512;

const PMGL_LEN: usize = 0x14;
const ITSP_LEN: usize = 0x54;
const ITSF_LEN: usize = 0x60;

pub const CONTROL_NAME: &str = "::DataSpace/Storage/MSCompressed/ControlData";
pub const RESET_NAME: &str = "::DataSpace/Storage/MSCompressed/Transform/\
                              {7FC28940-9D31-11D0-9B27-00A0C91E9C7C}/InstanceData/ResetTable";
pub const CONTENT_NAME: &str = "::DataSpace/Storage/MSCompressed/Content";

// ---------------------------------------------------------------------------
// Bit writer (16-bit little-endian words, MSB-first)
// ---------------------------------------------------------------------------

pub struct BitWriter {
    out: Vec<u8>,
    cur: u32,
    nbits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            cur: 0,
            nbits: 0,
        }
    }

    pub fn write_bits(&mut self, val: u32, n: u32) {
        for k in (0..n).rev() {
            self.cur = (self.cur << 1) | ((val >> k) & 1);
            self.nbits += 1;
            if self.nbits == 16 {
                self.out.extend_from_slice(&(self.cur as u16).to_le_bytes());
                self.cur = 0;
                self.nbits = 0;
            }
        }
    }

    /// Zero-pad the current word and flush it. No-op when word-aligned.
    pub fn flush_word(&mut self) {
        if self.nbits > 0 {
            let w = (self.cur << (16 - self.nbits)) as u16;
            self.out.extend_from_slice(&w.to_le_bytes());
            self.cur = 0;
            self.nbits = 0;
        }
    }

    /// Alignment before raw bytes: the decoder discards the rest of the
    /// current word, or a whole word when already aligned.
    pub fn align_for_raw(&mut self) {
        if self.nbits > 0 {
            self.flush_word();
        } else {
            self.out.extend_from_slice(&0u16.to_le_bytes());
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(self.nbits, 0, "raw bytes must be word-aligned");
        self.out.extend_from_slice(bytes);
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush_word();
        self.out
    }
}

/// Canonical code per symbol, matching the decoder's table construction.
pub fn canonical_codes(lens: &[u8]) -> Vec<(u32, u32)> {
    let mut codes = vec![(0u32, 0u32); lens.len()];
    let mut next = 0u32;
    for bit_num in 1..=16u32 {
        for (sym, &len) in lens.iter().enumerate() {
            if u32::from(len) == bit_num {
                codes[sym] = (next, bit_num);
                next += 1;
            }
        }
        next <<= 1;
    }
    codes
}

// ---------------------------------------------------------------------------
// LZX frame encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Op {
    Literals(Vec<u8>),
    /// Explicit match: `offset` back into history, `len` in 2..=8.
    Match { offset: u32, len: u32 },
    /// Repeat the most recent explicit offset (the R0 slot).
    RepeatMatch { len: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Verbatim,
    Aligned,
    Raw,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub ops: Vec<Op>,
}

impl Frame {
    pub fn verbatim(ops: Vec<Op>) -> Self {
        Frame {
            kind: FrameKind::Verbatim,
            ops,
        }
    }

    pub fn aligned(ops: Vec<Op>) -> Self {
        Frame {
            kind: FrameKind::Aligned,
            ops,
        }
    }

    pub fn raw(data: Vec<u8>) -> Self {
        Frame {
            kind: FrameKind::Raw,
            ops: vec![Op::Literals(data)],
        }
    }

    pub fn output_len(&self) -> usize {
        self.ops.iter().map(op_output_len).sum()
    }
}

pub fn op_output_len(op: &Op) -> usize {
    match op {
        Op::Literals(data) => data.len(),
        Op::Match { len, .. } | Op::RepeatMatch { len } => *len as usize,
    }
}

/// The bytes a correct decoder must produce for these frames.
pub fn expected_output(frames: &[Frame]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut last_offset = 1usize;
    for frame in frames {
        for op in &frame.ops {
            match op {
                Op::Literals(data) => out.extend_from_slice(data),
                Op::Match { offset, len } => {
                    last_offset = *offset as usize;
                    copy_back(&mut out, last_offset, *len as usize);
                }
                Op::RepeatMatch { len } => copy_back(&mut out, last_offset, *len as usize),
            }
        }
    }
    out
}

fn copy_back(out: &mut Vec<u8>, offset: usize, len: usize) {
    for _ in 0..len {
        let b = out[out.len() - offset];
        out.push(b);
    }
}

fn match_symbol(offset: u32, len: u32) -> (usize, usize) {
    assert!(
        (2..=8).contains(&len),
        "match length {len} would need the length tree"
    );
    let formatted = offset + 2;
    let slot = POSITION_BASE
        .iter()
        .rposition(|&base| base <= formatted)
        .unwrap();
    assert!(slot < 32, "offset {offset} outside the 64 KiB test window");
    (slot, 256 + (slot << 3) + (len as usize - 2))
}

/// Main tree lengths: 256 literals plus the match symbols the ops need,
/// forming an exactly complete code.
fn main_lens_for(ops: &[Op]) -> Vec<u8> {
    let mut match_syms: Vec<usize> = ops
        .iter()
        .filter_map(|op| match op {
            Op::Match { offset, len } => Some(match_symbol(*offset, *len).1),
            Op::RepeatMatch { len } => {
                assert!((2..=8).contains(len));
                Some(256 + (*len as usize - 2))
            }
            Op::Literals(_) => None,
        })
        .collect();
    match_syms.sort_unstable();
    match_syms.dedup();

    let mut lens = vec![0u8; MAIN_SYMS];
    if match_syms.is_empty() {
        lens[..256].fill(8);
    } else {
        lens[..256].fill(9);
        let match_lens: &[u8] = match match_syms.len() {
            1 => &[1],
            2 => &[2, 2],
            3 => &[2, 3, 3],
            4 => &[3, 3, 3, 3],
            n => panic!("test encoder supports at most 4 match symbols, got {n}"),
        };
        for (&sym, &len) in match_syms.iter().zip(match_lens) {
            lens[sym] = len;
        }
    }
    lens
}

/// Write `new` path lengths as pretree-coded deltas against `old`.
///
/// Fixed complete pretree: symbols 0..=15 at 5 bits, 16..=19 at 3 bits; no
/// run codes, one delta symbol per position.
fn encode_lens(w: &mut BitWriter, old: &[u8], new: &[u8]) {
    assert_eq!(old.len(), new.len());
    let mut pre_lens = [5u8; 20];
    for len in pre_lens.iter_mut().skip(16) {
        *len = 3;
    }
    let pre_codes = canonical_codes(&pre_lens);

    for &len in &pre_lens {
        w.write_bits(u32::from(len), 4);
    }
    for (&o, &n) in old.iter().zip(new) {
        let delta = (u32::from(o) + 17 - u32::from(n)) % 17;
        let (code, bits) = pre_codes[delta as usize];
        w.write_bits(code, bits);
    }
}

fn encode_frame(
    frame: &Frame,
    first_in_span: bool,
    intel_file_size: Option<u32>,
    old_main: &mut [u8],
    old_len: &mut [u8],
) -> Vec<u8> {
    let mut w = BitWriter::new();
    if first_in_span {
        match intel_file_size {
            Some(size) => {
                w.write_bits(1, 1);
                w.write_bits(size >> 16, 16);
                w.write_bits(size & 0xFFFF, 16);
            }
            None => w.write_bits(0, 1),
        }
    }

    let out_len = frame.output_len();
    assert!(out_len > 0 && out_len <= FRAME, "bad frame length {out_len}");

    match frame.kind {
        FrameKind::Raw => {
            assert_eq!(frame.ops.len(), 1, "raw frames take a single literal op");
            let Op::Literals(data) = &frame.ops[0] else {
                panic!("raw frames take literal bytes");
            };
            w.write_bits(3, 3);
            w.write_bits((out_len >> 8) as u32, 16);
            w.write_bits((out_len & 0xFF) as u32, 8);
            w.align_for_raw();
            for _ in 0..3 {
                w.write_bytes(&1u32.to_le_bytes());
            }
            w.write_bytes(data);
            if out_len & 1 == 1 {
                w.write_bytes(&[0]);
            }
        }
        FrameKind::Verbatim | FrameKind::Aligned => {
            let aligned = frame.kind == FrameKind::Aligned;
            w.write_bits(if aligned { 2 } else { 1 }, 3);
            w.write_bits((out_len >> 8) as u32, 16);
            w.write_bits((out_len & 0xFF) as u32, 8);

            if aligned {
                // Uniform aligned tree: every code is its own 3-bit symbol.
                for _ in 0..8 {
                    w.write_bits(3, 3);
                }
            }

            let new_main = main_lens_for(&frame.ops);
            encode_lens(&mut w, &old_main[..256], &new_main[..256]);
            encode_lens(&mut w, &old_main[256..], &new_main[256..]);
            let new_len = vec![0u8; 249];
            encode_lens(&mut w, old_len, &new_len);
            old_main.copy_from_slice(&new_main);
            old_len.copy_from_slice(&new_len);

            let codes = canonical_codes(&new_main);
            let put = |w: &mut BitWriter, sym: usize| {
                let (code, bits) = codes[sym];
                assert!(bits > 0, "symbol {sym} has no code");
                w.write_bits(code, bits);
            };

            for op in &frame.ops {
                match op {
                    Op::Literals(data) => {
                        for &b in data {
                            put(&mut w, usize::from(b));
                        }
                    }
                    Op::Match { offset, len } => {
                        let (slot, sym) = match_symbol(*offset, *len);
                        put(&mut w, sym);
                        let rem = (offset + 2) - POSITION_BASE[slot];
                        let extra = u32::from(EXTRA_BITS[slot]);
                        if aligned && extra >= 3 {
                            if extra > 3 {
                                w.write_bits(rem >> 3, extra - 3);
                            }
                            w.write_bits(rem & 7, 3);
                        } else {
                            w.write_bits(rem, extra);
                        }
                    }
                    Op::RepeatMatch { len } => {
                        put(&mut w, 256 + (*len as usize - 2));
                    }
                }
            }
        }
    }

    w.finish()
}

/// Encode one reset span (the decoder resets before its first frame) into
/// per-frame compressed segments.
pub fn encode_span(frames: &[Frame]) -> Vec<Vec<u8>> {
    encode_span_with_intel(frames, None)
}

pub fn encode_span_with_intel(frames: &[Frame], intel_file_size: Option<u32>) -> Vec<Vec<u8>> {
    let mut old_main = vec![0u8; MAIN_SYMS];
    let mut old_len = vec![0u8; 249];
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            encode_frame(frame, i == 0, intel_file_size, &mut old_main, &mut old_len)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Container builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ContentSpec {
    /// Reset spans: every span except the last must hold exactly
    /// `RESET_INTERVAL` frames; non-final frames must fill a whole frame.
    pub spans: Vec<Vec<Frame>>,
    pub intel_file_size: Option<u32>,
}

#[derive(Default)]
pub struct ChmSpec {
    /// Section-0 user entries: name and raw content.
    pub uncompressed: Vec<(String, Vec<u8>)>,
    /// Compressed entries: name, offset and length in the content stream.
    pub compressed: Vec<(String, u64, u64)>,
    pub content: Option<ContentSpec>,
    /// Corrupt the control-data entry length so it overruns the container.
    pub corrupt_control_len: bool,
}

/// Assemble a complete single-chunk CHM container.
pub fn build_chm(spec: &ChmSpec) -> Vec<u8> {
    // Encode the content stream.
    let mut segments: Vec<Vec<u8>> = Vec::new();
    let mut uncompressed_len = 0u64;
    if let Some(content) = &spec.content {
        for (i, span) in content.spans.iter().enumerate() {
            if i + 1 < content.spans.len() {
                assert_eq!(
                    span.len(),
                    RESET_INTERVAL,
                    "non-final spans must match the reset interval"
                );
            } else {
                assert!(span.len() <= RESET_INTERVAL);
            }
            for (j, frame) in span.iter().enumerate() {
                let is_last = i + 1 == content.spans.len() && j + 1 == span.len();
                if !is_last {
                    assert_eq!(frame.output_len(), FRAME, "non-final frames must be full");
                }
                uncompressed_len += frame.output_len() as u64;
            }
            segments.extend(encode_span_with_intel(span, content.intel_file_size));
        }
    }

    // Data region and directory entries, in on-disk order.
    let mut data_region: Vec<u8> = Vec::new();
    let mut entries: Vec<(String, u64, u64, u64)> = Vec::new();

    for (name, content) in &spec.uncompressed {
        entries.push((
            name.clone(),
            0,
            data_region.len() as u64,
            content.len() as u64,
        ));
        data_region.extend_from_slice(content);
    }

    if spec.content.is_some() {
        // Control data.
        let control_offset = data_region.len() as u64;
        data_region.extend_from_slice(&6u32.to_le_bytes());
        data_region.extend_from_slice(b"LZXC");
        data_region.extend_from_slice(&2u32.to_le_bytes()); // version
        data_region.extend_from_slice(&2u32.to_le_bytes()); // reset interval (0x8000 units)
        data_region.extend_from_slice(&2u32.to_le_bytes()); // window size (0x8000 units)
        data_region.extend_from_slice(&1u32.to_le_bytes()); // windows per reset
        let control_len = if spec.corrupt_control_len {
            0xF_FFFF
        } else {
            0x18
        };
        entries.push((CONTROL_NAME.to_string(), 0, control_offset, control_len));

        // Reset table.
        let compressed_len: u64 = segments.iter().map(|s| s.len() as u64).sum();
        let reset_offset = data_region.len() as u64;
        let mut table = Vec::new();
        table.extend_from_slice(&2u32.to_le_bytes());
        table.extend_from_slice(&(segments.len() as u32).to_le_bytes());
        table.extend_from_slice(&8u32.to_le_bytes());
        table.extend_from_slice(&0x28u32.to_le_bytes());
        table.extend_from_slice(&uncompressed_len.to_le_bytes());
        table.extend_from_slice(&compressed_len.to_le_bytes());
        table.extend_from_slice(&(FRAME as u64).to_le_bytes());
        let mut addr = 0u64;
        for seg in &segments {
            table.extend_from_slice(&addr.to_le_bytes());
            addr += seg.len() as u64;
        }
        entries.push((
            RESET_NAME.to_string(),
            0,
            reset_offset,
            table.len() as u64,
        ));
        data_region.extend_from_slice(&table);

        // Content stream.
        let content_offset = data_region.len() as u64;
        for seg in &segments {
            data_region.extend_from_slice(seg);
        }
        entries.push((CONTENT_NAME.to_string(), 0, content_offset, compressed_len));
    }

    for (name, offset, length) in &spec.compressed {
        entries.push((name.clone(), 1, *offset, *length));
    }

    // Directory chunk.
    let mut body = Vec::new();
    for (name, section, offset, length) in &entries {
        bytes::write_encint(&mut body, name.len() as u64);
        body.extend_from_slice(name.as_bytes());
        bytes::write_encint(&mut body, *section);
        bytes::write_encint(&mut body, *offset);
        bytes::write_encint(&mut body, *length);
    }
    assert!(
        body.len() <= CHUNK_SIZE - PMGL_LEN,
        "directory body of {} bytes needs more than one chunk",
        body.len()
    );

    let mut chunk = Vec::with_capacity(CHUNK_SIZE);
    chunk.extend_from_slice(b"PMGL");
    chunk.extend_from_slice(&((CHUNK_SIZE - PMGL_LEN - body.len()) as u32).to_le_bytes());
    chunk.extend_from_slice(&0u32.to_le_bytes());
    chunk.extend_from_slice(&(-1i32).to_le_bytes());
    chunk.extend_from_slice(&(-1i32).to_le_bytes());
    chunk.extend_from_slice(&body);
    chunk.resize(CHUNK_SIZE, 0);

    // Headers.
    let dir_len = (ITSP_LEN + CHUNK_SIZE) as u64;
    let data_offset = ITSF_LEN as u64 + dir_len;

    let mut out = Vec::new();
    out.extend_from_slice(b"ITSF");
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&(ITSF_LEN as u32).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
    out.extend_from_slice(&0x0409u32.to_le_bytes());
    out.resize(0x38, 0); // GUIDs
    out.extend_from_slice(&0u64.to_le_bytes()); // section 0 offset
    out.extend_from_slice(&0u64.to_le_bytes()); // section 0 length
    out.extend_from_slice(&(ITSF_LEN as u64).to_le_bytes()); // dir offset
    out.extend_from_slice(&dir_len.to_le_bytes());
    out.extend_from_slice(&data_offset.to_le_bytes());
    assert_eq!(out.len(), ITSF_LEN);

    out.extend_from_slice(b"ITSP");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(ITSP_LEN as u32).to_le_bytes());
    out.extend_from_slice(&0x0Au32.to_le_bytes());
    out.extend_from_slice(&(CHUNK_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes()); // quickref density
    out.extend_from_slice(&1u32.to_le_bytes()); // index depth
    out.extend_from_slice(&(-1i32).to_le_bytes()); // index root
    out.extend_from_slice(&0u32.to_le_bytes()); // first chunk
    out.extend_from_slice(&0u32.to_le_bytes()); // last chunk
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // chunk count
    out.extend_from_slice(&0x0409u32.to_le_bytes());
    out.resize(ITSF_LEN + ITSP_LEN, 0);

    out.extend_from_slice(&chunk);
    assert_eq!(out.len() as u64, data_offset);
    out.extend_from_slice(&data_region);
    out
}

/// A content stream of literal-only frames covering `data`, split into spans
/// of `RESET_INTERVAL` full frames.
pub fn literal_content(data: &[u8]) -> ContentSpec {
    let frames: Vec<Frame> = data
        .chunks(FRAME)
        .map(|chunk| Frame::verbatim(vec![Op::Literals(chunk.to_vec())]))
        .collect();
    let spans = frames
        .chunks(RESET_INTERVAL)
        .map(<[Frame]>::to_vec)
        .collect();
    ContentSpec {
        spans,
        intel_file_size: None,
    }
}
