// Extractor: the open pipeline and per-entry extraction.
//
// Open order: ITSF header -> ITSP header at the directory offset -> PMGL
// walk -> LZXC control data and reset table (when the container has a
// compressed section). Everything is parsed eagerly; `open` either returns a
// fully `Ready` extractor or an error, never a partially-initialized one —
// I/O errors included.
//
// Compressed extraction walks decompression frames sequentially, seeded from
// the closest cached frame snapshot at or after the preceding reset
// boundary. The cache is bounded by the reset table's frame count and
// cleared wholesale when it grows past it.

use std::io::Read;

use log::{debug, trace};

use crate::chm::bytes;
use crate::chm::control::{LZXC_MAGIC, LzxcControlData, LzxcResetTable};
use crate::chm::directory::{DirectoryEntry, DirectoryListing, EntryKind};
use crate::chm::header::{ItsfHeader, ItspHeader};
use crate::error::{ChmError, Result};
use crate::lzx::LzxState;

// ---------------------------------------------------------------------------
// Frame cache
// ---------------------------------------------------------------------------

/// One decoded frame plus the decoder state snapshot taken right after it.
struct CachedFrame {
    number: u32,
    content: Vec<u8>,
    state: LzxState,
}

/// Everything needed to decompress the MSCompressed section.
struct CompressedSection {
    control: LzxcControlData,
    reset_table: LzxcResetTable,
    /// Absolute offset of the compressed content stream in the container.
    content_offset: u64,
    cache: Vec<CachedFrame>,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// An opened CHM container.
///
/// Single-threaded by design: extraction mutates the frame cache, so
/// concurrent use needs either external synchronization or one extractor per
/// thread.
pub struct ChmExtractor {
    data: Vec<u8>,
    itsf: ItsfHeader,
    itsp: ItspHeader,
    listing: DirectoryListing,
    lzx: Option<CompressedSection>,
}

impl ChmExtractor {
    /// Read the whole stream into memory and open it as a CHM container.
    ///
    /// I/O errors fail the open; they are not swallowed.
    pub fn open<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    /// Open an in-memory CHM container.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let itsf = ItsfHeader::parse(&data)?;
        debug!(
            "ITSF v{}: directory at {:#X}+{:#X}, data at {:#X}",
            itsf.version, itsf.dir_offset, itsf.dir_len, itsf.data_offset
        );

        let dir_start = usize::try_from(itsf.dir_offset)
            .ok()
            .filter(|&s| s < data.len())
            .ok_or_else(|| ChmError::Parse("directory offset outside the container".into()))?;
        let itsp = ItspHeader::parse(&data[dir_start..])?;

        let listing = DirectoryListing::parse(&data, &itsf, &itsp)?;
        let lzx = Self::locate_compressed(&data, &itsf, &listing)?;

        Ok(Self {
            data,
            itsf,
            itsp,
            listing,
            lzx,
        })
    }

    fn locate_compressed(
        data: &[u8],
        itsf: &ItsfHeader,
        listing: &DirectoryListing,
    ) -> Result<Option<CompressedSection>> {
        let (Some(control_idx), Some(reset_idx), Some(content_idx)) = (
            listing.control_data_index(),
            listing.reset_table_index(),
            listing.content_index(),
        ) else {
            if listing
                .entries()
                .iter()
                .any(|e| e.kind == EntryKind::Compressed)
            {
                return Err(ChmError::Parse(
                    "compressed entries but no control data, reset table or content stream".into(),
                ));
            }
            return Ok(None);
        };

        let control_chunk = section_chunk(data, itsf.data_offset, &listing.entries()[control_idx])?;
        let sig_pos = bytes::find(control_chunk, &LZXC_MAGIC, 0)
            .filter(|&p| p >= 4)
            .ok_or_else(|| ChmError::Parse("control data carries no LZXC record".into()))?;
        let control = LzxcControlData::parse(&control_chunk[sig_pos - 4..])?;

        let reset_chunk = section_chunk(data, itsf.data_offset, &listing.entries()[reset_idx])?;
        let reset_table = LzxcResetTable::parse(reset_chunk)?;

        let content = &listing.entries()[content_idx];
        let content_offset = itsf
            .data_offset
            .checked_add(content.offset)
            .ok_or_else(|| ChmError::Parse("content stream offset overflows".into()))?;
        let content_end = content_offset
            .checked_add(content.length)
            .filter(|&e| e <= data.len() as u64)
            .ok_or_else(|| ChmError::Parse("content stream overruns the container".into()))?;
        if reset_table.compressed_len > content_end - content_offset {
            return Err(ChmError::Parse(
                "reset table longer than the content stream".into(),
            ));
        }

        debug!(
            "LZXC: window {:#X}, reset every {} frame(s), {} frame(s), {} -> {} bytes",
            control.window_size,
            control.reset_frame_interval,
            reset_table.block_count,
            reset_table.compressed_len,
            reset_table.uncompressed_len
        );
        Ok(Some(CompressedSection {
            control,
            reset_table,
            content_offset,
            cache: Vec::new(),
        }))
    }

    /// The ITSF file header.
    #[inline]
    pub fn itsf(&self) -> &ItsfHeader {
        &self.itsf
    }

    /// The ITSP directory header.
    #[inline]
    pub fn itsp(&self) -> &ItspHeader {
        &self.itsp
    }

    /// LZXC control data, when the container has a compressed section.
    pub fn control_data(&self) -> Option<&LzxcControlData> {
        self.lzx.as_ref().map(|s| &s.control)
    }

    /// LZX reset table, when the container has a compressed section.
    pub fn reset_table(&self) -> Option<&LzxcResetTable> {
        self.lzx.as_ref().map(|s| &s.reset_table)
    }

    /// All directory entries in on-disk enumeration order.
    #[inline]
    pub fn entries(&self) -> &[DirectoryEntry] {
        self.listing.entries()
    }

    /// Entry names in on-disk enumeration order. Restartable.
    pub fn enumerate(&self) -> impl Iterator<Item = &str> {
        self.listing.entries().iter().map(|e| e.name.as_str())
    }

    /// First entry with the given name.
    pub fn find_entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.listing.find(name)
    }

    /// Extract an entry's content.
    ///
    /// A decompression failure aborts only this call: the cache keeps no
    /// partially decoded frame, and other entries remain extractable.
    pub fn extract(&mut self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        if entry.length == 0 {
            return Ok(Vec::new());
        }
        match entry.kind {
            EntryKind::Uncompressed => {
                let start = self
                    .itsf
                    .data_offset
                    .checked_add(entry.offset)
                    .and_then(|s| usize::try_from(s).ok())
                    .ok_or(ChmError::Range {
                        start: entry.offset,
                        end: entry.offset.saturating_add(entry.length),
                        len: self.data.len(),
                    })?;
                let end = start
                    .checked_add(entry.length as usize)
                    .ok_or(ChmError::Range {
                        start: start as u64,
                        end: u64::MAX,
                        len: self.data.len(),
                    })?;
                bytes::copy_range(&self.data, start, end)
            }
            EntryKind::Compressed => self.extract_compressed(entry),
        }
    }

    fn extract_compressed(&mut self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let section = self.lzx.as_mut().ok_or_else(|| {
            ChmError::Parse("compressed entry without a compressed section".into())
        })?;

        let end_byte = entry
            .offset
            .checked_add(entry.length)
            .filter(|&e| e <= section.reset_table.uncompressed_len)
            .ok_or_else(|| {
                ChmError::Parse(format!("entry '{}' overruns the content stream", entry.name))
            })?;

        let frame_len = section.reset_table.frame_len;
        let start_frame = (entry.offset / frame_len) as u32;
        let mut end_frame = (end_byte / frame_len) as u32;
        let start_off = (entry.offset % frame_len) as usize;
        let mut end_off = (end_byte % frame_len) as usize;
        if end_off == 0 {
            // An entry ending exactly on a frame seam needs nothing from the
            // next frame.
            end_frame -= 1;
            end_off = frame_len as usize;
        }
        let interval = section.control.reset_frame_interval;
        let ini_frame = start_frame - start_frame % interval;

        trace!(
            "extract '{}': frames {start_frame}..={end_frame}, reset base {ini_frame}",
            entry.name
        );

        // Closest cached snapshot at or after the reset boundary.
        let mut seed: Option<usize> = None;
        for (i, frame) in section.cache.iter().enumerate() {
            if frame.number >= ini_frame
                && frame.number <= start_frame
                && seed.is_none_or(|s| frame.number > section.cache[s].number)
            {
                seed = Some(i);
            }
        }

        let mut out = Vec::with_capacity(entry.length as usize);
        let (mut state, mut frame_no) = match seed {
            Some(i) => {
                let frame = &section.cache[i];
                trace!("cache hit: frame {} seeds the walk", frame.number);
                slice_frame(
                    &mut out, &frame.content, frame.number, start_frame, end_frame, start_off,
                    end_off,
                );
                (frame.state.clone(), frame.number)
            }
            None => {
                let mut state = LzxState::new(section.control.window_size)?;
                let content = decode_frame(
                    &self.data,
                    section.content_offset,
                    &section.reset_table,
                    ini_frame,
                    &mut state,
                )?;
                slice_frame(
                    &mut out, &content, ini_frame, start_frame, end_frame, start_off, end_off,
                );
                section.cache.push(CachedFrame {
                    number: ini_frame,
                    content,
                    state: state.clone(),
                });
                (state, ini_frame)
            }
        };

        while frame_no < end_frame {
            frame_no += 1;
            if frame_no % interval == 0 {
                state.reset();
            }
            let content = decode_frame(
                &self.data,
                section.content_offset,
                &section.reset_table,
                frame_no,
                &mut state,
            )?;
            slice_frame(
                &mut out, &content, frame_no, start_frame, end_frame, start_off, end_off,
            );
            section.cache.push(CachedFrame {
                number: frame_no,
                content,
                state: state.clone(),
            });
        }

        if section.cache.len() > section.reset_table.block_count as usize {
            debug!("frame cache past {} frames, clearing", section.reset_table.block_count);
            section.cache.clear();
        }

        if out.len() as u64 != entry.length {
            return Err(ChmError::Decompression(format!(
                "entry '{}': extracted {} bytes, expected {}",
                entry.name,
                out.len(),
                entry.length
            )));
        }
        Ok(out)
    }
}

/// Resolve a section-0 entry to its raw bytes, as a `Parse` error on overrun
/// so a bad special entry fails the open rather than extraction.
fn section_chunk<'a>(data: &'a [u8], data_offset: u64, entry: &DirectoryEntry) -> Result<&'a [u8]> {
    let start = data_offset
        .checked_add(entry.offset)
        .and_then(|s| usize::try_from(s).ok());
    let end = start.and_then(|s| s.checked_add(entry.length as usize));
    match (start, end) {
        (Some(start), Some(end)) if end <= data.len() => Ok(&data[start..end]),
        _ => Err(ChmError::Parse(format!(
            "entry '{}' overruns the container",
            entry.name
        ))),
    }
}

/// Decode one frame from its reset-table segment.
fn decode_frame(
    data: &[u8],
    content_offset: u64,
    reset_table: &LzxcResetTable,
    number: u32,
    state: &mut LzxState,
) -> Result<Vec<u8>> {
    let (seg_start, seg_end) = reset_table.frame_span(number)?;
    let start = content_offset
        .checked_add(seg_start)
        .and_then(|s| usize::try_from(s).ok())
        .ok_or_else(|| ChmError::Parse(format!("frame {number} segment offset overflows")))?;
    let end = content_offset
        .checked_add(seg_end)
        .and_then(|e| usize::try_from(e).ok())
        .ok_or_else(|| ChmError::Parse(format!("frame {number} segment offset overflows")))?;
    let segment = bytes::slice_range(data, start, end)?;
    state.decompress_frame(segment, reset_table.frame_output_len(number))
}

/// Append the slice of `content` that belongs to the requested byte range.
fn slice_frame(
    out: &mut Vec<u8>,
    content: &[u8],
    number: u32,
    start_frame: u32,
    end_frame: u32,
    start_off: usize,
    end_off: usize,
) {
    if number < start_frame || number > end_frame {
        return;
    }
    let lo = if number == start_frame { start_off } else { 0 };
    let hi = if number == end_frame {
        end_off.min(content.len())
    } else {
        content.len()
    };
    if lo < hi {
        out.extend_from_slice(&content[lo..hi]);
    }
}
