// Directory listing: the ordered entry table decoded from the PMGL chunk
// chain.
//
// Entry order is load-bearing: it is the on-disk enumeration order, callers
// rely on first-match semantics for duplicate names, and the control-data /
// reset-table / content entries are located by index during the walk.

use log::debug;

use crate::chm::bytes;
use crate::chm::header::{ChunkHeader, ItsfHeader, ItspHeader};
use crate::error::{ChmError, Result};

/// Name fragment of the LZXC control-data entry.
pub const CONTROL_DATA_NAME: &str = "ControlData";
/// Name fragment of the LZX reset-table entry.
pub const RESET_TABLE_NAME: &str = "ResetTable";
/// Full name of the compressed content stream entry.
pub const CONTENT_NAME: &str = "::DataSpace/Storage/MSCompressed/Content";

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Which content section an entry's bytes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Section 0: raw bytes at `data_offset + offset`.
    Uncompressed,
    /// The MSCompressed section: `offset` addresses the uncompressed stream.
    Compressed,
}

/// One directory listing entry.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Entry name, usually a `/`-rooted path.
    pub name: String,
    /// Offset within the entry's content section.
    pub offset: u64,
    /// Uncompressed length in bytes.
    pub length: u64,
    /// Content section the entry belongs to.
    pub kind: EntryKind,
}

impl DirectoryEntry {
    /// Whether a downstream HTML parser would consume this entry.
    pub fn is_html(&self) -> bool {
        let lower = self.name.to_ascii_lowercase();
        lower.ends_with(".html") || lower.ends_with(".htm")
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// The full directory listing in on-disk order, plus the indices of the three
/// entries the decompressor needs.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    entries: Vec<DirectoryEntry>,
    control_data: Option<usize>,
    reset_table: Option<usize>,
    content: Option<usize>,
}

impl DirectoryListing {
    /// Walk the PMGL chain and decode every listing entry.
    pub fn parse(data: &[u8], itsf: &ItsfHeader, itsp: &ItspHeader) -> Result<Self> {
        let mut listing = DirectoryListing {
            entries: Vec::new(),
            control_data: None,
            reset_table: None,
            content: None,
        };

        let chunk_size = itsp.chunk_size as usize;
        let chunks_base = itsf
            .dir_offset
            .checked_add(itsp.header_len as u64)
            .ok_or_else(|| ChmError::Parse("directory offset overflows".into()))?;

        // A chain can visit each declared chunk at most once; the container
        // size bounds the declaration itself.
        let max_chunks = (itsp.num_chunks as usize).min(data.len() / chunk_size + 1);

        let mut chunk_index = itsp.first_chunk as i64;
        let mut visited: usize = 0;
        while chunk_index >= 0 {
            if visited >= max_chunks {
                return Err(ChmError::Parse(format!(
                    "directory chunk chain longer than {} declared chunks",
                    itsp.num_chunks
                )));
            }
            visited += 1;

            let start = chunks_base as usize + chunk_index as usize * chunk_size;
            let end = start
                .checked_add(chunk_size)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| {
                    ChmError::Parse(format!("directory chunk {chunk_index} outside the container"))
                })?;
            let chunk = &data[start..end];

            let header = ChunkHeader::parse(chunk)?;
            match header {
                ChunkHeader::Pmgi { .. } => {
                    // Index chunks carry no listing entries and no chain link.
                    break;
                }
                ChunkHeader::Pmgl {
                    free_space,
                    block_next,
                    ..
                } => {
                    listing.parse_chunk(chunk, header.header_len(), free_space)?;
                    chunk_index = block_next as i64;
                }
            }
        }

        debug!(
            "directory listing: {} entries in {} chunk(s)",
            listing.entries.len(),
            visited
        );
        Ok(listing)
    }

    /// Decode the entries of one PMGL chunk, appending in on-disk order.
    fn parse_chunk(&mut self, chunk: &[u8], header_len: usize, free_space: u32) -> Result<()> {
        let payload_end = chunk
            .len()
            .checked_sub(free_space as usize)
            .filter(|&end| end >= header_len)
            .ok_or_else(|| {
                ChmError::Parse(format!(
                    "quickref area of {free_space} bytes overruns its chunk"
                ))
            })?;

        let mut pos = header_len;
        while pos < payload_end {
            let (name_len, used) = bytes::read_encint(chunk, pos)?;
            pos += used;
            let name_end = pos
                .checked_add(name_len as usize)
                .filter(|&end| end <= payload_end)
                .ok_or_else(|| {
                    ChmError::Parse(format!("entry name of {name_len} bytes overruns its chunk"))
                })?;
            let name = String::from_utf8_lossy(&chunk[pos..name_end]).into_owned();
            pos = name_end;

            let (section, used) = bytes::read_encint(chunk, pos)?;
            pos += used;
            let (offset, used) = bytes::read_encint(chunk, pos)?;
            pos += used;
            let (length, used) = bytes::read_encint(chunk, pos)?;
            pos += used;
            if pos > payload_end {
                return Err(ChmError::Parse(
                    "entry record overruns its chunk".to_string(),
                ));
            }

            let kind = if section == 0 {
                EntryKind::Uncompressed
            } else {
                EntryKind::Compressed
            };

            // First match wins for the special entries.
            let index = self.entries.len();
            if self.control_data.is_none() && name.contains(CONTROL_DATA_NAME) {
                self.control_data = Some(index);
            }
            if self.reset_table.is_none() && name.contains(RESET_TABLE_NAME) {
                self.reset_table = Some(index);
            }
            if self.content.is_none() && name == CONTENT_NAME {
                self.content = Some(index);
            }

            self.entries.push(DirectoryEntry {
                name,
                offset,
                length,
                kind,
            });
        }

        Ok(())
    }

    /// All entries in on-disk enumeration order.
    #[inline]
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Index of the control-data entry, if present.
    #[inline]
    pub fn control_data_index(&self) -> Option<usize> {
        self.control_data
    }

    /// Index of the reset-table entry, if present.
    #[inline]
    pub fn reset_table_index(&self) -> Option<usize> {
        self.reset_table
    }

    /// Index of the compressed content stream entry, if present.
    #[inline]
    pub fn content_index(&self) -> Option<usize> {
        self.content
    }

    /// First entry with the given name, in on-disk order.
    pub fn find(&self, name: &str) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
