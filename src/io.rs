// File-level helpers wrapping the extractor with buffered I/O.
//
// Provides `list_file()`, `extract_entry()` and `extract_all()` convenience
// functions for callers that work with paths rather than readers.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::warn;

use crate::ChmExtractor;
use crate::error::{ChmError, Result};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `extract_all()`.
#[derive(Debug, Clone, Default)]
pub struct ExtractStats {
    /// Directory entries in the container.
    pub entries: usize,
    /// Entries extracted successfully.
    pub extracted: usize,
    /// Entries that failed to extract (the rest are unaffected).
    pub failed: usize,
    /// Total bytes of extracted content.
    pub output_bytes: u64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open a CHM container from a path.
pub fn open_file(path: &Path) -> Result<ChmExtractor> {
    let file = File::open(path)?;
    ChmExtractor::open(BufReader::new(file))
}

/// Entry names of a container, in on-disk enumeration order.
pub fn list_file(path: &Path) -> Result<Vec<String>> {
    let chm = open_file(path)?;
    Ok(chm.enumerate().map(str::to_owned).collect())
}

/// Extract a single named entry from a container.
pub fn extract_entry(path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut chm = open_file(path)?;
    let entry = chm
        .find_entry(name)
        .cloned()
        .ok_or_else(|| ChmError::Parse(format!("no entry named '{name}'")))?;
    chm.extract(&entry)
}

/// Extract every entry of a container.
///
/// One corrupt entry does not stop the rest: failures are logged, counted in
/// the stats and omitted from the result.
pub fn extract_all(path: &Path) -> Result<(Vec<(String, Vec<u8>)>, ExtractStats)> {
    let mut chm = open_file(path)?;
    let entries = chm.entries().to_vec();

    let mut stats = ExtractStats {
        entries: entries.len(),
        ..ExtractStats::default()
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match chm.extract(&entry) {
            Ok(content) => {
                stats.extracted += 1;
                stats.output_bytes += content.len() as u64;
                out.push((entry.name, content));
            }
            Err(err) => {
                warn!("skipping '{}': {err}", entry.name);
                stats.failed += 1;
            }
        }
    }
    Ok((out, stats))
}
