//! Oxichm: CHM (Compiled HTML Help) container reading and LZX decompression.
//!
//! The crate provides:
//! - ITSF/ITSP container and directory parsing (`chm`)
//! - A from-scratch LZX frame decompressor (`lzx`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use oxichm::ChmExtractor;
//!
//! let file = std::fs::File::open("manual.chm").unwrap();
//! let mut chm = ChmExtractor::open(file).unwrap();
//!
//! for name in chm.enumerate() {
//!     println!("{name}");
//! }
//! let entry = chm.find_entry("/index.html").cloned().unwrap();
//! let html = chm.extract(&entry).unwrap();
//! assert!(!html.is_empty());
//! ```

pub mod chm;
pub mod error;
pub mod io;
pub mod lzx;

#[cfg(feature = "cli")]
pub mod cli;

pub use chm::directory::{DirectoryEntry, EntryKind};
pub use chm::extractor::ChmExtractor;
pub use error::{ChmError, Result};
