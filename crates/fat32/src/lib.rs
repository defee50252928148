//! Minimal read-only FAT32 reader.
//!
//! Exactly what a media player booting off an SD card needs and nothing
//! more: mount a FAT32 volume (behind an MBR partition or super-floppy),
//! look up an 8.3 name in the root directory, and walk cluster chains.
//! No writes, no long filenames, no subdirectories.
//!
//! The volume owns a single 512-byte scratch sector, exclusive to the
//! foreground; every unaligned or metadata read lands there.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod name;
mod volume;

pub use name::ShortName;
pub use volume::{FileInfo, Volume};

use platform::block::BlockError;

/// Errors the FAT32 reader can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A block-device read failed underneath the reader.
    #[error("storage read failed: {0}")]
    Read(BlockError),
    /// The volume failed validation (signature, BPB sanity, chain bounds).
    #[error("not a usable FAT32 volume")]
    Invalid,
    /// The requested name is not in the root directory.
    #[error("file not found")]
    NotFound,
    /// Caller error: out-of-domain cluster or offset.
    #[error("invalid parameter")]
    InvalidParam,
}

impl From<BlockError> for Error {
    fn from(e: BlockError) -> Self {
        Self::Read(e)
    }
}
