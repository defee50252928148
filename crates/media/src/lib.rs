//! Media container reader.
//!
//! A media file is a 20-byte header, `frame_count` raw 1024-byte SSD1306
//! frames, then interleaved stereo 16-bit PCM. This crate maps logical byte
//! offsets onto FAT32 clusters — with an aligned multi-block fast path when
//! the file turns out to be one contiguous extent — and converts PCM into
//! the 12-bit DAC samples the audio pipeline streams out.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod file;
mod header;
pub mod sample;

pub use file::MediaFile;
pub use header::MediaHeader;

use platform::block::BlockError;

/// Errors the media reader can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A storage read failed. The audio/video paths degrade to silence or a
    /// blank frame on this; it is never fatal mid-playback.
    #[error("storage read failed")]
    Read,
    /// The 20-byte header failed validation or disagrees with the file size.
    #[error("malformed media header")]
    BadHeader,
    /// The cluster chain ran past the size-derived safety bound.
    #[error("cluster chain exceeds file bound")]
    CorruptChain,
    /// The file is not in the volume root.
    #[error("media file not found")]
    NotFound,
    /// Caller error: frame index or buffer shape out of domain.
    #[error("invalid parameter")]
    InvalidParam,
}

impl From<fat32::Error> for Error {
    fn from(e: fat32::Error) -> Self {
        match e {
            fat32::Error::NotFound => Self::NotFound,
            fat32::Error::InvalidParam => Self::InvalidParam,
            // Validation failures under a mounted volume mean the metadata
            // we are reading through went bad — same degradation as a read.
            fat32::Error::Read(_) | fat32::Error::Invalid => Self::Read,
        }
    }
}

impl From<BlockError> for Error {
    fn from(_: BlockError) -> Self {
        Self::Read
    }
}
