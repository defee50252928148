//! The 20-byte media header.

use platform::layout::{FRAME_BYTES, VIDEO_FPS};
use platform::types::SampleRateHz;

use crate::Error;

/// Parsed media header: five consecutive little-endian `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaHeader {
    /// Number of 1024-byte video frames.
    pub frame_count: u32,
    /// Audio payload size in bytes.
    pub audio_size: u32,
    /// PCM sample rate.
    pub sample_rate: SampleRateHz,
    /// Channel count (always 2).
    pub channels: u32,
    /// Bits per PCM sample (always 16).
    pub bits_per_sample: u32,
}

impl MediaHeader {
    /// Header length on disk.
    pub const BYTES: usize = 20;

    /// Parse and validate the leading 20 bytes of the file.
    ///
    /// # Errors
    ///
    /// [`Error::BadHeader`] when the stream is not 16-bit stereo, the sample
    /// rate is outside the supported range, or the frame count would
    /// overflow the 32-bit offset arithmetic.
    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)] // word offsets are the five fixed header positions inside [u8; 20]
    pub fn parse(raw: &[u8; Self::BYTES]) -> Result<Self, Error> {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);

        let frame_count = word(0);
        let audio_size = word(4);
        let sample_rate = SampleRateHz::new(word(8)).map_err(|_| Error::BadHeader)?;
        let channels = word(12);
        let bits_per_sample = word(16);

        if channels != 2 || bits_per_sample != 16 {
            return Err(Error::BadHeader);
        }
        // audio_offset = 20 + frame_count * 1024 must stay in u32.
        if frame_count > (u32::MAX - Self::BYTES as u32) / FRAME_BYTES as u32 {
            return Err(Error::BadHeader);
        }

        Ok(Self {
            frame_count,
            audio_size,
            sample_rate,
            channels,
            bits_per_sample,
        })
    }

    /// Byte offset of the first video frame.
    #[must_use]
    pub fn video_offset(&self) -> u32 {
        Self::BYTES as u32
    }

    /// Byte offset of the first audio sample.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // frame_count passed the parse-time overflow bound
    pub fn audio_offset(&self) -> u32 {
        Self::BYTES as u32 + self.frame_count * FRAME_BYTES as u32
    }

    /// Stereo sample count (4 bytes per L,R pair).
    #[must_use]
    pub fn total_samples(&self) -> u32 {
        self.audio_size / 4
    }

    /// Whole seconds of video at the fixed frame rate (truncating).
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // VIDEO_FPS is a nonzero constant
    pub fn duration_secs(&self) -> u32 {
        self.frame_count / VIDEO_FPS
    }
}
