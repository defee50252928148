//! Block-device seam between the storage stack and the SD hardware.
//!
//! The contract is fully synchronous: when a read returns, the buffer holds
//! the requested block(s). Implementations may use DMA internally but must
//! tolerate being called from the foreground while audio and display DMA are
//! active on other peripherals, and must never mask the audio interrupts for
//! anywhere near a half-buffer period per call.

use crate::layout::BLOCK_SIZE;

/// SD card generation, as probed during SPI bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardKind {
    /// SDSC v1 (byte addressed, no CMD8 support).
    V1,
    /// SDSC v2 (byte addressed).
    V2,
    /// SDHC/SDXC v2 (block addressed, CCS set in OCR).
    V2Hc,
}

/// Errors a block device can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockError {
    /// No card responded during bring-up or the card dropped off the bus.
    NoCard,
    /// A bounded wait (command response, ready, data token) expired.
    Timeout,
    /// The transfer itself failed (bus error, error token, CRC frame).
    Read,
    /// Caller error: misaligned length, zero blocks, out-of-range LBA.
    InvalidParam,
}

impl core::fmt::Display for BlockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCard => f.write_str("no card present"),
            Self::Timeout => f.write_str("card timeout"),
            Self::Read => f.write_str("block read failed"),
            Self::InvalidParam => f.write_str("invalid block request"),
        }
    }
}

/// Synchronous 512-byte-block reads by logical block address.
pub trait BlockDevice {
    /// Read one 512-byte block at `lba`.
    fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError>;

    /// Read `buf.len() / 512` contiguous blocks starting at `lba`.
    ///
    /// `buf.len()` must be a non-zero multiple of 512; implementations reject
    /// anything else with [`BlockError::InvalidParam`]. Callers additionally
    /// keep requests at or below [`crate::layout::MAX_MULTIBLOCK`] blocks so
    /// the foreground is never blocked for long.
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), BlockError>;
}
