//! Buffer sizing constants and memory budgets for the STM32F407 target.
//!
//! Every tunable the player carries lives here so the budget arithmetic is
//! checked in one place, at compile time.

// ── Storage constants ────────────────────────────────────────────────────────

/// SD / FAT32 sector size in bytes. The mount path rejects volumes that
/// report anything else.
pub const BLOCK_SIZE: usize = 512;

/// Upper bound on a single contiguous multi-block read, in blocks.
///
/// 16 blocks = 8 KiB ≈ a few milliseconds on a 10 MHz SPI bus. The foreground
/// cannot refill audio while a block read is in flight, so this cap keeps any
/// single storage call far below the 64 ms audio half-period.
pub const MAX_MULTIBLOCK: usize = 16;

/// The media file looked up in the volume root. 8.3, no path.
pub const MEDIA_FILENAME: &str = "BADAPPLE.BIN";

// ── Audio constants ──────────────────────────────────────────────────────────

/// Stereo samples per audio half-buffer (the DMA ping-pong granule).
///
/// At 32 kHz one half is 64 ms of audio; the foreground must complete a
/// refill well inside that window.
pub const AUDIO_HALF_SAMPLES: usize = 2048;

/// Full circular buffer length per DAC channel, in samples.
pub const AUDIO_RING_SAMPLES: usize = AUDIO_HALF_SAMPLES * 2;

/// 12-bit DAC midpoint — 0 V relative to mid-rail, written during silence.
pub const DAC_SILENCE: u16 = 0x800;

/// Default sample clock when the media header is not yet known.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 32_000;

// ── Video constants ──────────────────────────────────────────────────────────

/// Display width in pixels (SSD1306).
pub const DISPLAY_WIDTH: u32 = 128;

/// Display height in pixels.
pub const DISPLAY_HEIGHT: u32 = 64;

/// An 8-pixel-tall SSD1306 page; the display has `DISPLAY_HEIGHT / 8` of them.
pub const DISPLAY_PAGES: usize = (DISPLAY_HEIGHT as usize) / 8;

/// One raw video frame: 8 pages × 128 column bytes.
pub const FRAME_BYTES: usize = DISPLAY_PAGES * DISPLAY_WIDTH as usize;

/// Fixed video rate of the media container.
pub const VIDEO_FPS: u32 = 30;

// Frames are block-granular on disk: exactly two SD blocks each.
const _: () = assert!(FRAME_BYTES == 1024, "SSD1306 128x64 frame must pack to 1024 bytes");
const _: () = assert!(FRAME_BYTES % BLOCK_SIZE == 0);

// ── SD timeout budgets (microseconds) ────────────────────────────────────────

/// Budget for a command response (R1) after the command frame.
pub const SD_CMD_TIMEOUT_US: u32 = 100_000;

/// Budget for the card to release the bus (0xFF) before a new command.
pub const SD_READY_TIMEOUT_US: u32 = 500_000;

/// Budget for the 0xFE data token preceding a block.
pub const SD_DATA_TIMEOUT_US: u32 = 250_000;

// ── Memory budget (STM32F407: 112 KiB SRAM1 + 16 KiB SRAM2, DMA-reachable) ───

/// Audio rings: two channels × 4096 samples × 2 bytes.
pub const AUDIO_RING_BYTES: usize = 2 * AUDIO_RING_SAMPLES * 2;

/// Display framebuffers: three 1024-byte slots.
pub const FRAMEBUFFER_BYTES: usize = 3 * FRAME_BYTES;

/// Stereo PCM staging for one half-buffer refill: 2N × i16.
pub const PCM_SCRATCH_BYTES: usize = 2 * AUDIO_HALF_SAMPLES * 2;

/// Everything the steady state keeps resident in DMA-reachable SRAM.
pub const STATIC_BUFFER_BYTES: usize =
    AUDIO_RING_BYTES + FRAMEBUFFER_BYTES + PCM_SCRATCH_BYTES + BLOCK_SIZE;

// The player must leave most of SRAM1 to the stack and .bss. If this fires,
// shrink AUDIO_HALF_SAMPLES (each halving saves 8 KiB of ring + 4 KiB of
// staging).
const _: () = assert!(
    STATIC_BUFFER_BYTES <= 64 * 1024,
    "static player buffers exceed half of F407 SRAM1"
);

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn half_buffer_is_64ms_at_32khz() {
        let half_ms = AUDIO_HALF_SAMPLES as u32 * 1_000 / DEFAULT_SAMPLE_RATE_HZ;
        assert_eq!(half_ms, 64);
    }

    #[test]
    fn multiblock_cap_stays_under_one_half_period() {
        // 16 blocks at 10 MHz SPI ≈ 8192 bytes * 8 bits / 10 MHz ≈ 6.6 ms,
        // an order of magnitude below the 64 ms half period.
        let transfer_us = (MAX_MULTIBLOCK * BLOCK_SIZE * 8) as u32 / 10;
        assert!(transfer_us < 64_000 / 4);
    }

    #[test]
    fn budget_arithmetic_adds_up() {
        assert_eq!(AUDIO_RING_BYTES, 16 * 1024);
        assert_eq!(FRAMEBUFFER_BYTES, 3 * 1024);
        assert_eq!(PCM_SCRATCH_BYTES, 8 * 1024);
    }
}
