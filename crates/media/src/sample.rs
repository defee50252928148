//! PCM-to-DAC sample conversion.
//!
//! The DACs are 12-bit right-aligned with silence at the 0x800 midpoint.
//! A signed 16-bit sample at volume `v ∈ [0, 100]` maps as:
//!
//! ```text
//! scaled = (raw * v) / 100          // integer, truncating toward zero
//! out    = (scaled + 32768) >> 4    // signed 16-bit → unsigned 12-bit
//! ```
//!
//! | `raw`    | `v`  | `out`  |
//! |----------|------|--------|
//! | 0        | any  | 0x800  |
//! | 32767    | 100  | 0xFFF  |
//! | -32768   | 100  | 0x000  |
//!
//! The result is saturated into 0..=4095; with the volume clamp in place
//! the arithmetic already lands inside the range, so the clamp only guards
//! the extremes.

use platform::types::VolumePercent;

/// Convert one signed 16-bit PCM sample to a 12-bit DAC word.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // |raw * volume| <= 32768 * 100 fits i32; the shift result is clamped
pub fn pcm_to_dac(raw: i16, volume: VolumePercent) -> u16 {
    let scaled = i32::from(raw) * i32::from(volume.get()) / 100;
    let shifted = (scaled + 32_768) >> 4;
    shifted.clamp(0, 0xFFF) as u16
}
