//! minicine firmware — synchronized A/V playback on STM32F407.
//!
//! # Architecture
//!
//! ```text
//! main.rs (foreground loop, boot narration)
//!         ↓
//! playback::Player (refill / sync / render / transfer)
//!         ↓
//! media → fat32 → platform::sd (storage)        ui (status pages)
//!         ↓
//! board + isr (DAC·TIM6·DMA, I²C1 DMA, SPI2 SD) — feature "hardware"
//! ```
//!
//! The library half (`ui`, `dma`) compiles and tests on the host; everything
//! that touches a register sits behind the `hardware` feature.
//!
//! # Building
//!
//! ```bash
//! # Host tests
//! cargo test -p firmware
//! # Target binary
//! cargo build --release --target thumbv7em-none-eabihf -p firmware --features hardware
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod dma;
pub mod ui;

#[cfg(feature = "hardware")]
pub mod board;
#[cfg(feature = "hardware")]
pub mod fault;
#[cfg(feature = "hardware")]
pub mod isr;
