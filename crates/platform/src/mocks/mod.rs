//! Mock implementations of the platform seams for host tests.
//!
//! Everything here is deterministic and allocation-free so the real-time
//! crates can exercise their ISR/foreground interleavings without hardware.

#![cfg(any(test, feature = "std"))]
// Host test tooling: panics on a bad image are the desired failure mode.
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use core::convert::Infallible;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::block::{BlockDevice, BlockError};
use crate::display::FrameTransport;
use crate::layout::{BLOCK_SIZE, FRAME_BYTES};
use crate::time::Micros;

// ── MockBlockDevice ──────────────────────────────────────────────────────────

/// Block device over a borrowed in-memory image, with fault injection and
/// per-call accounting (used to verify the multi-block fast path).
pub struct MockBlockDevice<'a> {
    image: &'a [u8],
    /// Total `read_block` calls.
    pub single_reads: u32,
    /// Total `read_blocks` calls.
    pub multi_reads: u32,
    /// Block count of every `read_blocks` call, in order.
    pub multi_sizes: heapless::Vec<usize, 32>,
    /// Every read fails once this many calls have completed.
    pub fail_after: Option<u32>,
}

impl<'a> MockBlockDevice<'a> {
    /// Wrap a raw volume image. Length must be a multiple of 512.
    pub fn new(image: &'a [u8]) -> Self {
        assert_eq!(image.len() % BLOCK_SIZE, 0, "image must be whole blocks");
        Self {
            image,
            single_reads: 0,
            multi_reads: 0,
            multi_sizes: heapless::Vec::new(),
            fail_after: None,
        }
    }

    /// Total calls of either kind so far.
    pub fn total_reads(&self) -> u32 {
        self.single_reads + self.multi_reads
    }

    fn check_fault(&self) -> Result<(), BlockError> {
        match self.fail_after {
            Some(n) if self.total_reads() >= n => Err(BlockError::Read),
            _ => Ok(()),
        }
    }

    fn copy_out(&self, lba: u32, buf: &mut [u8]) -> Result<(), BlockError> {
        let start = lba as usize * BLOCK_SIZE;
        let end = start + buf.len();
        let src = self.image.get(start..end).ok_or(BlockError::Read)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl BlockDevice for MockBlockDevice<'_> {
    fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        self.check_fault()?;
        self.single_reads += 1;
        self.copy_out(lba, buf)
    }

    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(BlockError::InvalidParam);
        }
        self.check_fault()?;
        self.multi_reads += 1;
        let _ = self.multi_sizes.push(buf.len() / BLOCK_SIZE);
        self.copy_out(lba, buf)
    }
}

// ── ManualClock ──────────────────────────────────────────────────────────────

/// Microsecond clock advanced explicitly by the test.
#[derive(Default)]
pub struct ManualClock(AtomicU32);

impl ManualClock {
    /// New clock at t = 0.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Advance the clock by `us` microseconds.
    pub fn advance(&self, us: u32) {
        self.0.fetch_add(us, Ordering::Relaxed);
    }
}

impl Micros for ManualClock {
    fn now_us(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

// ── RecordingTransport ───────────────────────────────────────────────────────

/// Error type surfaced by [`RecordingTransport`] fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTransportError;

/// Frame transport that copies every transferred frame for inspection.
///
/// The completion ISR is the test's responsibility: pair every successful
/// `begin` with a `transfer_complete()` on the display pipeline's shared
/// half, exactly as the hardware DMA ISR would.
#[derive(Default)]
pub struct RecordingTransport {
    /// Every frame handed over, in transfer order (capacity-bounded).
    pub frames: heapless::Vec<[u8; FRAME_BYTES], 16>,
    /// Total successful `begin` calls (also counts frames past capacity).
    pub begun: u32,
    /// When set, `begin` fails without recording.
    pub fail: bool,
}

impl RecordingTransport {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameTransport for RecordingTransport {
    type Error = MockTransportError;

    fn begin(&mut self, frame: &[u8; FRAME_BYTES]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(MockTransportError);
        }
        self.begun += 1;
        let _ = self.frames.push(*frame);
        Ok(())
    }
}

// ── MockLed ──────────────────────────────────────────────────────────────────

/// Status LED double: records level and edge count.
#[derive(Default)]
pub struct MockLed {
    /// Current level (true = high).
    pub high: bool,
    /// Number of observed level changes.
    pub edges: u32,
}

impl MockLed {
    /// LED starting low.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, high: bool) {
        if self.high != high {
            self.edges += 1;
        }
        self.high = high;
    }
}

impl embedded_hal::digital::ErrorType for MockLed {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.set(true);
        Ok(())
    }
}
