//! Triple-buffered display pipeline.
//!
//! Three 1024-byte framebuffers rotate through the roles
//! `{render, ready, transfer}`:
//!
//! * the foreground draws into *render* and queues it with
//!   [`FrameSet::swap_buffers`] (render ↔ ready);
//! * a transfer kick swaps ready ↔ transfer and hands the slot to the I²C
//!   DMA engine;
//! * the completion ISR releases the slot through [`DisplayShared`].
//!
//! Under back-pressure a newer rendered frame silently supersedes an unsent
//! ready frame — the in-flight transfer slot is never touched. Both swaps
//! run inside a critical section so the role indices always remain a
//! permutation of `{0, 1, 2}`.

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embedded_graphics::draw_target::DrawTarget;
use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::Pixel;

use platform::layout::{DISPLAY_HEIGHT, DISPLAY_WIDTH, FRAME_BYTES};

// ── Frame ────────────────────────────────────────────────────────────────────

/// One SSD1306 frame: 8 pages of 128 column bytes, bit 0 at the top of each
/// page.
///
/// Implements [`DrawTarget`], so status pages and overlays render straight
/// into the wire format with the ordinary `embedded-graphics` toolkit.
pub struct Frame([u8; FRAME_BYTES]);

impl Frame {
    /// An all-black frame.
    pub const fn new() -> Self {
        Self([0; FRAME_BYTES])
    }

    /// Raw page-column bytes.
    pub fn bytes(&self) -> &[u8; FRAME_BYTES] {
        &self.0
    }

    /// Raw page-column bytes, writable (video frames land here verbatim).
    pub fn bytes_mut(&mut self) -> &mut [u8; FRAME_BYTES] {
        &mut self.0
    }

    /// Blank the frame.
    pub fn clear(&mut self) {
        self.0.fill(0);
    }

    /// Set one pixel. Out-of-range coordinates are ignored.
    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)] // the bounds guard keeps index < 8 pages * 128 columns
    pub fn set_pixel(&mut self, x: u32, y: u32, on: bool) {
        if x >= DISPLAY_WIDTH || y >= DISPLAY_HEIGHT {
            return;
        }
        let index = (y / 8) as usize * DISPLAY_WIDTH as usize + x as usize;
        let bit = 1u8 << (y % 8);
        if on {
            self.0[index] |= bit;
        } else {
            self.0[index] &= !bit;
        }
    }

    /// Read one pixel (false outside the panel).
    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)] // the bounds guard keeps index < 8 pages * 128 columns
    pub fn pixel(&self, x: u32, y: u32) -> bool {
        if x >= DISPLAY_WIDTH || y >= DISPLAY_HEIGHT {
            return false;
        }
        let index = (y / 8) as usize * DISPLAY_WIDTH as usize + x as usize;
        self.0[index] & (1 << (y % 8)) != 0
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }
}

impl DrawTarget for Frame {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color.is_on());
            }
        }
        Ok(())
    }
}

// ── DisplayShared ────────────────────────────────────────────────────────────

/// The ISR-facing half of the display pipeline.
pub struct DisplayShared {
    transfer_busy: AtomicBool,
    frames_transferred: AtomicU32,
}

impl DisplayShared {
    /// Idle: no transfer in flight.
    pub const fn new() -> Self {
        Self {
            transfer_busy: AtomicBool::new(false),
            frames_transferred: AtomicU32::new(0),
        }
    }

    /// ISR entry: the I²C DMA finished the frame.
    pub fn transfer_complete(&self) {
        self.transfer_busy.store(false, Ordering::Release);
        self.frames_transferred.fetch_add(1, Ordering::Release);
    }

    /// True while the DMA engine owns the transfer slot.
    pub fn is_transferring(&self) -> bool {
        self.transfer_busy.load(Ordering::Acquire)
    }

    /// Frames fully shifted out to the panel.
    pub fn frames_transferred(&self) -> u32 {
        self.frames_transferred.load(Ordering::Acquire)
    }
}

impl Default for DisplayShared {
    fn default() -> Self {
        Self::new()
    }
}

// ── FrameSet ─────────────────────────────────────────────────────────────────

/// The three framebuffers and their role indices.
pub struct FrameSet<'a> {
    slots: [Frame; 3],
    render: u8,
    ready: u8,
    transfer: u8,
    frames_rendered: u32,
    shared: &'a DisplayShared,
}

impl<'a> FrameSet<'a> {
    /// Fresh set: all slots black, nothing queued.
    pub fn new(shared: &'a DisplayShared) -> Self {
        Self {
            slots: [Frame::new(), Frame::new(), Frame::new()],
            render: 0,
            ready: 2,
            transfer: 1,
            frames_rendered: 0,
            shared,
        }
    }

    /// The shared half, for wiring the completion ISR.
    pub fn shared(&self) -> &'a DisplayShared {
        self.shared
    }

    /// The slot the foreground may draw into.
    #[allow(clippy::indexing_slicing)] // role indices are a permutation of 0..3 over the three slots
    pub fn render_frame(&mut self) -> &mut Frame {
        &mut self.slots[self.render as usize]
    }

    /// Queue the freshly drawn frame for transfer (render ↔ ready).
    ///
    /// An unsent ready frame is superseded: its slot becomes the next
    /// render target and will be overwritten.
    #[allow(clippy::arithmetic_side_effects)] // monotone u32 counter; no session renders 2^32 frames
    pub fn swap_buffers(&mut self) {
        critical_section::with(|_| {
            core::mem::swap(&mut self.render, &mut self.ready);
            self.frames_rendered += 1;
        });
    }

    /// Frames committed by the foreground so far.
    pub fn frames_rendered(&self) -> u32 {
        self.frames_rendered
    }

    /// True when a queued frame is waiting to go out.
    pub fn has_frame(&self) -> bool {
        self.frames_rendered > self.shared.frames_transferred()
    }

    /// Claim the queued frame for the DMA engine (ready ↔ transfer).
    ///
    /// Returns the slot to transfer, or `None` when a transfer is already
    /// in flight or nothing is queued. The slot stays locked until the
    /// completion ISR calls [`DisplayShared::transfer_complete`].
    #[allow(clippy::indexing_slicing)] // role indices are a permutation of 0..3 over the three slots
    pub fn start_transfer(&mut self) -> Option<&Frame> {
        let claimed = critical_section::with(|_| {
            if self.shared.is_transferring() || !self.has_frame() {
                return false;
            }
            core::mem::swap(&mut self.ready, &mut self.transfer);
            self.shared.transfer_busy.store(true, Ordering::Release);
            true
        });
        claimed.then(|| &self.slots[self.transfer as usize])
    }

    /// Role indices `(render, ready, transfer)` — diagnostics and tests.
    pub fn indices(&self) -> (u8, u8, u8) {
        (self.render, self.ready, self.transfer)
    }
}
