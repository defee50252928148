//! Display transfer seam.
//!
//! The triple-buffer logic decides *when* a frame may go out; this trait is
//! the *how*: hand one packed SSD1306 frame to the I²C DMA engine. The call
//! only kicks the transfer off — completion is reported out-of-band by the
//! DMA ISR through the display pipeline's shared half.

use crate::layout::FRAME_BYTES;

/// One-way transport of packed 1024-byte frames to the panel.
pub trait FrameTransport {
    /// Transport error (bus arbitration loss, NACK, DMA fault).
    type Error: core::fmt::Debug;

    /// Start an asynchronous full-frame transfer.
    ///
    /// The referenced slot stays untouched by the foreground until the
    /// completion ISR runs; implementations may therefore capture the
    /// pointer for the DMA engine.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the transfer could not be started; the
    /// caller releases the slot again in that case.
    fn begin(&mut self, frame: &[u8; FRAME_BYTES]) -> Result<(), Self::Error>;
}
