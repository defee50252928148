//! DMA buffer alignment.
//!
//! The F407 has no data cache, so there is no coherency hazard — but the DMA
//! controllers burst most efficiently from aligned addresses, and keeping
//! every DMA-visible buffer on a 32-byte boundary means the same statics are
//! correct on cached parts (F7/H7) without relinking. The audio rings and
//! the I²C staging buffer go through this wrapper.

/// A `#[repr(align(32))]` wrapper for DMA-visible buffers.
///
/// # Example
///
/// ```ignore
/// use firmware::dma::Align32;
///
/// static FRAME_STAGING: StaticCell<Align32<[u8; 1025]>> = StaticCell::new();
/// ```
#[derive(Clone, Copy)]
#[repr(align(32))]
pub struct Align32<T>(
    /// The inner value. Public so callers can construct and destructure.
    pub T,
);
