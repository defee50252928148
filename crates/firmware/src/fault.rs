//! Cortex-M fault handlers.
//!
//! A HardFault mid-playback means a bus fault or an illegal access — with no
//! allocator and no recursion to speak of, the usual suspect is a DMA
//! pointer gone wrong. Halt loudly so the stacked frame survives for the
//! debugger.

/// HardFault handler.
///
/// # Safety
///
/// Never returns — returning from a HardFault is undefined behavior on
/// Cortex-M; the `-> !` return type enforces this.
#[cortex_m_rt::exception]
#[allow(unsafe_code)]
unsafe fn HardFault(frame: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::panic!(
        "HardFault: stacked frame at {=u32:08x}; inspect stacked PC for the faulting address",
        frame as *const _ as u32
    );
}
