//! Interrupt entry points and the ISR-shared statics.
//!
//! The shared halves live here as plain `static`s — every field inside them
//! is a word-sized atomic, so both the handlers and the foreground reach
//! them without masking. The handlers compose the statics: the audio stream
//! ISR passes the sample clock into the audio events, which is the only
//! coupling between the audio pipeline and the synchronizer.
//!
//! Priority ordering (highest first): audio DMA > display DMA. The sample
//! timer raises no interrupt (it only triggers the DAC), and the SD path is
//! polled, so those two stages of the nominal ordering have no vector here.

use embassy_stm32::pac;
use playback::{AudioShared, DisplayShared, SampleClock};

/// Audio pipeline, ISR half. The DAC DMA stream handler and the foreground
/// engine both point here.
pub static AUDIO_SHARED: AudioShared = AudioShared::new();

/// Display pipeline, ISR half.
pub static DISPLAY_SHARED: DisplayShared = DisplayShared::new();

/// The master timebase fed from the audio ISR.
pub static SAMPLE_CLOCK: SampleClock = SampleClock::new();


/// DMA1 Stream5: DAC channel 1 (the LEFT ring, the only stream that
/// interrupts).
///
/// Half-transfer: the DAC wrapped into the second half — refill the first.
/// Transfer-complete: it wrapped to the start — refill the second.
#[no_mangle]
unsafe extern "C" fn DMA1_STREAM5() {
    let flags = pac::DMA1.isr(1).read();
    if flags.htif(1) {
        pac::DMA1.ifcr(1).write(|w| w.set_htif(1, true));
        AUDIO_SHARED.half_complete(Some(&SAMPLE_CLOCK));
    }
    if flags.tcif(1) {
        pac::DMA1.ifcr(1).write(|w| w.set_tcif(1, true));
        AUDIO_SHARED.transfer_complete(Some(&SAMPLE_CLOCK));
    }
    if flags.teif(1) {
        pac::DMA1.ifcr(1).write(|w| w.set_teif(1, true));
        // A bus error on the audio stream is unrecoverable from here; the
        // foreground notices the stalled sample clock and stops.
        defmt::error!("DAC DMA transfer error");
    }
}

/// DMA1 Stream7: I²C1 TX (display frame transfer).
///
/// On completion the I²C peripheral still owns the last byte; schedule the
/// STOP condition and release the transfer slot.
#[no_mangle]
unsafe extern "C" fn DMA1_STREAM7() {
    let flags = pac::DMA1.isr(1).read();
    if flags.tcif(3) {
        pac::DMA1.ifcr(1).write(|w| w.set_tcif(3, true));

        // Last byte is in the shift register: drop DMA mode and queue STOP.
        pac::I2C1.cr2().modify(|w| w.set_dmaen(false));
        pac::I2C1.cr1().modify(|w| w.set_stop(true));

        DISPLAY_SHARED.transfer_complete();
    }
    if flags.teif(3) {
        pac::DMA1.ifcr(1).write(|w| w.set_teif(3, true));
        pac::I2C1.cr2().modify(|w| w.set_dmaen(false));
        pac::I2C1.cr1().modify(|w| w.set_stop(true));
        defmt::error!("display DMA transfer error");
        // Release the slot so playback continues with dropped frames.
        DISPLAY_SHARED.transfer_complete();
    }
}

/// Unmask the two DMA vectors with audio above display.
pub fn enable_interrupts() {
    use embassy_stm32::interrupt::{InterruptExt, Priority};

    embassy_stm32::interrupt::DMA1_STREAM5.set_priority(Priority::P1);
    embassy_stm32::interrupt::DMA1_STREAM7.set_priority(Priority::P4);
    // SAFETY: the handlers above only touch atomics and their own DMA/I2C
    // registers; unmasking cannot break an invariant.
    unsafe {
        embassy_stm32::interrupt::DMA1_STREAM5.enable();
        embassy_stm32::interrupt::DMA1_STREAM7.enable();
    }
}
