//! STM32F407 bring-up and peripheral glue.
//!
//! Pin map:
//!
//! | Signal          | Pin  | Peripheral          |
//! |-----------------|------|---------------------|
//! | DAC left        | PA4  | DAC1 ← DMA1 S5 C7   |
//! | DAC right       | PA5  | DAC2 ← DMA1 S6 C7   |
//! | Display SCL/SDA | PB6/PB7 | I2C1 ← DMA1 S7 C1 |
//! | SD SCK/MISO/MOSI| PB13/PB14/PB15 | SPI2 (blocking) |
//! | SD CS           | PB12 | GPIO                |
//! | Status LED      | PD13 | GPIO                |
//!
//! Both DAC streams run circular off the TIM6 update trigger so the
//! channels advance in lock step; only stream 5 interrupts. The sample
//! clock and every divisor below derive from the default HSI tree
//! (16 MHz sysclk, APB1 timer clock 16 MHz), which divides all supported
//! sample rates exactly.

use embassy_stm32::pac;
use platform::layout::{AUDIO_RING_SAMPLES, FRAME_BYTES};
use platform::regions::{DmaBuffer, SramRegion};
use platform::time::Micros;

use crate::dma::Align32;

/// DMA staging for one frame behind its data control byte. The region
/// marker rejects CCM placement at the type level; the alignment wrapper
/// keeps the stream burst-friendly.
pub type FrameStaging = DmaBuffer<SramRegion, Align32<[u8; 1 + FRAME_BYTES]>>;

/// APB1 timer clock with the default HSI tree.
const TIM_CLOCK_HZ: u32 = 16_000_000;

/// CPU clock with the default HSI tree.
const CPU_CLOCK_HZ: u32 = 16_000_000;

/// SSD1306 I²C address (SA0 low).
const OLED_ADDR: u8 = 0x3C;

/// Control byte introducing a command stream.
const OLED_CTRL_CMD: u8 = 0x00;

/// Control byte introducing a data stream.
const OLED_CTRL_DATA: u8 = 0x40;

// ── Microsecond clock ────────────────────────────────────────────────────────

/// Free-running microsecond clock off the DWT cycle counter.
#[derive(Clone, Copy)]
pub struct CycleClock {
    cycles_per_us: u32,
}

impl CycleClock {
    /// Enable the cycle counter and bind it to the CPU clock.
    pub fn new(core: &mut cortex_m::Peripherals) -> Self {
        core.DCB.enable_trace();
        core.DWT.enable_cycle_counter();
        Self {
            cycles_per_us: CPU_CLOCK_HZ / 1_000_000,
        }
    }
}

impl Micros for CycleClock {
    #[allow(clippy::arithmetic_side_effects)] // cycles_per_us is a nonzero clock-derived constant
    fn now_us(&self) -> u32 {
        cortex_m::peripheral::DWT::cycle_count() / self.cycles_per_us
    }
}

// ── Audio: DAC + TIM6 + DMA1 ─────────────────────────────────────────────────

/// Arm both DAC channels as circular DMA streams over the sample rings.
///
/// The streams are enabled but nothing moves until
/// [`start_sample_clock`] releases TIM6. Stream 5 (left) raises the
/// half/complete interrupts; stream 6 (right) follows silently.
///
/// # Safety
///
/// `left` and `right` must point at `'static` rings of
/// [`AUDIO_RING_SAMPLES`] samples each (the DMA engine holds the addresses
/// from here on), written only through the refill protocol.
pub unsafe fn arm_audio(left: *const u16, right: *const u16) {
    pac::RCC.ahb1enr().modify(|w| w.set_dma1en(true));
    pac::RCC.apb1enr().modify(|w| {
        w.set_dacen(true);
        w.set_tim6en(true);
    });

    // PA4/PA5 analog (no digital input buffer fighting the output).
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::GPIOA.moder().modify(|w| {
        w.set_moder(4, pac::gpio::vals::Moder::ANALOG);
        w.set_moder(5, pac::gpio::vals::Moder::ANALOG);
    });

    // Left: DMA1 stream 5 channel 7 → DAC DHR12R1, with interrupts.
    let s5 = pac::DMA1.st(5);
    s5.cr().write(|w| {
        w.set_chsel(7);
        w.set_dir(pac::dma::vals::Dir::MEMORYTOPERIPHERAL);
        w.set_circ(true);
        w.set_minc(true);
        w.set_psize(pac::dma::vals::Size::BITS16);
        w.set_msize(pac::dma::vals::Size::BITS16);
        w.set_htie(true);
        w.set_tcie(true);
        w.set_teie(true);
    });
    s5.ndtr().write(|w| w.set_ndt(AUDIO_RING_SAMPLES as u16));
    s5.par().write_value(pac::DAC1.dhr12r(0).as_ptr() as u32);
    s5.m0ar().write_value(left as u32);

    // Right: DMA1 stream 6 channel 7 → DAC DHR12R2, silent.
    let s6 = pac::DMA1.st(6);
    s6.cr().write(|w| {
        w.set_chsel(7);
        w.set_dir(pac::dma::vals::Dir::MEMORYTOPERIPHERAL);
        w.set_circ(true);
        w.set_minc(true);
        w.set_psize(pac::dma::vals::Size::BITS16);
        w.set_msize(pac::dma::vals::Size::BITS16);
    });
    s6.ndtr().write(|w| w.set_ndt(AUDIO_RING_SAMPLES as u16));
    s6.par().write_value(pac::DAC1.dhr12r(1).as_ptr() as u32);
    s6.m0ar().write_value(right as u32);

    s5.cr().modify(|w| w.set_en(true));
    s6.cr().modify(|w| w.set_en(true));

    // Both channels: TIM6 TRGO trigger, DMA requests, output on.
    pac::DAC1.cr().write(|w| {
        for ch in 0..2 {
            w.set_tsel(ch, 0); // TIM6 TRGO
            w.set_ten(ch, true);
            w.set_dmaen(ch, true);
            w.set_en(ch, true);
        }
    });
}

/// Program TIM6 for `sample_rate` and release it — the DACs start eating
/// samples on the next update event.
#[allow(clippy::arithmetic_side_effects)] // sample_rate is range-validated at header parse; divisor >= 166
pub fn start_sample_clock(sample_rate: u32) {
    let divisor = TIM_CLOCK_HZ / sample_rate;

    pac::TIM6.psc().write(|w| w.set_psc(0));
    pac::TIM6.arr().write(|w| w.set_arr((divisor - 1) as u16));
    // Update event → TRGO.
    pac::TIM6.cr2().write(|w| w.set_mms(pac::timer::vals::Mms::UPDATE));
    pac::TIM6.cr1().modify(|w| w.set_cen(true));
}

/// Freeze the sample clock (playback stop).
pub fn stop_sample_clock() {
    pac::TIM6.cr1().modify(|w| w.set_cen(false));
}

// ── Display: I²C1 + DMA1 stream 7 ───────────────────────────────────────────

/// Display link error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OledError {
    /// A bounded wait on an I²C event expired.
    Timeout,
    /// The panel did not acknowledge its address.
    Nack,
}

/// SSD1306 over I²C1 with DMA frame transfers.
///
/// Commands (init, addressing windows) go out blocking; full frames are
/// staged behind a data control byte and handed to DMA1 stream 7. The
/// stream-complete ISR issues the STOP and releases the transfer slot.
pub struct FrameLink {
    staging: &'static mut FrameStaging,
    clock: CycleClock,
}

impl FrameLink {
    /// Bring up I²C1 at 400 kHz and run the panel init sequence.
    ///
    /// # Errors
    ///
    /// [`OledError`] when the panel never acknowledges.
    pub fn new(staging: &'static mut FrameStaging, clock: CycleClock) -> Result<Self, OledError> {
        pac::RCC.ahb1enr().modify(|w| w.set_gpioben(true));
        pac::RCC.apb1enr().modify(|w| w.set_i2c1en(true));

        // PB6/PB7: AF4, open-drain, pulled up externally.
        pac::GPIOB.moder().modify(|w| {
            w.set_moder(6, pac::gpio::vals::Moder::ALTERNATE);
            w.set_moder(7, pac::gpio::vals::Moder::ALTERNATE);
        });
        pac::GPIOB.otyper().modify(|w| {
            w.set_ot(6, pac::gpio::vals::Ot::OPENDRAIN);
            w.set_ot(7, pac::gpio::vals::Ot::OPENDRAIN);
        });
        pac::GPIOB.afr(0).modify(|w| {
            w.set_afr(6, 4);
            w.set_afr(7, 4);
        });

        // 400 kHz fast mode off the 16 MHz APB1 clock.
        pac::I2C1.cr1().write(|w| w.set_pe(false));
        pac::I2C1.cr2().write(|w| w.set_freq(16));
        pac::I2C1.ccr().write(|w| {
            w.set_f_s(true);
            w.set_ccr((16_000_000u32 / (3 * 400_000)) as u16);
        });
        pac::I2C1.trise().write(|w| w.set_trise((16 * 300 / 1000 + 1) as u8));
        pac::I2C1.cr1().modify(|w| w.set_pe(true));

        let mut link = Self { staging, clock };
        link.init_panel()?;
        Ok(link)
    }

    /// The SSD1306 horizontal-addressing init ladder.
    fn init_panel(&mut self) -> Result<(), OledError> {
        const INIT: &[u8] = &[
            0xAE, // display off
            0xD5, 0x80, // clock divide
            0xA8, 0x3F, // multiplex 64
            0xD3, 0x00, // no display offset
            0x40, // start line 0
            0x8D, 0x14, // charge pump on
            0x20, 0x00, // horizontal addressing
            0xA1, 0xC8, // flip to natural orientation
            0xDA, 0x12, // COM pins
            0x81, 0xCF, // contrast
            0xD9, 0xF1, // precharge
            0xDB, 0x40, // VCOMH
            0xA4, // follow RAM
            0xA6, // normal polarity
            0x21, 0x00, 0x7F, // column window 0..127
            0x22, 0x00, 0x07, // page window 0..7
            0xAF, // display on
        ];
        self.write_blocking(OLED_CTRL_CMD, INIT)
    }

    /// Blocking full-frame write — boot and fatal paths, before (or instead
    /// of) the DMA machinery.
    ///
    /// # Errors
    ///
    /// [`OledError`] when the panel stops acknowledging.
    pub fn show_blocking(&mut self, frame: &playback::Frame) -> Result<(), OledError> {
        self.write_blocking(OLED_CTRL_DATA, frame.bytes())
    }

    /// Bounded wait on an I²C status predicate.
    fn wait_sr1(&self, pred: fn(pac::i2c::regs::Sr1) -> bool) -> Result<(), OledError> {
        let start = self.clock.now_us();
        loop {
            let sr1 = pac::I2C1.sr1().read();
            if sr1.af() {
                pac::I2C1.sr1().modify(|w| w.set_af(false));
                pac::I2C1.cr1().modify(|w| w.set_stop(true));
                return Err(OledError::Nack);
            }
            if pred(sr1) {
                return Ok(());
            }
            if self.clock.elapsed_us(start) > 10_000 {
                return Err(OledError::Timeout);
            }
        }
    }

    /// START + address, one control byte, then `payload`, blocking.
    fn write_blocking(&mut self, control: u8, payload: &[u8]) -> Result<(), OledError> {
        pac::I2C1.cr1().modify(|w| w.set_start(true));
        self.wait_sr1(|sr1| sr1.sb())?;
        pac::I2C1.dr().write(|w| w.set_dr(OLED_ADDR << 1));
        self.wait_sr1(|sr1| sr1.addr())?;
        let _ = pac::I2C1.sr2().read(); // ADDR clear sequence

        pac::I2C1.dr().write(|w| w.set_dr(control));
        for &byte in payload {
            self.wait_sr1(|sr1| sr1.txe())?;
            pac::I2C1.dr().write(|w| w.set_dr(byte));
        }
        self.wait_sr1(|sr1| sr1.btf())?;
        pac::I2C1.cr1().modify(|w| w.set_stop(true));
        Ok(())
    }
}

impl platform::display::FrameTransport for FrameLink {
    type Error = OledError;

    fn begin(&mut self, frame: &[u8; platform::layout::FRAME_BYTES]) -> Result<(), Self::Error> {
        // Stage control byte + payload so DMA sees one flat buffer.
        self.staging.data.0[0] = OLED_CTRL_DATA;
        self.staging.data.0[1..].copy_from_slice(frame);

        // Address phase is short (~25 µs at 400 kHz) and done here; the
        // 1025 data bytes (~26 ms) ride DMA.
        pac::I2C1.cr1().modify(|w| w.set_start(true));
        self.wait_sr1(|sr1| sr1.sb())?;
        pac::I2C1.dr().write(|w| w.set_dr(OLED_ADDR << 1));
        self.wait_sr1(|sr1| sr1.addr())?;
        let _ = pac::I2C1.sr2().read();

        let s7 = pac::DMA1.st(7);
        s7.cr().write(|w| {
            w.set_chsel(1);
            w.set_dir(pac::dma::vals::Dir::MEMORYTOPERIPHERAL);
            w.set_minc(true);
            w.set_tcie(true);
            w.set_teie(true);
        });
        s7.ndtr().write(|w| w.set_ndt(self.staging.data.0.len() as u16));
        s7.par().write_value(pac::I2C1.dr().as_ptr() as u32);
        s7.m0ar().write_value(self.staging.data.0.as_ptr() as u32);

        pac::I2C1.cr2().modify(|w| w.set_dmaen(true));
        s7.cr().modify(|w| w.set_en(true));
        Ok(())
    }
}
