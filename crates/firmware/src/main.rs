//! minicine — synchronized A/V playback, STM32F407 entry point.
//!
//! Boot flow: panel first (so every failure after it can say why), then the
//! card, mount, `BADAPPLE.BIN`. Boot pages go out over blocking I²C; once
//! the player owns the transport, frames ride DMA. Prefill the audio rings,
//! arm the circular DAC DMA, release the sample timer, spin the foreground
//! loop until the audio clock passes the last frame, then leave the stats
//! page up.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Level, Output, Pin, Speed};
use embassy_stm32::peripherals::SPI2;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_time::{block_for, Duration};
use static_cell::StaticCell;

use fat32::{ShortName, Volume};
use media::MediaFile;
use platform::layout::MEDIA_FILENAME;
use platform::regions::DmaBuffer;
use platform::sd::SdSpi;
use playback::{Frame, Player, StepOutcome};

use firmware::board::{self, CycleClock, FrameLink};
use firmware::dma::Align32;
use firmware::isr::{AUDIO_SHARED, DISPLAY_SHARED, SAMPLE_CLOCK};
use firmware::ui;

/// I²C staging: one data control byte + a full frame, DMA-visible.
static FRAME_STAGING: StaticCell<board::FrameStaging> = StaticCell::new();

type Card = SdSpi<Spi<'static, SPI2, NoDma, NoDma>, Output<'static, AnyPin>, CycleClock>;
type AvPlayer = Player<'static, Card, FrameLink, CycleClock, Output<'static, AnyPin>>;

/// The player owns the 16 KiB sample rings and the PCM staging; keep it out
/// of the stack frame.
static PLAYER: StaticCell<AvPlayer> = StaticCell::new();

/// Draw one page and push it out blocking (pre-player paths).
fn show_blocking(link: &mut FrameLink, draw: impl FnOnce(&mut Frame)) {
    let mut page = Frame::new();
    draw(&mut page);
    let _ = link.show_blocking(&page);
}

/// Fatal boot error with a working panel: say why, then blink forever.
fn halt(link: &mut FrameLink, led: &mut Output<'static, AnyPin>, message: &'static str) -> ! {
    defmt::error!("fatal: {=str}", message);
    show_blocking(link, |page| ui::fatal(page, message));
    blink_forever(led)
}

/// Fatal before the panel exists: blink only.
fn blink_forever(led: &mut Output<'static, AnyPin>) -> ! {
    loop {
        led.toggle();
        block_for(Duration::from_millis(100));
    }
}

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::info!("minicine v{=str}", env!("CARGO_PKG_VERSION"));

    let p = embassy_stm32::init(embassy_stm32::Config::default());
    let mut core = cortex_m::Peripherals::take().unwrap_or_else(|| defmt::panic!("core taken"));
    let clock = CycleClock::new(&mut core);

    let mut led = Output::new(p.PD13.degrade(), Level::Low, Speed::Low);

    // ── Panel first, so failures can be read ────────────────────────────────
    let staging = FRAME_STAGING.init(DmaBuffer::new(Align32([0; 1 + platform::layout::FRAME_BYTES])));
    let mut link = match FrameLink::new(staging, clock) {
        Ok(link) => link,
        Err(_) => {
            defmt::error!("no display on I2C1");
            blink_forever(&mut led)
        }
    };
    show_blocking(&mut link, ui::banner);

    // ── SD card over SPI2 ───────────────────────────────────────────────────
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(4_000_000);
    let bus = Spi::new(p.SPI2, p.PB13, p.PB15, p.PB14, NoDma, NoDma, spi_config);
    let cs = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);

    let mut card = SdSpi::new(bus, cs, clock);
    let kind = match card.init() {
        Ok(kind) => kind,
        Err(_) => halt(&mut link, &mut led, "no card"),
    };
    defmt::info!("card: {} — {=u32} blocks", kind, card.capacity_blocks());

    // ── Mount + open ────────────────────────────────────────────────────────
    let mut vol = match Volume::mount(&mut card) {
        Ok(vol) => vol,
        Err(_) => halt(&mut link, &mut led, "mount failed"),
    };
    defmt::info!(
        "FAT32: {=u8} spc, fat at {=u32}, data at {=u32}",
        vol.sectors_per_cluster(),
        vol.fat_start(),
        vol.data_start()
    );

    let name = ShortName::from_path(MEDIA_FILENAME);
    let media = match MediaFile::open(&mut vol, &mut card, &name) {
        Ok(media) => media,
        Err(media::Error::NotFound) => halt(&mut link, &mut led, "BADAPPLE.BIN missing"),
        Err(_) => halt(&mut link, &mut led, "bad media file"),
    };
    defmt::info!(
        "media: {=u32} frames, {=u32} Hz, {}",
        media.frame_count(),
        media.header().sample_rate.get(),
        if media.is_contiguous() { "contiguous" } else { "fragmented" }
    );
    if media.chain_suspect() {
        defmt::warn!("cluster chain tripped the corruption bound; using the FAT walk");
    }

    // ── Boot pages ──────────────────────────────────────────────────────────
    let info = ui::FileInfo::from(&media);
    block_for(Duration::from_millis(1500));
    show_blocking(&mut link, |page| ui::file_info(page, &info));
    block_for(Duration::from_millis(1500));
    show_blocking(&mut link, ui::starting);

    // ── Player assembly ─────────────────────────────────────────────────────
    firmware::isr::enable_interrupts();

    let sample_rate = media.header().sample_rate.get();
    let player = PLAYER.init(
        match Player::new(
            card,
            vol,
            media,
            &AUDIO_SHARED,
            &DISPLAY_SHARED,
            &SAMPLE_CLOCK,
            link,
            clock,
            led,
        ) {
            Ok(player) => player,
            Err(_) => defmt::panic!("player assembly failed"),
        },
    );

    // ── Prefill, arm, go ────────────────────────────────────────────────────
    player.prepare();
    {
        let (left, right) = player.engine().rings();
        // SAFETY: the rings live inside the static PLAYER cell; from here on
        // they are only written through the refill protocol, which fences
        // before returning ownership to the DMA engine.
        unsafe { board::arm_audio(left.as_ptr(), right.as_ptr()) };
    }
    if player.start().is_err() {
        defmt::panic!("start out of order");
    }
    board::start_sample_clock(sample_rate);
    defmt::info!("playing at {=u32} Hz", sample_rate);

    while player.step() == StepOutcome::Continue {}

    // ── Done: stop the clock, show the tally ────────────────────────────────
    board::stop_sample_clock();
    let report = player.finish();
    defmt::info!(
        "done: {=u32} drawn, {=u32} skipped, {=u32} held, {=u32} refills (worst {=u32} us), {=u32} underruns",
        report.frames_rendered,
        report.frames_skipped,
        report.frames_repeated,
        report.refill_count,
        report.max_refill_us,
        report.underrun_count
    );
    ui::stats(player.frames().render_frame(), &report);
    player.present();

    loop {
        cortex_m::asm::wfi();
    }
}
