//! Status pages drawn into the SSD1306 frame packing.
//!
//! Four pages over the player's lifetime: boot banner, file info after the
//! media opens, a starting notice, and the final statistics. Everything
//! renders with the stock `embedded-graphics` 6×10 mono font into a
//! [`Frame`]; the caller queues the frame through the normal triple-buffer
//! path.

use core::fmt::Write as _;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;

use heapless::String;
use media::MediaFile;
use playback::{Frame, PlaybackReport};

/// What the file-info page shows, lifted out of the media reader so pages
/// render (and test) without storage attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Video frame count.
    pub frame_count: u32,
    /// PCM sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Bits per PCM sample.
    pub bits_per_sample: u32,
    /// Whole seconds of video.
    pub duration_secs: u32,
    /// Single ascending cluster run?
    pub contiguous: bool,
    /// Contiguity probe tripped the corruption bound?
    pub chain_suspect: bool,
}

impl From<&MediaFile> for FileInfo {
    fn from(media: &MediaFile) -> Self {
        let header = media.header();
        Self {
            frame_count: header.frame_count,
            sample_rate: header.sample_rate.get(),
            channels: header.channels,
            bits_per_sample: header.bits_per_sample,
            duration_secs: header.duration_secs(),
            contiguous: media.is_contiguous(),
            chain_suspect: media.chain_suspect(),
        }
    }
}

/// Firmware name shown on the boot banner.
pub const TITLE: &str = "minicine";

/// Firmware version shown on the boot banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LINE_HEIGHT: i32 = 10;

fn style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyle::new(&FONT_6X10, BinaryColor::On)
}

/// Draw one text line; `row` 0 is the top line.
#[allow(clippy::arithmetic_side_effects)] // row <= 5 keeps the baseline inside the 64-pixel panel
fn line(frame: &mut Frame, row: i32, text: &str) {
    // FONT_6X10 draws from the baseline; row 0 lands fully on screen.
    let _ = Text::new(text, Point::new(0, row * LINE_HEIGHT + 8), style()).draw(frame);
}

/// Boot banner.
pub fn banner(frame: &mut Frame) {
    frame.clear();
    line(frame, 1, TITLE);
    let mut version: String<24> = String::new();
    let _ = write!(version, "v{VERSION}");
    line(frame, 2, &version);
    line(frame, 4, "insert coin...");
}

/// File-info page: what the header and layout probe found.
pub fn file_info(frame: &mut Frame, info: &FileInfo) {
    frame.clear();

    let mut buf: String<24> = String::new();
    let _ = write!(buf, "frames {}", info.frame_count);
    line(frame, 0, &buf);

    buf.clear();
    let _ = write!(buf, "rate {} Hz", info.sample_rate);
    line(frame, 1, &buf);

    buf.clear();
    let _ = write!(buf, "ch {} / {} bit", info.channels, info.bits_per_sample);
    line(frame, 2, &buf);

    buf.clear();
    let _ = write!(buf, "length {} s", info.duration_secs);
    line(frame, 3, &buf);

    line(
        frame,
        4,
        if info.contiguous { "layout CONTIG" } else { "layout FRAG" },
    );
    if info.chain_suspect {
        line(frame, 5, "chain SUSPECT");
    }
}

/// The pre-playback notice.
pub fn starting(frame: &mut Frame) {
    frame.clear();
    line(frame, 2, "Starting...");
}

/// Final statistics: the six lines that matter after a run.
pub fn stats(frame: &mut Frame, report: &PlaybackReport) {
    frame.clear();
    let mut buf: String<24> = String::new();

    let rows: [(&str, u32); 6] = [
        ("drawn", report.frames_rendered),
        ("skip", report.frames_skipped),
        ("held", report.frames_repeated),
        ("refill", report.refill_count),
        ("worst us", report.max_refill_us),
        ("underrun", report.underrun_count),
    ];
    for (row, (label, value)) in rows.iter().enumerate() {
        buf.clear();
        let _ = write!(buf, "{label} {value}");
        line(frame, row as i32, &buf);
    }
}

/// Fatal-error page (no card / no file).
pub fn fatal(frame: &mut Frame, message: &str) {
    frame.clear();
    line(frame, 2, "FATAL");
    line(frame, 3, message);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn lit_pixels(frame: &Frame) -> usize {
        frame
            .bytes()
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    #[test]
    fn banner_draws_something() {
        let mut frame = Frame::new();
        banner(&mut frame);
        assert!(lit_pixels(&frame) > 50);
    }

    #[test]
    fn starting_and_fatal_pages_differ() {
        let mut a = Frame::new();
        let mut b = Frame::new();
        starting(&mut a);
        fatal(&mut b, "no card");
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn stats_page_reflects_the_report() {
        let mut zeroed = Frame::new();
        stats(&mut zeroed, &PlaybackReport::default());

        let mut busy = Frame::new();
        let report = PlaybackReport {
            frames_rendered: 6572,
            frames_skipped: 3,
            frames_repeated: 12,
            refill_count: 3420,
            max_refill_us: 5130,
            underrun_count: 1,
            ..PlaybackReport::default()
        };
        stats(&mut busy, &report);
        assert_ne!(zeroed.bytes(), busy.bytes());
        assert!(lit_pixels(&busy) > lit_pixels(&zeroed));
    }

    #[test]
    fn file_info_page_shows_the_layout_verdict() {
        let info = FileInfo {
            frame_count: 6572,
            sample_rate: 32_000,
            channels: 2,
            bits_per_sample: 16,
            duration_secs: 219,
            contiguous: true,
            chain_suspect: false,
        };
        let mut contiguous_page = Frame::new();
        file_info(&mut contiguous_page, &info);

        let fragmented = FileInfo {
            contiguous: false,
            ..info
        };
        let mut fragmented_page = Frame::new();
        file_info(&mut fragmented_page, &fragmented);

        assert_ne!(contiguous_page.bytes(), fragmented_page.bytes());
    }

    #[test]
    fn pages_clear_previous_content() {
        let mut frame = Frame::new();
        // Fill everything, then draw a page over it.
        frame.bytes_mut().fill(0xFF);
        starting(&mut frame);
        // A page begins with clear(): most pixels must be off again.
        assert!(lit_pixels(&frame) < 1024);
    }
}
