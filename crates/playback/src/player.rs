//! The foreground playback loop.
//!
//! Per iteration: poll the audio refill, check for completion, take a sync
//! decision (render / skip / repeat), kick the display transfer, poll the
//! refill again. Audio is polled twice because a video frame read is allowed
//! to approach — but never exceed — one half-buffer playback period, and the
//! refill must win every race it can.
//!
//! Nothing in the loop blocks except the bounded synchronous block reads
//! inside the media layer.

use embedded_hal::digital::OutputPin;

use fat32::Volume;
use media::MediaFile;
use platform::block::BlockDevice;
use platform::display::FrameTransport;
use platform::layout::VIDEO_FPS;
use platform::time::Micros;

use crate::audio::{AudioEngine, AudioShared, FillHalf, InvalidState};
use crate::display::{DisplayShared, FrameSet};
use crate::sync::{AvSync, FrameDecision, SampleClock, SyncError};

/// Fatal setup-time failures. Mid-playback storage errors degrade instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerError {
    /// The media layer failed while opening or preparing.
    Media(media::Error),
    /// An audio pipeline transition was attempted out of order.
    Audio(InvalidState),
    /// Synchronizer configuration or transition failure.
    Sync(SyncError),
}

impl From<media::Error> for PlayerError {
    fn from(e: media::Error) -> Self {
        Self::Media(e)
    }
}

impl From<InvalidState> for PlayerError {
    fn from(e: InvalidState) -> Self {
        Self::Audio(e)
    }
}

impl From<SyncError> for PlayerError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

/// Outcome of one foreground iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep looping.
    Continue,
    /// The audio clock has passed the last video frame.
    Complete,
}

/// Final accounting, shown on the stats page after playback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlaybackReport {
    /// Frames actually drawn and committed.
    pub frames_rendered: u32,
    /// Frames advanced without drawing (video was behind).
    pub frames_skipped: u32,
    /// Ticks that held the current frame (video was ahead).
    pub frames_repeated: u32,
    /// Audio half-buffer refills completed.
    pub refill_count: u32,
    /// Worst-case refill duration in microseconds.
    pub max_refill_us: u32,
    /// Half-buffers the DAC replayed because the refill was late.
    pub underrun_count: u32,
    /// Frames fully shifted out to the panel.
    pub frames_transferred: u32,
    /// Storage failures degraded to a silent audio buffer.
    pub audio_read_errors: u32,
    /// Storage failures degraded to a blanked frame.
    pub video_read_errors: u32,
    /// Transfers refused by the display transport (frame dropped).
    pub display_errors: u32,
    /// Samples the DAC consumed over the run.
    pub samples_played: u32,
}

/// The orchestrator: owns storage, the media cursor, and all three
/// pipelines; generic over the hardware seams.
pub struct Player<'a, D, T, C, L> {
    dev: D,
    vol: Volume,
    media: MediaFile,
    engine: AudioEngine<'a>,
    frames: FrameSet<'a>,
    sync: AvSync<'a>,
    transport: T,
    clock: C,
    led: L,
    last_rendered: Option<u32>,
    frames_repeated: u32,
    audio_read_errors: u32,
    video_read_errors: u32,
    display_errors: u32,
    max_refill_us: u32,
}

// Diagnostic counters throughout use plain increments: u32 cannot wrap
// within a playback session. The LED divisor is clamped nonzero.
#[allow(clippy::arithmetic_side_effects)]
impl<'a, D, T, C, L> Player<'a, D, T, C, L>
where
    D: BlockDevice,
    T: FrameTransport,
    C: Micros,
    L: OutputPin,
{
    /// Assemble a player around an opened media file.
    ///
    /// The shared halves live in statics on the target so the ISRs can
    /// reach them; the same references drive the mock ISRs in host tests.
    ///
    /// # Errors
    ///
    /// [`PlayerError::Sync`] when the media sample rate and the fixed frame
    /// rate produce no whole samples per frame.
    #[allow(clippy::too_many_arguments)] // assembly point: every seam appears once
    pub fn new(
        dev: D,
        vol: Volume,
        media: MediaFile,
        audio_shared: &'a AudioShared,
        display_shared: &'a DisplayShared,
        sample_clock: &'a SampleClock,
        transport: T,
        clock: C,
        led: L,
    ) -> Result<Self, PlayerError> {
        let sync = AvSync::new(sample_clock, media.header().sample_rate, VIDEO_FPS, 0)?;
        Ok(Self {
            dev,
            vol,
            media,
            engine: AudioEngine::new(audio_shared),
            frames: FrameSet::new(display_shared),
            sync,
            transport,
            clock,
            led,
            last_rendered: None,
            frames_repeated: 0,
            audio_read_errors: 0,
            video_read_errors: 0,
            display_errors: 0,
            max_refill_us: 0,
        })
    }

    /// The open media file (header, layout, volume control).
    pub fn media(&self) -> &MediaFile {
        &self.media
    }

    /// The block device (diagnostics, host fault injection).
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    /// The open media file, writable (volume control).
    pub fn media_mut(&mut self) -> &mut MediaFile {
        &mut self.media
    }

    /// The audio engine (rings for DMA arming, state).
    pub fn engine(&self) -> &AudioEngine<'a> {
        &self.engine
    }

    /// The synchronizer (progress inspection).
    pub fn sync(&self) -> &AvSync<'a> {
        &self.sync
    }

    /// The framebuffer set (status pages draw into the render slot).
    pub fn frames(&mut self) -> &mut FrameSet<'a> {
        &mut self.frames
    }

    /// The display transport.
    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Silence the rings and preload both halves with real audio.
    ///
    /// After this the caller arms the circular DAC DMA over
    /// [`AudioEngine::rings`], then calls [`Self::start`], then releases the
    /// timer trigger. Storage failures here degrade to a silent start and
    /// are counted, not returned.
    pub fn prepare(&mut self) {
        self.engine.init();
        for half in [FillHalf::First, FillHalf::Second] {
            let (l, r) = self.engine.half_slices_mut(half);
            if self.media.read_audio(&mut self.vol, &mut self.dev, l, r).is_err() {
                self.audio_read_errors += 1;
            }
        }
    }

    /// Transition audio and the synchronizer into the running state.
    ///
    /// # Errors
    ///
    /// [`PlayerError::Audio`] / [`PlayerError::Sync`] when called out of
    /// order (e.g. without [`Self::prepare`]).
    pub fn start(&mut self) -> Result<(), PlayerError> {
        self.engine.start()?;
        self.sync.start()?;
        Ok(())
    }

    /// One foreground iteration.
    pub fn step(&mut self) -> StepOutcome {
        self.poll_refill();

        if self.sync.audio_frame_index() >= self.media.frame_count() {
            return StepOutcome::Complete;
        }

        match self.sync.frame_decision() {
            FrameDecision::Render => self.render_next(),
            FrameDecision::Skip => self.sync.frame_skipped(),
            FrameDecision::Repeat => self.frames_repeated += 1,
            FrameDecision::NotStarted => {}
        }

        self.pump_display();
        // Refills outrank the display: poll again before leaving.
        self.poll_refill();
        self.update_led();
        StepOutcome::Continue
    }

    /// Loop [`Self::step`] to completion and stop the pipelines.
    pub fn run(&mut self) -> PlaybackReport {
        while self.step() == StepOutcome::Continue {}
        self.finish()
    }

    /// Queue whatever was just drawn into the render slot and kick the
    /// transfer — the boot/status page path, outside the sync loop.
    pub fn present(&mut self) {
        self.frames.swap_buffers();
        self.pump_display();
    }

    /// Stop the pipelines and collect the final report.
    pub fn finish(&mut self) -> PlaybackReport {
        self.sync.stop();
        let _ = self.engine.stop();
        let _ = self.led.set_low();

        let audio = self.engine.shared().stats();
        let sync_stats = self.sync.stats();
        PlaybackReport {
            frames_rendered: self.frames.frames_rendered(),
            frames_skipped: sync_stats.frames_skipped,
            frames_repeated: self.frames_repeated,
            refill_count: audio.refill_count,
            max_refill_us: self.max_refill_us,
            underrun_count: audio.underrun_count,
            frames_transferred: self.frames.shared().frames_transferred(),
            audio_read_errors: self.audio_read_errors,
            video_read_errors: self.video_read_errors,
            display_errors: self.display_errors,
            samples_played: audio.samples_played,
        }
    }

    /// Refill the half the ISR flagged, if any, tracking the worst case.
    fn poll_refill(&mut self) {
        if !self.engine.needs_refill() {
            return;
        }
        let t0 = self.clock.now_us();
        if let Some((l, r)) = self.engine.refill_slices() {
            if self.media.read_audio(&mut self.vol, &mut self.dev, l, r).is_err() {
                self.audio_read_errors += 1;
            }
            self.engine.buffer_filled();
            self.max_refill_us = self.max_refill_us.max(self.clock.elapsed_us(t0));
        }
    }

    /// Read the next video frame into the render slot and commit it.
    fn render_next(&mut self) {
        let target = self.sync.video_frames_rendered();
        // The drift band can point one past the end while the tail of the
        // audio is still draining; hold the last frame.
        if target >= self.media.frame_count() {
            self.frames_repeated += 1;
            return;
        }
        if self.last_rendered == Some(target) {
            return;
        }

        let frame = self.frames.render_frame();
        if self
            .media
            .read_frame(&mut self.vol, &mut self.dev, target, frame.bytes_mut())
            .is_err()
        {
            // A lost frame is a blank frame, never a stall.
            frame.clear();
            self.video_read_errors += 1;
        }
        self.frames.swap_buffers();
        self.sync.frame_rendered();
        self.last_rendered = Some(target);
    }

    /// Kick the I²C DMA when idle and a frame is queued.
    fn pump_display(&mut self) {
        if let Some(frame) = self.frames.start_transfer() {
            if self.transport.begin(frame.bytes()).is_err() {
                // Release the slot; the frame is dropped, not retried.
                self.display_errors += 1;
                self.frames.shared().transfer_complete();
            }
        }
    }

    /// 2 Hz heartbeat derived from the sample clock.
    fn update_led(&mut self) {
        let half_second = (self.media.header().sample_rate.get() / 2).max(1);
        let phase = self.sync.samples_played() / half_second;
        let _ = if phase % 2 == 1 {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
    }
}
