//! Audio-master A/V synchronization.
//!
//! The DAC sample rate cannot be slewed, so audio is the wall clock. Every
//! half-buffer interrupt deposits its sample count into the [`SampleClock`];
//! the foreground derives an audio frame index from it and steers video by
//! rendering, skipping, or repeating frames.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use platform::types::SampleRateHz;

/// Default drift tolerance in frames when the caller passes 0.
const DEFAULT_MAX_DRIFT: u32 = 2;

// ── SampleClock ──────────────────────────────────────────────────────────────

/// The ISR-shared half of the synchronizer: a monotone sample counter gated
/// by a running flag.
///
/// The audio ISR deposits samples through a shared reference; the foreground
/// owns everything else in [`AvSync`]. Readers tolerate a one-increment race
/// because the counter is a single native word.
#[derive(Debug)]
pub struct SampleClock {
    samples: AtomicU32,
    running: AtomicBool,
}

impl SampleClock {
    /// A stopped clock at zero samples.
    pub const fn new() -> Self {
        Self {
            samples: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Deposit `n` played samples. Ignored while the clock is stopped, so
    /// the counter only moves during playback.
    pub fn add_samples(&self, n: u32) {
        if self.running.load(Ordering::Relaxed) {
            self.samples.fetch_add(n, Ordering::Release);
        }
    }

    /// Total samples played while running.
    pub fn samples(&self) -> u32 {
        self.samples.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn reset(&self) {
        self.samples.store(0, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

// ── AvSync ───────────────────────────────────────────────────────────────────

/// Synchronizer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncState {
    /// Configured and ready to start.
    Ready,
    /// Playback in progress; the sample clock is live.
    Running,
    /// Stopped; the clock is frozen.
    Stopped,
}

/// Per-tick steering decision for the video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameDecision {
    /// The synchronizer is not running.
    NotStarted,
    /// Video is inside the drift band: render the next frame.
    Render,
    /// Video is behind: advance without rendering.
    Skip,
    /// Video is ahead: hold the currently displayed frame.
    Repeat,
}

/// Errors from synchronizer configuration and state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError {
    /// Sample rate and frame rate produce no whole samples per frame.
    InvalidConfig,
    /// The requested transition is not legal from the current state.
    InvalidState,
}

/// Drift bookkeeping across the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncStats {
    /// Frames advanced without rendering.
    pub frames_skipped: u32,
    /// Most negative drift observed (video behind).
    pub min_drift: i32,
    /// Most positive drift observed (video ahead).
    pub max_drift: i32,
}

/// The foreground half of the synchronizer.
#[derive(Debug)]
pub struct AvSync<'a> {
    clock: &'a SampleClock,
    samples_per_frame: u32,
    max_drift: i32,
    state: SyncState,
    video_frames_rendered: u32,
    stats: SyncStats,
}

impl<'a> AvSync<'a> {
    /// Configure against a sample clock.
    ///
    /// `samples_per_frame` is the nearest integer to `rate / fps` (32 kHz at
    /// 30 fps gives 1067). A `max_drift_frames` of 0 selects the default
    /// tolerance of 2.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] when `fps` is 0 or the division rounds
    /// to zero samples per frame.
    #[allow(clippy::arithmetic_side_effects)] // fps != 0 is checked first; rate + fps/2 fits u32 by the SampleRateHz range
    pub fn new(
        clock: &'a SampleClock,
        sample_rate: SampleRateHz,
        fps: u32,
        max_drift_frames: u32,
    ) -> Result<Self, SyncError> {
        if fps == 0 {
            return Err(SyncError::InvalidConfig);
        }
        let samples_per_frame = (sample_rate.get() + fps / 2) / fps;
        if samples_per_frame == 0 {
            return Err(SyncError::InvalidConfig);
        }
        let max_drift = if max_drift_frames == 0 {
            DEFAULT_MAX_DRIFT
        } else {
            max_drift_frames
        };

        clock.reset();
        Ok(Self {
            clock,
            samples_per_frame,
            max_drift: max_drift as i32,
            state: SyncState::Ready,
            video_frames_rendered: 0,
            stats: SyncStats::default(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whole samples per video frame.
    pub fn samples_per_frame(&self) -> u32 {
        self.samples_per_frame
    }

    /// Samples deposited by the audio ISR so far.
    pub fn samples_played(&self) -> u32 {
        self.clock.samples()
    }

    /// The frame the audio clock says should be on screen now.
    #[allow(clippy::arithmetic_side_effects)] // samples_per_frame >= 1 is an init invariant
    pub fn audio_frame_index(&self) -> u32 {
        self.clock.samples() / self.samples_per_frame
    }

    /// Frames the video stream has committed to (rendered or skipped).
    pub fn video_frames_rendered(&self) -> u32 {
        self.video_frames_rendered
    }

    /// Drift statistics so far.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Unfreeze the sample clock and begin steering.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidState`] unless currently `Ready`.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.state != SyncState::Ready {
            return Err(SyncError::InvalidState);
        }
        self.state = SyncState::Running;
        self.clock.set_running(true);
        Ok(())
    }

    /// Freeze the clock. Idempotent.
    pub fn stop(&mut self) {
        self.clock.set_running(false);
        self.state = SyncState::Stopped;
    }

    /// One steering decision.
    ///
    /// The drift band is inclusive: `|drift| == max_drift` still renders.
    #[allow(clippy::arithmetic_side_effects)] // the drift subtraction runs in i64 over u32-range operands
    pub fn frame_decision(&mut self) -> FrameDecision {
        if self.state != SyncState::Running {
            return FrameDecision::NotStarted;
        }

        let audio_index = self.audio_frame_index();
        let drift_wide = i64::from(self.video_frames_rendered) - i64::from(audio_index);
        let drift = drift_wide.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;

        self.stats.min_drift = self.stats.min_drift.min(drift);
        self.stats.max_drift = self.stats.max_drift.max(drift);

        if drift < -self.max_drift {
            FrameDecision::Skip
        } else if drift > self.max_drift {
            FrameDecision::Repeat
        } else {
            FrameDecision::Render
        }
    }

    /// Commit one rendered frame.
    #[allow(clippy::arithmetic_side_effects)] // bounded by the media frame count plus the drift band
    pub fn frame_rendered(&mut self) {
        self.video_frames_rendered += 1;
    }

    /// Commit one skipped frame.
    #[allow(clippy::arithmetic_side_effects)] // bounded by the media frame count plus the drift band
    pub fn frame_skipped(&mut self) {
        self.video_frames_rendered += 1;
        self.stats.frames_skipped += 1;
    }
}
