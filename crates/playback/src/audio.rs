//! Double-buffered circular audio pipeline.
//!
//! Two equal rings (one per DAC channel) are armed as circular DMA streams
//! off the same timer trigger, so the channels advance in lock step. Only
//! the LEFT channel raises half-complete / transfer-complete interrupts;
//! the ISR entry points live on [`AudioShared`] and communicate with the
//! foreground through word-sized atomics:
//!
//! ```text
//! half-complete      →  DAC now plays [N, 2N)  →  foreground refills [0, N)
//! transfer-complete  →  DAC now plays [0, N)   →  foreground refills [N, 2N)
//! ```
//!
//! The half being played is never written: ownership of the other half
//! passes to the foreground at the interrupt and returns at
//! [`AudioEngine::buffer_filled`], which issues a data memory barrier before
//! clearing the flag.

use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU8, Ordering};

use platform::layout::{AUDIO_HALF_SAMPLES, AUDIO_RING_SAMPLES, DAC_SILENCE};

use crate::sync::SampleClock;

/// Which half of the rings the foreground must fill next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FillHalf {
    /// Samples `[0, N)`.
    First,
    /// Samples `[N, 2N)`.
    Second,
}

/// Audio pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioState {
    /// Fresh; rings not yet initialized.
    Reset,
    /// Rings silenced and ready to arm.
    Ready,
    /// DMA streaming.
    Playing,
    /// Fatal stream failure; only recoverable by re-init.
    Error,
}

/// Error from an audio state transition attempted out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidState;

/// Counter snapshot for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioStats {
    /// Samples the DAC has consumed (N per half interrupt).
    pub samples_played: u32,
    /// Foreground refills completed.
    pub refill_count: u32,
    /// Interrupts that found the previous refill still pending.
    pub underrun_count: u32,
}

// ── AudioShared ──────────────────────────────────────────────────────────────

/// The ISR-facing half of the audio pipeline.
///
/// Lives in a `static` so the DMA ISR can reach it; every field is a
/// word-sized atomic, so no masking is needed on either side.
pub struct AudioShared {
    needs_refill: AtomicBool,
    /// 0 = first half, 1 = second half.
    fill_half: AtomicU8,
    samples_played: AtomicU32,
    refill_count: AtomicU32,
    underrun_count: AtomicU32,
}

impl AudioShared {
    /// Quiescent state: no refill pending.
    pub const fn new() -> Self {
        Self {
            needs_refill: AtomicBool::new(false),
            fill_half: AtomicU8::new(0),
            samples_played: AtomicU32::new(0),
            refill_count: AtomicU32::new(0),
            underrun_count: AtomicU32::new(0),
        }
    }

    /// ISR entry: the DAC finished `[0, N)` and wrapped into `[N, 2N)`.
    ///
    /// Deposits the half into `clock` when one is attached.
    pub fn half_complete(&self, clock: Option<&SampleClock>) {
        self.isr_event(FillHalf::First, clock);
    }

    /// ISR entry: the DAC finished `[N, 2N)` and wrapped to `[0, N)`.
    pub fn transfer_complete(&self, clock: Option<&SampleClock>) {
        self.isr_event(FillHalf::Second, clock);
    }

    fn isr_event(&self, half: FillHalf, clock: Option<&SampleClock>) {
        // A still-set flag means the previous half was never refilled: the
        // DAC is about to replay stale samples. Count it and keep going —
        // every further interrupt with the flag still set is another replay.
        if self.needs_refill.swap(true, Ordering::AcqRel) {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        self.fill_half.store(half as u8, Ordering::Release);
        self.samples_played
            .fetch_add(AUDIO_HALF_SAMPLES as u32, Ordering::Release);
        if let Some(clock) = clock {
            clock.add_samples(AUDIO_HALF_SAMPLES as u32);
        }
    }

    /// True while a refill is owed to the DAC.
    pub fn needs_refill(&self) -> bool {
        self.needs_refill.load(Ordering::Acquire)
    }

    /// The half the foreground owns right now.
    pub fn fill_half(&self) -> FillHalf {
        if self.fill_half.load(Ordering::Acquire) == 0 {
            FillHalf::First
        } else {
            FillHalf::Second
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> AudioStats {
        AudioStats {
            samples_played: self.samples_played.load(Ordering::Relaxed),
            refill_count: self.refill_count.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
        }
    }

    fn refill_done(&self) {
        // Ring writes must be visible to the DMA engine before the flag
        // clears and the ISR may hand us the other half.
        fence(Ordering::SeqCst);
        self.needs_refill.store(false, Ordering::Release);
        self.refill_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for AudioShared {
    fn default() -> Self {
        Self::new()
    }
}

// ── AudioEngine ──────────────────────────────────────────────────────────────

/// The foreground half: owns the sample rings and the lifecycle.
pub struct AudioEngine<'a> {
    left: [u16; AUDIO_RING_SAMPLES],
    right: [u16; AUDIO_RING_SAMPLES],
    state: AudioState,
    shared: &'a AudioShared,
}

impl<'a> AudioEngine<'a> {
    /// A fresh engine bound to its ISR half. Call [`Self::init`] before use.
    pub fn new(shared: &'a AudioShared) -> Self {
        Self {
            left: [0; AUDIO_RING_SAMPLES],
            right: [0; AUDIO_RING_SAMPLES],
            state: AudioState::Reset,
            shared,
        }
    }

    /// Silence both rings and become ready.
    ///
    /// Pre-start playback emits the DAC midpoint, so whatever the DMA plays
    /// before the first real refill is inaudible.
    pub fn init(&mut self) {
        self.left.fill(DAC_SILENCE);
        self.right.fill(DAC_SILENCE);
        self.state = AudioState::Ready;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AudioState {
        self.state
    }

    /// The shared half, for wiring ISR entry points.
    pub fn shared(&self) -> &'a AudioShared {
        self.shared
    }

    /// Both full rings, for arming the circular DMA streams.
    pub fn rings(&self) -> (&[u16; AUDIO_RING_SAMPLES], &[u16; AUDIO_RING_SAMPLES]) {
        (&self.left, &self.right)
    }

    /// Mark the stream started. The caller arms the DMA + timer around this.
    ///
    /// # Errors
    ///
    /// [`InvalidState`] unless currently `Ready` — both halves must have
    /// been filled (or silenced by [`Self::init`]) first.
    pub fn start(&mut self) -> Result<(), InvalidState> {
        if self.state != AudioState::Ready {
            return Err(InvalidState);
        }
        self.state = AudioState::Playing;
        Ok(())
    }

    /// Mark the stream stopped.
    ///
    /// # Errors
    ///
    /// [`InvalidState`] unless currently `Playing`.
    pub fn stop(&mut self) -> Result<(), InvalidState> {
        if self.state != AudioState::Playing {
            return Err(InvalidState);
        }
        self.state = AudioState::Ready;
        Ok(())
    }

    /// Record a fatal stream failure.
    pub fn fault(&mut self) {
        self.state = AudioState::Error;
    }

    /// True while a refill is owed.
    pub fn needs_refill(&self) -> bool {
        self.shared.needs_refill()
    }

    /// Mutable view of one half of both rings (for prefill and refill).
    #[allow(clippy::indexing_slicing)] // both ranges are compile-time halves of the fixed-size rings
    pub fn half_slices_mut(&mut self, half: FillHalf) -> (&mut [u16], &mut [u16]) {
        let range = match half {
            FillHalf::First => 0..AUDIO_HALF_SAMPLES,
            FillHalf::Second => AUDIO_HALF_SAMPLES..AUDIO_RING_SAMPLES,
        };
        (&mut self.left[range.clone()], &mut self.right[range])
    }

    /// When a refill is pending, the writable half of both rings.
    ///
    /// The returned slices are the foreground's until
    /// [`Self::buffer_filled`]; the DMA engine is reading the other half.
    pub fn refill_slices(&mut self) -> Option<(&mut [u16], &mut [u16])> {
        if !self.shared.needs_refill() {
            return None;
        }
        let half = self.shared.fill_half();
        Some(self.half_slices_mut(half))
    }

    /// Return ring ownership to the DMA engine after a refill.
    pub fn buffer_filled(&mut self) {
        self.shared.refill_done();
    }
}
