//! End-to-end playback over a synthetic card image.
//!
//! The tests stand in for the hardware: the "DMA ISR" is a call to the
//! shared halves between foreground steps, paced one half-buffer at a time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use fat32::{ShortName, Volume};
use fatgen::{contiguous, encode_media, pattern_frame, ramp_pcm, FatImageBuilder, VolumeSpec};
use media::{sample::pcm_to_dac, MediaFile};
use platform::layout::{AUDIO_HALF_SAMPLES, MEDIA_FILENAME};
use platform::mocks::{ManualClock, MockBlockDevice, MockLed, RecordingTransport};
use platform::types::VolumePercent;
use playback::{
    AudioShared, DisplayShared, Player, SampleClock, StepOutcome,
};

const SAMPLE_RATE: u32 = 32_000;

/// Image with `frames` pattern frames and `samples` stereo pairs, contiguous
/// from cluster 3.
fn build_image(frames: usize, samples: usize) -> Vec<u8> {
    let frame_data: Vec<[u8; 1024]> = (0..frames).map(pattern_frame).collect();
    let media = encode_media(&frame_data, &ramp_pcm(samples), SAMPLE_RATE);
    let spec = VolumeSpec::default();
    let count = media.len().div_ceil(spec.cluster_bytes());
    let mut builder = FatImageBuilder::new(spec);
    builder.add_file(MEDIA_FILENAME, &media, &contiguous(3, count));
    builder.build()
}

struct Statics {
    audio: AudioShared,
    display: DisplayShared,
    clock: SampleClock,
}

impl Statics {
    fn new() -> Self {
        Self {
            audio: AudioShared::new(),
            display: DisplayShared::new(),
            clock: SampleClock::new(),
        }
    }
}

type TestPlayer<'a, 'i> =
    Player<'a, MockBlockDevice<'i>, RecordingTransport, ManualClock, MockLed>;

fn open_player<'a, 'i>(statics: &'a Statics, image: &'i [u8]) -> TestPlayer<'a, 'i> {
    let mut dev = MockBlockDevice::new(image);
    let mut vol = Volume::mount(&mut dev).expect("mount");
    let media = MediaFile::open(&mut vol, &mut dev, &ShortName::from_path(MEDIA_FILENAME))
        .expect("open media");
    Player::new(
        dev,
        vol,
        media,
        &statics.audio,
        &statics.display,
        &statics.clock,
        RecordingTransport::new(),
        ManualClock::new(),
        MockLed::new(),
    )
    .expect("assemble player")
}

/// Drive playback to completion: one half-buffer interrupt, then foreground
/// steps with a prompt display-completion ISR, repeated.
fn drive(statics: &Statics, player: &mut TestPlayer<'_, '_>) -> playback::PlaybackReport {
    player.prepare();
    player.start().expect("start");

    let mut first_half_done = true; // DMA starts at the ring base
    for _ in 0..10_000 {
        if first_half_done {
            statics.audio.half_complete(Some(&statics.clock));
        } else {
            statics.audio.transfer_complete(Some(&statics.clock));
        }
        first_half_done = !first_half_done;

        for _ in 0..8 {
            let outcome = player.step();
            if statics.display.is_transferring() {
                statics.display.transfer_complete();
            }
            if outcome == StepOutcome::Complete {
                return player.finish();
            }
        }
    }
    panic!("playback never completed");
}

#[test]
fn plays_a_whole_file_and_reports_clean_stats() {
    let image = build_image(10, 12_288);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);

    assert!(player.media().is_contiguous());
    let report = drive(&statics, &mut player);

    assert_eq!(report.frames_rendered, 10, "every frame rendered");
    assert_eq!(report.frames_skipped, 0, "foreground was never starved");
    assert_eq!(report.underrun_count, 0);
    assert_eq!(report.audio_read_errors, 0);
    assert_eq!(report.video_read_errors, 0);

    // Completion takes ceil(10 * 1067 / 2048) = 6 half-buffer interrupts.
    assert_eq!(report.samples_played, 6 * AUDIO_HALF_SAMPLES as u32);
    assert_eq!(report.refill_count, 6);
    assert_eq!(report.frames_transferred, 10);
}

#[test]
fn every_transferred_frame_is_the_encoded_frame() {
    let image = build_image(10, 12_288);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);
    drive(&statics, &mut player);

    let frames = &player.transport().frames;
    assert_eq!(frames.len(), 10);
    for (k, frame) in frames.iter().enumerate() {
        assert_eq!(frame, &pattern_frame(k), "transferred frame {k}");
    }
}

#[test]
fn prefill_loads_real_audio_into_both_halves() {
    let image = build_image(4, 8_192);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);
    player.prepare();

    let pcm = ramp_pcm(8_192);
    let (left, right) = player.engine().rings();
    for i in [0usize, 1, AUDIO_HALF_SAMPLES, 2 * AUDIO_HALF_SAMPLES - 1] {
        assert_eq!(left[i], pcm_to_dac(pcm[2 * i], VolumePercent::FULL), "L[{i}]");
        assert_eq!(right[i], pcm_to_dac(pcm[2 * i + 1], VolumePercent::FULL), "R[{i}]");
    }
}

#[test]
fn start_out_of_order_is_rejected() {
    let image = build_image(2, 1_000);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);
    // No prepare: the audio engine is still in Reset.
    assert!(player.start().is_err());
}

#[test]
fn a_sleepy_foreground_counts_underruns_then_recovers() {
    let image = build_image(10, 12_288);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);
    player.prepare();
    player.start().expect("start");

    // Three interrupts with the foreground asleep: two replays.
    statics.audio.half_complete(Some(&statics.clock));
    statics.audio.transfer_complete(Some(&statics.clock));
    statics.audio.half_complete(Some(&statics.clock));

    let report = drive_rest(&statics, &mut player);
    assert_eq!(report.underrun_count, 2);
    // The video timeline still completes: frames it could not render in
    // time were skipped, never stalled on.
    assert_eq!(report.frames_rendered + report.frames_skipped, 10);
    assert!(report.frames_skipped > 0, "the stall must have cost frames");
}

/// Continue an already-started run to completion.
fn drive_rest(statics: &Statics, player: &mut TestPlayer<'_, '_>) -> playback::PlaybackReport {
    let mut first_half_done = false;
    for _ in 0..10_000 {
        for _ in 0..8 {
            let outcome = player.step();
            if statics.display.is_transferring() {
                statics.display.transfer_complete();
            }
            if outcome == StepOutcome::Complete {
                return player.finish();
            }
        }
        if first_half_done {
            statics.audio.half_complete(Some(&statics.clock));
        } else {
            statics.audio.transfer_complete(Some(&statics.clock));
        }
        first_half_done = !first_half_done;
    }
    panic!("playback never completed");
}

#[test]
fn storage_loss_mid_playback_degrades_but_completes() {
    let image = build_image(10, 12_288);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);
    player.prepare();
    player.start().expect("start");

    // Pull the rug: every read from here on fails.
    let reads_so_far = player.device_mut().total_reads();
    player.device_mut().fail_after = Some(reads_so_far);

    let report = drive_rest(&statics, &mut player);
    assert!(report.audio_read_errors > 0, "audio degraded to silence");
    assert!(report.video_read_errors > 0, "video degraded to blank frames");
    assert_eq!(report.frames_rendered, 10, "the run still completes");

    // Post-failure frames went out blank.
    let frames = &player.transport().frames;
    assert!(frames.last().unwrap().iter().all(|&b| b == 0));
}

#[test]
fn completion_waits_for_the_audio_clock_not_the_video_counter() {
    // Plenty of audio beyond the video tail: the run ends exactly when the
    // audio frame index passes the last frame, repeats filling the gap.
    let image = build_image(4, 32_768);
    let statics = Statics::new();
    let mut player = open_player(&statics, &image);

    let report = drive(&statics, &mut player);
    assert_eq!(report.frames_rendered, 4);
    assert!(report.frames_repeated > 0, "video waited on audio");
    // 4 * 1067 = 4268 samples → completion on the 3rd half interrupt.
    assert_eq!(report.samples_played, 3 * AUDIO_HALF_SAMPLES as u32);
}
