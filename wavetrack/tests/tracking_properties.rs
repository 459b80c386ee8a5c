mod common;

use common::*;
use std::collections::HashSet;
use std::io::Cursor;
use wavetrack::{
    io, track_recording, AssignmentEngine, JsonLinesSource, TrackState, TrackerConfig,
    TrackingPipeline, WavetrackConfig,
};

fn config_with_gap(tracking_gap: u32, cleanup_gap: u32, min_len: usize) -> WavetrackConfig {
    let mut config = WavetrackConfig::default();
    config.tracking.gap_tolerance = tracking_gap;
    config.cleanup.gap_tolerance = cleanup_gap;
    config.cleanup.min_track_len = min_len;
    config
}

#[test]
fn test_tracking_is_deterministic() {
    let frames = noisy_recording(6, 300, 11);

    let run = || {
        let mut engine = AssignmentEngine::new(TrackerConfig::default()).unwrap();
        for frame in frames.clone() {
            engine.process(frame).unwrap();
        }
        serde_json::to_string(&engine.finish()).unwrap()
    };
    assert_eq!(run(), run());

    let config = WavetrackConfig::default();
    let first = track_recording(frames.clone(), &config).unwrap();
    let second = track_recording(frames, &config).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_every_detection_claimed_at_most_once() {
    let frames = noisy_recording(8, 200, 3);
    let store = track_recording(frames, &WavetrackConfig::default()).unwrap();

    let mut seen = HashSet::new();
    for track in store.tracks() {
        assert_eq!(track.state, TrackState::Final);
        for d in track.detections() {
            assert!(
                seen.insert((d.frame_index, d.frequency.to_bits())),
                "detection at frame {} claimed twice",
                d.frame_index
            );
        }
    }
}

#[test]
fn test_identity_sequences_are_strictly_increasing() {
    let frames = noisy_recording(8, 200, 5);
    let store = track_recording(frames, &WavetrackConfig::default()).unwrap();
    assert!(!store.is_empty());
    for track in store.tracks() {
        assert!(track
            .detections()
            .windows(2)
            .all(|w| w[0].frame_index < w[1].frame_index));
    }
}

#[test]
fn test_gap_tolerance_boundary() {
    let tolerance = 3;
    // Fish A misses exactly `tolerance` frames, fish B one more
    let frames = recording(
        &[
            Fish {
                frequency: |_| 600.0,
                signature: SIG_A,
                frames: (0..=9).chain(13..=25).collect(),
            },
            Fish {
                frequency: |_| 700.0,
                signature: SIG_B,
                frames: (0..=9).chain(14..=25).collect(),
            },
        ],
        26,
    );
    let store = track_recording(frames, &config_with_gap(tolerance, tolerance, 5)).unwrap();

    let at_600: Vec<_> = store
        .tracks()
        .filter(|t| (t.detections()[0].frequency - 600.0).abs() < 1e-9)
        .collect();
    assert_eq!(at_600.len(), 1);
    assert_eq!((at_600[0].first_frame(), at_600[0].last_frame()), (0, 25));

    let at_700: Vec<_> = store
        .tracks()
        .filter(|t| (t.detections()[0].frequency - 700.0).abs() < 1e-9)
        .collect();
    assert_eq!(at_700.len(), 2);
    assert_eq!(at_700[0].last_frame(), 9);
    assert_eq!(at_700[1].first_frame(), 14);
}

#[test]
fn test_crossing_keeps_signature_consistent_identities() {
    // Frequencies cross at frame 10; signatures stay distinct throughout
    let frames = recording(
        &[
            Fish {
                frequency: |k| 600.0 + 0.5 * k as f64,
                signature: SIG_A,
                frames: (0..=20).collect(),
            },
            Fish {
                frequency: |k| 610.0 - 0.5 * k as f64,
                signature: SIG_B,
                frames: (0..=20).collect(),
            },
        ],
        21,
    );
    let store = track_recording(frames, &WavetrackConfig::default()).unwrap();

    assert_eq!(store.len(), 2);
    let rising = store.get(1).unwrap();
    let falling = store.get(2).unwrap();
    assert_eq!(rising.len(), 21);
    assert_eq!(falling.len(), 21);
    assert!(rising.detections().iter().all(|d| d.signature == SIG_A));
    assert!(falling.detections().iter().all(|d| d.signature == SIG_B));
    // After the crossing the signature-consistent identity is above the other
    assert!(rising.last().unwrap().frequency > falling.last().unwrap().frequency);
}

#[test]
fn test_bounce_keeps_signature_consistent_identities() {
    // The fish touch at 605 Hz in frame 10 and turn back, so slope
    // extrapolation points each identity at the other fish's detection
    let fish = [
        Fish {
            frequency: |k| 605.0 - 0.5 * (k as f64 - 10.0).abs(),
            signature: SIG_A,
            frames: (0..=20).collect(),
        },
        Fish {
            frequency: |k| 605.0 + 0.5 * (k as f64 - 10.0).abs(),
            signature: SIG_B,
            frames: (0..=20).collect(),
        },
    ];

    for extrapolate in [true, false] {
        let mut config = WavetrackConfig::default();
        config.tracking.extrapolate = extrapolate;
        let store = track_recording(recording(&fish, 21), &config).unwrap();

        assert_eq!(store.len(), 2, "extrapolate = {extrapolate}");
        let lower = store.get(1).unwrap();
        let upper = store.get(2).unwrap();
        assert_eq!((lower.len(), upper.len()), (21, 21));
        assert!(lower.detections().iter().all(|d| d.signature == SIG_A));
        assert!(upper.detections().iter().all(|d| d.signature == SIG_B));
        // Back where they started: the identities did not follow straight lines
        assert!(lower.last().unwrap().frequency < upper.last().unwrap().frequency);
    }
}

#[test]
fn test_dropouts_beside_neighbouring_fish_merge() {
    // Fish A loses two frames every 20; fish B is detected throughout, 3 Hz above
    let frames = recording(
        &[
            Fish {
                frequency: |_| 600.0,
                signature: SIG_A,
                frames: (0..100).filter(|k| k % 20 < 18).collect(),
            },
            Fish {
                frequency: |_| 603.0,
                signature: SIG_B,
                frames: (0..100).collect(),
            },
        ],
        100,
    );
    let store = track_recording(frames, &config_with_gap(1, 3, 5)).unwrap();

    assert_eq!(store.len(), 2);
    let fish_a = store.get(1).unwrap();
    assert_eq!((fish_a.first_frame(), fish_a.last_frame()), (0, 97));
    assert_eq!(fish_a.len(), 90);
    assert!(fish_a.detections().iter().all(|d| d.signature == SIG_A));
    assert_eq!(store.get(2).unwrap().len(), 100);
}

#[test]
fn test_noise_rejection_threshold() {
    let frames = recording(
        &[
            Fish {
                frequency: |_| 600.0,
                signature: SIG_A,
                frames: (0..20).collect(),
            },
            Fish {
                frequency: |_| 800.0,
                signature: SIG_B,
                frames: vec![5],
            },
            Fish {
                frequency: |_| 900.0,
                signature: SIG_C,
                frames: vec![10, 11, 12],
            },
        ],
        20,
    );
    let store = track_recording(frames, &config_with_gap(2, 2, 3)).unwrap();

    assert_eq!(store.ids(), vec![1, 3]);
    assert_eq!(store.get(3).unwrap().len(), 3);
}

#[test]
fn test_fragments_across_short_gap_merge() {
    // The engine retires after one missed frame; cleanup bridges two
    let tracked = |second_start: u64| {
        let frames = recording(
            &[Fish {
                frequency: |k| 600.0 + 0.1 * k as f64,
                signature: SIG_A,
                frames: (0..=9).chain(second_start..=20).collect(),
            }],
            21,
        );
        track_recording(frames, &config_with_gap(1, 2, 3)).unwrap()
    };

    let merged = tracked(12);
    assert_eq!(merged.len(), 1);
    let only = merged.tracks().next().unwrap();
    assert_eq!((only.first_frame(), only.last_frame()), (0, 20));
    assert_eq!(only.len(), 19);

    let separate = tracked(13);
    assert_eq!(separate.len(), 2);
}

#[test]
fn test_timestamp_lookup_on_final_store() {
    let frames = recording(
        &[
            Fish {
                frequency: |_| 600.0,
                signature: SIG_A,
                frames: (0..20).collect(),
            },
            Fish {
                frequency: |_| 650.0,
                signature: SIG_B,
                frames: (10..20).collect(),
            },
        ],
        20,
    );
    let store = track_recording(frames, &config_with_gap(2, 2, 3)).unwrap();

    assert_eq!(store.identities_at_time(0.52), vec![1]);
    assert_eq!(store.identities_at_time(1.5), vec![1, 2]);
    assert_eq!(store.time_index().len(), 20);
}

#[test]
fn test_json_lines_round_trip_through_pipeline() {
    let frames = recording(
        &[Fish {
            frequency: |k| 640.0 - 0.2 * k as f64,
            signature: SIG_C,
            frames: (0..15).collect(),
        }],
        15,
    );
    let input: String = frames
        .iter()
        .map(|f| serde_json::to_string(f).unwrap() + "\n")
        .collect();

    let pipeline = TrackingPipeline::new(config_with_gap(2, 2, 3)).unwrap();
    let (store, report) = pipeline
        .run(&mut JsonLinesSource::new(Cursor::new(input)))
        .unwrap();
    assert_eq!(report.frames, 15);

    let mut out = Vec::new();
    io::write_tracks(&mut out, &store).unwrap();
    let export = io::read_tracks(out.as_slice()).unwrap();
    assert_eq!(export.tracks.len(), 1);
    assert_eq!(export.tracks[0].samples.len(), 15);
    assert_eq!(export.tracks[0].samples[3].timestamp, Some(3.0 * 0.1));
}
