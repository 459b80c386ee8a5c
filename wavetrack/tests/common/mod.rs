#![allow(dead_code)]

use rand::prelude::*;
use wavetrack::{Detection, Frame, Track, TrackId};

pub const SIG_A: [f32; 4] = [1.0, 0.2, 0.1, 0.0];
pub const SIG_B: [f32; 4] = [0.0, 0.1, 0.2, 1.0];
pub const SIG_C: [f32; 4] = [0.3, 1.0, 0.8, 0.2];

/// One synthetic fish: frequency as a function of the frame, a signature,
/// and the frames in which it is detected
pub struct Fish {
    pub frequency: fn(u64) -> f64,
    pub signature: [f32; 4],
    pub frames: Vec<u64>,
}

pub fn recording(fish: &[Fish], n_frames: u64) -> Vec<Frame> {
    (0..n_frames)
        .map(|frame| {
            let detections = fish
                .iter()
                .filter(|f| f.frames.contains(&frame))
                .map(|f| Detection::new((f.frequency)(frame), f.signature.to_vec(), 1.0))
                .collect();
            Frame::new(frame, frame as f64 * 0.1, detections)
        })
        .collect()
}

/// Several drifting fish with amplitude noise and random dropouts
pub fn noisy_recording(n_fish: usize, n_frames: u64, seed: u64) -> Vec<Frame> {
    let mut rng = StdRng::seed_from_u64(seed);
    let base: Vec<(f64, f64, Vec<f32>)> = (0..n_fish)
        .map(|i| {
            let signature = (0..4).map(|_| rng.gen_range(0.1..1.0)).collect();
            (550.0 + 25.0 * i as f64, rng.gen_range(-0.2..0.2), signature)
        })
        .collect();

    (0..n_frames)
        .map(|frame| {
            let mut detections = Vec::new();
            for (start, slope, signature) in &base {
                if rng.gen_bool(0.1) {
                    continue;
                }
                let frequency = start + slope * frame as f64 + rng.gen_range(-0.1..0.1);
                let signature = signature.iter().map(|a| a * rng.gen_range(0.95..1.05)).collect();
                detections.push(Detection::new(frequency, signature, rng.gen_range(0.5..1.0)));
            }
            // Occasional spurious harmonic group
            if rng.gen_bool(0.05) {
                detections.push(Detection::new(
                    rng.gen_range(400.0..800.0),
                    (0..4).map(|_| rng.gen_range(0.0..0.3)).collect(),
                    0.2,
                ));
            }
            Frame::new(frame, frame as f64 * 0.1, detections)
        })
        .collect()
}

pub fn det(frame: u64, frequency: f64, signature: &[f32]) -> Detection {
    Detection {
        frame_index: frame,
        frequency,
        signature: signature.to_vec(),
        quality: 1.0,
    }
}

pub fn track(id: TrackId, detections: Vec<Detection>) -> Track {
    Track::from_detections(id, detections).unwrap()
}
