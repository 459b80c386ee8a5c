//! Frame-by-frame assignment of detections to fish identities
//!
//! Each frame runs the same steps as a SORT-style tracker:
//! 1. retire identities unseen for longer than the gap tolerance,
//! 2. predict frequency and signature of every active identity,
//! 3. build the identity x detection cost matrix,
//! 4. solve it as a minimum-cost bipartite matching,
//! 5. extend matched identities and spawn new ones for the rest.

use crate::config::TrackerConfig;
use crate::detection::{signature_distances, Detection, Frame};
use crate::error::{Result, TrackingError};
use crate::hungarian::{AssignmentResult, HungarianSolver};
use crate::store::{TrackStore, TrackWarning};
use crate::track::{Prediction, Track, TrackId};
use ndarray::prelude::*;
use rayon::prelude::*;

/// Summary of what one call to [`AssignmentEngine::process`] changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// (identity, detection position) pairs; positions refer to the
    /// frequency-sorted detections of the frame
    pub matched: Vec<(TrackId, usize)>,
    pub spawned: Vec<TrackId>,
    pub retired: Vec<TrackId>,
    pub ambiguous: usize,
}

/// Stateful per-frame assignment engine owning the in-progress track store
#[derive(Debug, Clone)]
pub struct AssignmentEngine {
    config: TrackerConfig,
    store: TrackStore,
    next_track_id: TrackId,
    electrode_count: Option<usize>,
    last_frame: Option<u64>,
    n_steps: u64,
}

impl AssignmentEngine {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(AssignmentEngine {
            electrode_count: config.electrode_count,
            config,
            store: TrackStore::new(),
            next_track_id: 1,
            last_frame: None,
            n_steps: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn electrode_count(&self) -> Option<usize> {
        self.electrode_count
    }

    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    pub fn active_ids(&self) -> Vec<TrackId> {
        self.store.active_ids()
    }

    /// End of recording: retire every identity and hand the store over
    pub fn finish(mut self) -> TrackStore {
        for track in self.store.tracks_mut() {
            track.retire();
        }
        log::info!(
            "Tracking finished after {} frames: {} identities, {} detections assigned",
            self.n_steps,
            self.store.len(),
            self.store.detection_count()
        );
        self.store
    }

    /// Check ordering and detection validity; nothing is mutated
    fn validate_frame(&self, frame: &Frame) -> Result<Option<usize>> {
        if let Some(previous) = self.last_frame {
            if frame.index <= previous {
                return Err(TrackingError::Sequence {
                    previous,
                    received: frame.index,
                });
            }
        }

        let mut electrodes = self.electrode_count;
        for detection in &frame.detections {
            if detection.frame_index != frame.index {
                return Err(TrackingError::invalid_detection(
                    frame.index,
                    format!("detection belongs to frame {}", detection.frame_index),
                ));
            }
            if !detection.frequency.is_finite() || detection.frequency <= 0.0 {
                return Err(TrackingError::invalid_detection(
                    frame.index,
                    format!("frequency must be positive and finite, got {}", detection.frequency),
                ));
            }
            if detection.signature.iter().any(|a| !a.is_finite()) {
                return Err(TrackingError::invalid_detection(
                    frame.index,
                    "signature contains non-finite amplitudes",
                ));
            }
            match electrodes {
                Some(expected) if expected != detection.electrode_count() => {
                    return Err(TrackingError::DimensionMismatch {
                        frame_index: frame.index,
                        expected,
                        actual: detection.electrode_count(),
                    });
                }
                Some(_) => {}
                None => electrodes = Some(detection.electrode_count()),
            }
        }
        Ok(electrodes)
    }

    /// Retire identities whose missed run exceeds the gap tolerance at `frame_index`
    fn retire_stale(&mut self, frame_index: u64) -> Vec<TrackId> {
        let tolerance = self.config.gap_tolerance as u64;
        let mut retired = Vec::new();
        for track in self.store.tracks_mut().filter(|t| t.is_active()) {
            let missed = frame_index.saturating_sub(track.last_frame() + 1);
            if missed > tolerance {
                track.retire();
                retired.push(track.id);
            }
        }
        retired
    }

    /// Predict all active identities at `frame_index`, ascending by id
    fn predict_active(&self, frame_index: u64) -> Vec<(TrackId, Prediction)> {
        let active: Vec<&Track> = self.store.tracks().filter(|t| t.is_active()).collect();
        let window = self.config.slope_window;
        let extrapolate = self.config.extrapolate;
        active
            .par_iter()
            .filter_map(|track| {
                track
                    .predict(frame_index, window, extrapolate)
                    .map(|p| (track.id, p))
            })
            .collect()
    }

    /// Identities whose predicted frequency lies within the crossing band of another
    fn crossing_flags(&self, predictions: &[(TrackId, Prediction)]) -> Vec<bool> {
        let band = self.config.crossing_band_hz;
        predictions
            .iter()
            .enumerate()
            .map(|(i, (_, p))| {
                predictions
                    .iter()
                    .enumerate()
                    .any(|(j, (_, q))| i != j && (p.frequency - q.frequency).abs() <= band)
            })
            .collect()
    }

    /// Highest cost an allowed pair can reach
    fn cost_threshold(&self) -> f64 {
        1.0 + self.config.signature_weight
    }

    /// Identity x detection cost matrix; disallowed pairs are infinite
    pub fn cost_matrix(
        &self,
        predictions: &[(TrackId, Prediction)],
        detections: &[Detection],
    ) -> Array2<f64> {
        let n_tracks = predictions.len();
        let n_dets = detections.len();
        if n_tracks == 0 || n_dets == 0 {
            return Array2::zeros((n_tracks, n_dets));
        }

        let in_crossing = self.crossing_flags(predictions);
        let predicted: Vec<ArrayView1<f32>> =
            predictions.iter().map(|(_, p)| p.signature.view()).collect();
        let observed: Vec<ArrayView1<f32>> =
            detections.iter().map(|d| d.signature_view()).collect();
        let sig_costs = signature_distances(&predicted, &observed);

        let max_jump = self.config.max_freq_jump_hz;
        let sig_weight = self.config.signature_weight;
        let crossing_weight = self.config.crossing_freq_weight;

        let data: Vec<f64> = (0..n_tracks)
            .into_par_iter()
            .flat_map_iter(|i| {
                let prediction = &predictions[i].1;
                let allowed_jump = max_jump * prediction.elapsed.max(1) as f64;
                let freq_weight = if in_crossing[i] { crossing_weight } else { 1.0 };
                let sig_costs = &sig_costs;
                detections.iter().enumerate().map(move |(j, detection)| {
                    let freq_cost = (detection.frequency - prediction.frequency).abs() / allowed_jump;
                    if freq_cost <= 1.0 {
                        freq_weight * freq_cost + sig_weight * sig_costs[[i, j]]
                    } else {
                        f64::INFINITY
                    }
                })
            })
            .collect();

        Array2::from_shape_vec((n_tracks, n_dets), data)
            .unwrap_or_else(|_| Array2::from_elem((n_tracks, n_dets), f64::INFINITY))
    }

    /// Canonicalise equally good matchings: the lower id takes the lower-frequency detection
    fn resolve_ties(
        &mut self,
        frame_index: u64,
        ids: &[TrackId],
        costs: ArrayView2<f64>,
        mut result: AssignmentResult,
    ) -> (AssignmentResult, usize) {
        let threshold = self.cost_threshold();
        let tolerance = self.config.tie_tolerance;
        let ties = HungarianSolver::tied_exchanges(costs, &result, threshold, tolerance);

        let mut count = 0;
        for (a, b, _) in ties {
            let (ra, ca) = result.assignments[a];
            let (rb, cb) = result.assignments[b];
            // Re-check against the current pairing; earlier exchanges may have moved columns
            let current = costs[[ra, ca]] + costs[[rb, cb]];
            let swapped = costs[[ra, cb]] + costs[[rb, ca]];
            let difference = (swapped - current).abs();
            if !swapped.is_finite() || difference > tolerance {
                continue;
            }
            count += 1;
            self.store.warn(TrackWarning::AmbiguousAssignment {
                frame_index,
                identities: vec![ids[ra], ids[rb]],
                cost_difference: difference,
            });
            // Rows are in ascending id order, so ra belongs to the lower id
            if ca > cb {
                result.assignments[a].1 = cb;
                result.assignments[b].1 = ca;
            }
        }
        (result, count)
    }

    /// Consume one frame and update the active identities
    ///
    /// On error the store is left exactly as it was after the previous frame.
    pub fn process(&mut self, mut frame: Frame) -> Result<FrameReport> {
        let electrodes = self.validate_frame(&frame)?;

        frame.detections.sort_by(|a, b| {
            a.frequency
                .total_cmp(&b.frequency)
                .then(b.quality.total_cmp(&a.quality))
        });

        let retired = self.retire_stale(frame.index);
        let predictions = self.predict_active(frame.index);
        let ids: Vec<TrackId> = predictions.iter().map(|(id, _)| *id).collect();

        let costs = self.cost_matrix(&predictions, &frame.detections);
        let result = HungarianSolver::solve(costs.view(), self.cost_threshold());
        let (result, ambiguous) = self.resolve_ties(frame.index, &ids, costs.view(), result);

        let detection_count = frame.detections.len();
        let mut pending: Vec<Option<Detection>> = frame.detections.into_iter().map(Some).collect();

        let mut matched = Vec::with_capacity(result.assignments.len());
        for &(row, col) in &result.assignments {
            let id = ids[row];
            let Some(detection) = pending[col].take() else {
                continue;
            };
            match self.store.get_mut(id) {
                Some(track) => {
                    track.push(detection)?;
                    matched.push((id, col));
                }
                None => pending[col] = Some(detection),
            }
        }

        let mut spawned = Vec::new();
        for detection in pending.into_iter().flatten() {
            let id = self.next_track_id;
            self.next_track_id += 1;
            self.store.insert(Track::new(id, detection));
            spawned.push(id);
        }

        self.electrode_count = electrodes;
        self.store.record_timestamp(frame.index, frame.timestamp);
        self.last_frame = Some(frame.index);
        self.n_steps += 1;

        log::debug!(
            "Frame {}: {} detections, {} matched, {} spawned, {} retired",
            frame.index,
            detection_count,
            matched.len(),
            spawned.len(),
            retired.len()
        );

        Ok(FrameReport {
            frame_index: frame.index,
            matched,
            spawned,
            retired,
            ambiguous,
        })
    }
}
