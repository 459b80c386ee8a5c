//! A single fish identity and its frequency/signature prediction

use crate::detection::{mean_signature, Detection};
use crate::error::{Result, TrackingError};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Identity id; unique and never reused within one run
pub type TrackId = u32;

/// Lifecycle of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackState {
    /// Receiving detections, or within the gap tolerance
    #[default]
    Active,
    /// Unseen for longer than the gap tolerance
    Retired,
    /// Survived cleanup; exposed to consumers
    Final,
}

/// Expected state of an identity at a future frame
#[derive(Debug, Clone)]
pub struct Prediction {
    pub frequency: f64,
    pub signature: Array1<f32>,
    /// Frames between the last detection and the predicted frame
    pub elapsed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    /// Detections in strictly increasing frame order
    detections: Vec<Detection>,
}

impl Track {
    pub fn new(id: TrackId, detection: Detection) -> Self {
        Self {
            id,
            state: TrackState::Active,
            detections: vec![detection],
        }
    }

    /// Build a track from detections that may be unsorted
    ///
    /// Fails if two detections share a frame.
    pub fn from_detections(id: TrackId, mut detections: Vec<Detection>) -> Result<Self> {
        detections.sort_by_key(|d| d.frame_index);
        if let Some(pair) = detections
            .windows(2)
            .find(|w| w[0].frame_index == w[1].frame_index)
        {
            return Err(TrackingError::Sequence {
                previous: pair[0].frame_index,
                received: pair[1].frame_index,
            });
        }
        Ok(Self {
            id,
            state: TrackState::Active,
            detections,
        })
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn first(&self) -> Option<&Detection> {
        self.detections.first()
    }

    pub fn last(&self) -> Option<&Detection> {
        self.detections.last()
    }

    pub fn first_frame(&self) -> u64 {
        self.first().map_or(0, |d| d.frame_index)
    }

    pub fn last_frame(&self) -> u64 {
        self.last().map_or(0, |d| d.frame_index)
    }

    /// Frames from first to last detection
    pub fn span(&self) -> u64 {
        self.last_frame() - self.first_frame()
    }

    /// Detections per frame over the span
    pub fn density(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.len() as f64 / (self.span() + 1) as f64
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackState::Active
    }

    pub fn retire(&mut self) {
        if self.state == TrackState::Active {
            self.state = TrackState::Retired;
        }
    }

    pub fn detection_at(&self, frame_index: u64) -> Option<&Detection> {
        self.detections
            .binary_search_by_key(&frame_index, |d| d.frame_index)
            .ok()
            .map(|pos| &self.detections[pos])
    }

    /// Append a detection from a later frame
    pub fn push(&mut self, detection: Detection) -> Result<()> {
        if let Some(last) = self.last() {
            if detection.frame_index <= last.frame_index {
                return Err(TrackingError::Sequence {
                    previous: last.frame_index,
                    received: detection.frame_index,
                });
            }
        }
        self.detections.push(detection);
        Ok(())
    }

    /// Append every detection later than the current last frame, dropping the rest
    ///
    /// Returns the number of dropped detections.
    pub fn append_after(&mut self, detections: Vec<Detection>) -> usize {
        let cutoff = self.last().map(|d| d.frame_index);
        let offered = detections.len();
        let len_before = self.detections.len();
        self.detections.extend(
            detections
                .into_iter()
                .filter(|d| cutoff.map_or(true, |c| d.frame_index > c)),
        );
        offered - (self.detections.len() - len_before)
    }

    /// Remove and return all detections at or after `frame_index`
    pub fn split_off(&mut self, frame_index: u64) -> Vec<Detection> {
        let pos = self
            .detections
            .partition_point(|d| d.frame_index < frame_index);
        self.detections.split_off(pos)
    }

    /// Detections in the inclusive frame range
    pub fn window(&self, from: u64, to: u64) -> &[Detection] {
        let start = self.detections.partition_point(|d| d.frame_index < from);
        let end = self.detections.partition_point(|d| d.frame_index <= to);
        &self.detections[start..end.max(start)]
    }

    /// Least-squares frequency slope (Hz per frame) over the last `window` detections
    pub fn frequency_slope(&self, window: usize) -> f64 {
        let n = self.len();
        let start = n.saturating_sub(window);
        linear_slope(&self.detections[start..])
    }

    /// Slope over the first `window` detections
    pub fn leading_slope(&self, window: usize) -> f64 {
        let end = window.min(self.len());
        linear_slope(&self.detections[..end])
    }

    /// Mean signature of the last `window` detections
    pub fn tail_signature(&self, window: usize) -> Option<Array1<f32>> {
        let start = self.len().saturating_sub(window);
        mean_signature(self.detections[start..].iter().map(|d| d.signature_view()))
    }

    /// Mean signature of the first `window` detections
    pub fn head_signature(&self, window: usize) -> Option<Array1<f32>> {
        let end = window.min(self.len());
        mean_signature(self.detections[..end].iter().map(|d| d.signature_view()))
    }

    /// Mean of the per-detection peak amplitudes
    pub fn mean_peak_power(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.detections.iter().map(|d| d.peak_power()).sum();
        sum / self.len() as f32
    }

    /// Predict frequency and signature at `frame_index`
    pub fn predict(&self, frame_index: u64, window: usize, extrapolate: bool) -> Option<Prediction> {
        let last = self.last()?;
        let elapsed = frame_index.saturating_sub(last.frame_index);
        let slope = if extrapolate {
            self.frequency_slope(window)
        } else {
            0.0
        };
        let signature = self.tail_signature(window)?;
        Some(Prediction {
            frequency: last.frequency + slope * elapsed as f64,
            signature,
            elapsed,
        })
    }

    /// Extrapolate the first detection backwards to `frame_index`
    pub fn predict_backwards(&self, frame_index: u64, window: usize) -> Option<f64> {
        let first = self.first()?;
        let lead = first.frame_index.saturating_sub(frame_index);
        Some(first.frequency - self.leading_slope(window) * lead as f64)
    }
}

/// Least-squares frequency slope (Hz per frame) of a detection run
pub fn linear_slope(detections: &[Detection]) -> f64 {
    let n = detections.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = detections.iter().map(|d| d.frame_index as f64).sum::<f64>() / nf;
    let mean_y = detections.iter().map(|d| d.frequency).sum::<f64>() / nf;
    let (num, den) = detections.iter().fold((0.0, 0.0), |(num, den), d| {
        let dx = d.frame_index as f64 - mean_x;
        (num + dx * (d.frequency - mean_y), den + dx * dx)
    });
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
