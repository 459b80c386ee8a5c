//! Track store: every identity of a recording plus the frame timeline

use crate::track::{Track, TrackId, TrackState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Non-fatal condition attached to a frame and the identities involved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackWarning {
    /// Several matchings were equally good; resolved by lowest identity id
    AmbiguousAssignment {
        frame_index: u64,
        identities: Vec<TrackId>,
        cost_difference: f64,
    },
    /// A suspected identity swap that could not be resolved unambiguously
    UnresolvedSwap {
        frame_index: u64,
        identities: Vec<TrackId>,
        reason: String,
    },
}

impl TrackWarning {
    pub fn frame_index(&self) -> u64 {
        match self {
            Self::AmbiguousAssignment { frame_index, .. }
            | Self::UnresolvedSwap { frame_index, .. } => *frame_index,
        }
    }

    pub fn identities(&self) -> &[TrackId] {
        match self {
            Self::AmbiguousAssignment { identities, .. }
            | Self::UnresolvedSwap { identities, .. } => identities,
        }
    }
}

impl fmt::Display for TrackWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousAssignment {
                frame_index,
                identities,
                cost_difference,
            } => write!(
                f,
                "ambiguous assignment at frame {frame_index} between {identities:?} (cost difference {cost_difference:.2e})"
            ),
            Self::UnresolvedSwap {
                frame_index,
                identities,
                reason,
            } => write!(
                f,
                "unresolved swap at frame {frame_index} between {identities:?}: {reason}"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStore {
    tracks: BTreeMap<TrackId, Track>,
    timestamps: BTreeMap<u64, f64>,
    warnings: Vec<TrackWarning>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn insert(&mut self, track: Track) -> Option<Track> {
        self.tracks.insert(track.id, track)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.remove(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Identity ids in ascending order
    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn active_ids(&self) -> Vec<TrackId> {
        self.tracks
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.id)
            .collect()
    }

    /// Highest id ever present, if any
    pub fn max_id(&self) -> Option<TrackId> {
        self.tracks.keys().next_back().copied()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Track) -> bool,
    {
        self.tracks.retain(|_, track| keep(track));
    }

    pub fn detection_count(&self) -> usize {
        self.tracks.values().map(|t| t.len()).sum()
    }

    pub fn record_timestamp(&mut self, frame_index: u64, timestamp: f64) {
        self.timestamps.insert(frame_index, timestamp);
    }

    pub fn timestamp(&self, frame_index: u64) -> Option<f64> {
        self.timestamps.get(&frame_index).copied()
    }

    /// Frame whose timestamp is closest to `timestamp`
    pub fn frame_at_time(&self, timestamp: f64) -> Option<u64> {
        self.timestamps
            .iter()
            .min_by(|(ia, a), (ib, b)| {
                let da = (*a - timestamp).abs();
                let db = (*b - timestamp).abs();
                da.total_cmp(&db).then(ia.cmp(ib))
            })
            .map(|(index, _)| *index)
    }

    /// Identities holding a detection at `frame_index`
    pub fn identities_at(&self, frame_index: u64) -> Vec<TrackId> {
        self.tracks
            .values()
            .filter(|t| t.detection_at(frame_index).is_some())
            .map(|t| t.id)
            .collect()
    }

    pub fn identities_at_time(&self, timestamp: f64) -> Vec<TrackId> {
        self.frame_at_time(timestamp)
            .map(|frame| self.identities_at(frame))
            .unwrap_or_default()
    }

    /// Inverse index from frame to the identities detected in it
    pub fn time_index(&self) -> BTreeMap<u64, Vec<TrackId>> {
        let mut index: BTreeMap<u64, Vec<TrackId>> = BTreeMap::new();
        for track in self.tracks.values() {
            for detection in track.detections() {
                index.entry(detection.frame_index).or_default().push(track.id);
            }
        }
        index
    }

    pub fn warn(&mut self, warning: TrackWarning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Record a warning unless an identical one is already present
    pub fn warn_once(&mut self, warning: TrackWarning) -> bool {
        if self.warnings.contains(&warning) {
            return false;
        }
        self.warn(warning);
        true
    }

    pub fn warnings(&self) -> &[TrackWarning] {
        &self.warnings
    }

    pub fn warnings_for(&self, id: TrackId) -> Vec<&TrackWarning> {
        self.warnings
            .iter()
            .filter(|w| w.identities().contains(&id))
            .collect()
    }

    /// Mark every remaining identity as final
    pub fn finalize(&mut self) {
        for track in self.tracks.values_mut() {
            track.state = TrackState::Final;
        }
    }
}
