//! Identity tracking for wave-type weakly electric fish
//!
//! Detections (fundamental frequency plus per-electrode amplitude signature)
//! arrive frame by frame from a [`DetectionSource`]. The [`AssignmentEngine`]
//! links them into identities with a global minimum-cost matching per frame,
//! and the [`CleanupEngine`] repairs the finished store: it removes noise,
//! merges fragments and undoes swaps at frequency crossings.
//!
//! ```rust,ignore
//! use wavetrack::{io, JsonLinesSource, TrackingPipeline, WavetrackConfig};
//!
//! let pipeline = TrackingPipeline::new(WavetrackConfig::default())?;
//! let mut source = JsonLinesSource::open("detections.jsonl")?;
//! let (store, report) = pipeline.run(&mut source)?;
//! io::save_tracks("tracks.json", &store)?;
//! ```

pub mod cleanup;
pub mod config;
pub mod detection;
pub mod error;
pub mod hungarian; // Hungarian algorithm for optimal assignment
pub mod io;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod track;
pub mod tracker;

pub use cleanup::{CleanupEngine, CleanupReport, SwapRepair};
pub use config::{CleanupConfig, TrackerConfig, WavetrackConfig};
pub use detection::{Detection, Frame};
pub use error::{Result, TrackingError};
pub use hungarian::{AssignmentResult, HungarianSolver};
pub use pipeline::{track_recording, PipelineReport, TrackingPipeline};
pub use source::{DetectionSource, IterSource, JsonLinesSource};
pub use store::{TrackStore, TrackWarning};
pub use track::{Prediction, Track, TrackId, TrackState};
pub use tracker::{AssignmentEngine, FrameReport};
