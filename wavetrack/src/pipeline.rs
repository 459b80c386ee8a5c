//! Full run over a recording: detection source, assignment, cleanup

use crate::cleanup::{CleanupEngine, CleanupReport};
use crate::config::WavetrackConfig;
use crate::detection::Frame;
use crate::error::Result;
use crate::source::{DetectionSource, IterSource};
use crate::store::TrackStore;
use crate::tracker::AssignmentEngine;
use std::time::Instant;

/// Timing and counters for one run
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub frames: u64,
    pub detections: usize,
    pub identities_tracked: usize,
    pub ambiguous_frames: u64,
    pub cleanup: CleanupReport,
    pub tracking_ms: f32,
    pub cleanup_ms: f32,
}

pub struct TrackingPipeline {
    config: WavetrackConfig,
    cleanup: CleanupEngine,
}

impl TrackingPipeline {
    pub fn new(config: WavetrackConfig) -> Result<Self> {
        config.validate()?;
        let cleanup = CleanupEngine::new(config.cleanup.clone())?;
        Ok(Self { config, cleanup })
    }

    pub fn config(&self) -> &WavetrackConfig {
        &self.config
    }

    /// Track every frame of `source`, then clean up the result
    ///
    /// The first failing frame aborts the run.
    pub fn run<S: DetectionSource>(&self, source: &mut S) -> Result<(TrackStore, PipelineReport)> {
        let mut report = PipelineReport::default();
        let mut engine = AssignmentEngine::new(self.config.tracking.clone())?;
        log::info!("Tracking {}", source.name());

        let start = Instant::now();
        while let Some(frame) = source.next_frame() {
            let outcome = frame.and_then(|frame| {
                report.detections += frame.len();
                engine.process(frame)
            });
            match outcome {
                Ok(frame_report) => {
                    if frame_report.ambiguous > 0 {
                        report.ambiguous_frames += 1;
                    }
                }
                Err(e) => {
                    if e.is_input_error() {
                        log::error!("Rejected input from {}: {}", source.name(), e);
                    } else {
                        log::error!("Tracking aborted: {}", e);
                    }
                    return Err(e);
                }
            }
        }
        report.frames = engine.n_steps();
        let store = engine.finish();
        report.identities_tracked = store.len();
        report.tracking_ms = start.elapsed().as_secs_f32() * 1000.0;

        let start = Instant::now();
        let (store, cleanup) = self.cleanup.run(store);
        report.cleanup = cleanup;
        report.cleanup_ms = start.elapsed().as_secs_f32() * 1000.0;

        log::info!(
            "{} frames: {} identities tracked, {} final ({:.1} ms tracking, {:.1} ms cleanup)",
            report.frames,
            report.identities_tracked,
            store.len(),
            report.tracking_ms,
            report.cleanup_ms
        );
        Ok((store, report))
    }
}

/// Track and clean an in-memory recording
pub fn track_recording<I>(frames: I, config: &WavetrackConfig) -> Result<TrackStore>
where
    I: IntoIterator<Item = Frame>,
{
    let pipeline = TrackingPipeline::new(config.clone())?;
    let mut source = IterSource::new(frames);
    pipeline.run(&mut source).map(|(store, _)| store)
}
