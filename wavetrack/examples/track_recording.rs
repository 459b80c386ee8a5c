//! Track a recording of harmonic-group detections
//!
//! ```text
//! cargo run --example track_recording -- detections.jsonl tracks.json [config.json]
//! ```
//!
//! `detections.jsonl` holds one frame per line. Without a config file the
//! defaults are used.

use anyhow::{bail, Context, Result};
use wavetrack::{io, JsonLinesSource, TrackingPipeline, WavetrackConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (input, output) = match args.as_slice() {
        [input, output, ..] => (input, output),
        _ => bail!("usage: track_recording <detections.jsonl> <tracks.json> [config.json]"),
    };

    let config = match args.get(2) {
        Some(path) => WavetrackConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => WavetrackConfig::default(),
    };

    let pipeline = TrackingPipeline::new(config)?;
    let mut source =
        JsonLinesSource::open(input).with_context(|| format!("Failed to open {input}"))?;
    let (store, report) = pipeline.run(&mut source)?;

    println!("Frames:             {}", report.frames);
    println!("Detections:         {}", report.detections);
    println!("Identities tracked: {}", report.identities_tracked);
    println!("Rejected as noise:  {}", report.cleanup.rejected.len());
    println!("Fragments merged:   {}", report.cleanup.merged.len());
    println!("Swaps repaired:     {}", report.cleanup.swaps.len());
    println!("Final identities:   {}", store.len());
    for warning in store.warnings() {
        println!("  warning: {warning}");
    }

    io::save_tracks(output, &store).with_context(|| format!("Failed to write {output}"))?;
    Ok(())
}
