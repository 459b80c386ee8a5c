//! Export of the final track store

use crate::error::Result;
use crate::store::{TrackStore, TrackWarning};
use crate::track::TrackId;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// One detection of an exported identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub frame_index: u64,
    /// Frame time (s); `None` if the frame carried no timestamp
    pub timestamp: Option<f64>,
    pub frequency: f64,
    pub signature: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTrack {
    pub id: TrackId,
    pub samples: Vec<TrackSample>,
}

/// Document written for downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackExport {
    pub tracks: Vec<FinalTrack>,
    pub warnings: Vec<TrackWarning>,
}

impl TrackExport {
    pub fn from_store(store: &TrackStore) -> Self {
        let tracks = store
            .tracks()
            .map(|track| FinalTrack {
                id: track.id,
                samples: track
                    .detections()
                    .iter()
                    .map(|d| TrackSample {
                        frame_index: d.frame_index,
                        timestamp: store.timestamp(d.frame_index),
                        frequency: d.frequency,
                        signature: d.signature.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            tracks,
            warnings: store.warnings().to_vec(),
        }
    }
}

pub fn write_tracks<W: Write>(writer: W, store: &TrackStore) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &TrackExport::from_store(store))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_tracks<R: Read>(reader: R) -> Result<TrackExport> {
    Ok(serde_json::from_reader(reader)?)
}

/// Write the store to `path` through a sibling temporary file
///
/// The destination is only replaced once the temporary file is complete.
pub fn save_tracks<P: AsRef<Path>>(path: P, store: &TrackStore) -> Result<()> {
    let path = path.as_ref();
    let tmp = temporary_path(path);

    if let Err(e) = write_file(&tmp, store) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;

    log::info!("Saved {} identities to {}", store.len(), path.display());
    Ok(())
}

fn write_file(path: &Path, store: &TrackStore) -> Result<()> {
    let file = File::create(path)?;
    write_tracks(&file, store)?;
    file.sync_all()?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tracks".into());
    name.push(".tmp");
    path.with_file_name(name)
}
