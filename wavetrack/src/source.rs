//! Detection sources feeding frames to the assignment engine
//!
//! A source hands over one frame at a time. Ordering is checked by the
//! engine, not by the source.

use crate::detection::Frame;
use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Common interface for anything that yields frames of detections
pub trait DetectionSource {
    /// Next frame, `None` once the recording is exhausted
    fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// Source name (for logging)
    fn name(&self) -> &str {
        "detections"
    }
}

/// Wrap any iterator of frames
pub struct IterSource<I> {
    frames: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Frame>,
{
    pub fn new<T: IntoIterator<IntoIter = I>>(frames: T) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl<I> DetectionSource for IterSource<I>
where
    I: Iterator<Item = Frame>,
{
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.frames.next().map(Ok)
    }

    fn name(&self) -> &str {
        "iterator"
    }
}

/// Reads one JSON frame per line; blank lines are skipped
///
/// `{"index": 3, "timestamp": 0.3, "detections": [{"frequency": 612.4, "signature": [..]}]}`
pub struct JsonLinesSource<R> {
    reader: R,
    name: String,
    line: String,
    line_number: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_name(reader, "json-lines")
    }

    pub fn with_name<S: Into<String>>(reader: R, name: S) -> Self {
        Self {
            reader,
            name: name.into(),
            line: String::new(),
            line_number: 0,
        }
    }

    /// Lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        log::info!("Reading detections from {}", path.display());
        Ok(Self::with_name(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    let text = self.line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(text).map_err(|e| {
                        log::error!("{}:{}: malformed frame: {}", self.name, self.line_number, e);
                        e.into()
                    }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<S: DetectionSource + ?Sized> DetectionSource for Box<S> {
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        (**self).next_frame()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
