//! Detections, frames and electrode-signature operations

use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One harmonic-group detection: a fundamental frequency and the amplitude
/// of that frequency on every electrode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub frame_index: u64,
    /// Fundamental frequency (Hz)
    pub frequency: f64,
    /// Amplitude per electrode
    pub signature: Vec<f32>,
    /// Detection quality reported by the harmonic-group detector
    #[serde(default)]
    pub quality: f32,
}

impl Detection {
    pub fn new(frequency: f64, signature: Vec<f32>, quality: f32) -> Self {
        Self {
            frame_index: 0,
            frequency,
            signature,
            quality,
        }
    }

    pub fn electrode_count(&self) -> usize {
        self.signature.len()
    }

    pub fn signature_view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(self.signature.as_slice())
    }

    /// Largest amplitude over all electrodes
    pub fn peak_power(&self) -> f32 {
        peak_power(self.signature_view())
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detection(frame {}, {:.2} Hz, {} electrodes)",
            self.frame_index,
            self.frequency,
            self.signature.len()
        )
    }
}

#[derive(Deserialize)]
struct FrameRecord {
    index: u64,
    timestamp: f64,
    #[serde(default)]
    detections: Vec<Detection>,
}

impl From<FrameRecord> for Frame {
    fn from(record: FrameRecord) -> Self {
        Frame::new(record.index, record.timestamp, record.detections)
    }
}

/// All detections of one spectrogram time step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FrameRecord")]
pub struct Frame {
    pub index: u64,
    /// Time of the frame (s)
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

impl Frame {
    /// Build a frame, stamping every detection with the frame index
    pub fn new(index: u64, timestamp: f64, mut detections: Vec<Detection>) -> Self {
        for detection in &mut detections {
            detection.frame_index = index;
        }
        Self {
            index,
            timestamp,
            detections,
        }
    }

    pub fn empty(index: u64, timestamp: f64) -> Self {
        Self::new(index, timestamp, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Normalised distance between two amplitude vectors, in [0, 1]
///
/// `|a - b| / (|a| + |b|)`; two all-zero vectors have distance 0.
pub fn signature_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    let mut diff_sq = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        diff_sq += (x - y) * (x - y);
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() + norm_b.sqrt();
    if denom > 0.0 {
        diff_sq.sqrt() / denom
    } else {
        0.0
    }
}

/// Compute signature distance matrix between two signature sets with parallel processing
/// Returns: (rows.len(), cols.len()) distance matrix
pub fn signature_distances(rows: &[ArrayView1<f32>], cols: &[ArrayView1<f32>]) -> Array2<f64> {
    let n_rows = rows.len();
    let n_cols = cols.len();

    if n_rows == 0 || n_cols == 0 {
        return Array2::zeros((n_rows, n_cols));
    }

    let data: Vec<f64> = rows
        .par_iter()
        .flat_map_iter(|row| cols.iter().map(move |col| signature_distance(*row, *col)))
        .collect();

    Array2::from_shape_vec((n_rows, n_cols), data)
        .unwrap_or_else(|_| Array2::zeros((n_rows, n_cols)))
}

/// Element-wise mean of a set of signatures; `None` when the set is empty
pub fn mean_signature<'a, I>(signatures: I) -> Option<Array1<f32>>
where
    I: IntoIterator<Item = ArrayView1<'a, f32>>,
{
    let mut iter = signatures.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_owned();
    let mut count = 1.0f32;
    for signature in iter {
        sum += &signature;
        count += 1.0;
    }
    Some(sum / count)
}

/// Largest element of a signature (0 for an empty one)
pub fn peak_power(signature: ArrayView1<f32>) -> f32 {
    signature
        .iter()
        .copied()
        .fold(None, |acc: Option<f32>, x| Some(acc.map_or(x, |m| m.max(x))))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_frame_stamps_detections() {
        let frame = Frame::new(
            7,
            0.7,
            vec![
                Detection::new(600.0, vec![1.0, 0.0], 1.0),
                Detection::new(700.0, vec![0.0, 1.0], 1.0),
            ],
        );
        assert_eq!(frame.len(), 2);
        assert!(frame.detections.iter().all(|d| d.frame_index == 7));
    }

    #[test]
    fn test_signature_distance_bounds() {
        let a = array![1.0f32, 0.0, 0.0];
        let b = array![0.0f32, 0.0, 1.0];
        assert_abs_diff_eq!(signature_distance(a.view(), a.view()), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            signature_distance(a.view(), b.view()),
            2.0f64.sqrt() / 2.0,
            epsilon = 1e-9
        );

        let opposite = array![-1.0f32, 0.0, 0.0];
        assert_abs_diff_eq!(
            signature_distance(a.view(), opposite.view()),
            1.0,
            epsilon = 1e-9
        );

        let zero = array![0.0f32, 0.0, 0.0];
        assert_eq!(signature_distance(zero.view(), zero.view()), 0.0);
    }

    #[test]
    fn test_signature_distance_scale_sensitive() {
        let a = array![1.0f32, 1.0];
        let b = array![2.0f32, 2.0];
        assert_abs_diff_eq!(
            signature_distance(a.view(), b.view()),
            1.0 / 3.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_signature_distance_matrix() {
        let a = array![1.0f32, 0.0];
        let b = array![0.0f32, 1.0];
        let rows = vec![a.view(), b.view()];
        let cols = vec![b.view()];
        let matrix = signature_distances(&rows, &cols);
        assert_eq!(matrix.dim(), (2, 1));
        assert!(matrix[[0, 0]] > 0.5);
        assert_abs_diff_eq!(matrix[[1, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mean_and_peak() {
        let a = array![1.0f32, 3.0];
        let b = array![3.0f32, 5.0];
        let mean = mean_signature(vec![a.view(), b.view()]).unwrap();
        assert_abs_diff_eq!(mean[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mean[1], 4.0, epsilon = 1e-6);
        assert!(mean_signature(Vec::<ArrayView1<f32>>::new()).is_none());

        assert_eq!(peak_power(array![-80.0f32, -60.0, -70.0].view()), -60.0);
    }

    #[test]
    fn test_frame_from_json() {
        let json = r#"{"index": 3, "timestamp": 0.3, "detections": [{"frequency": 612.5, "signature": [0.1, 0.9]}]}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(frame.detections[0].frame_index, 3);
        assert_eq!(frame.detections[0].quality, 0.0);
    }
}
