//! Configuration types for the assignment and cleanup engines
//!
//! All thresholds carry physical units (Hz, frames, detections). Values are
//! validated up front; an invalid value is a `TrackingError::Configuration`
//! and is never clamped into range.

use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the frame-by-frame assignment engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Largest plausible change of fundamental frequency per frame (Hz)
    pub max_freq_jump_hz: f64,
    /// Consecutive missed frames an identity survives before retirement
    pub gap_tolerance: u32,
    /// Identities whose predictions lie within this band are in a crossing (Hz)
    pub crossing_band_hz: f64,
    /// Weight of signature dissimilarity relative to normalised frequency distance
    pub signature_weight: f64,
    /// Multiplier on the frequency term while an identity is in a crossing
    pub crossing_freq_weight: f64,
    /// Number of recent detections used for slope and signature prediction
    pub slope_window: usize,
    /// Extrapolate frequency along the short-term slope
    pub extrapolate: bool,
    /// Cost difference under which two matchings count as equally good
    pub tie_tolerance: f64,
    /// Fixed electrode count; taken from the first detection when unset
    pub electrode_count: Option<usize>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_freq_jump_hz: 1.5,
            gap_tolerance: 10,
            crossing_band_hz: 2.0,
            signature_weight: 1.0,
            crossing_freq_weight: 0.1,
            slope_window: 5,
            extrapolate: true,
            tie_tolerance: 1e-6,
            electrode_count: None,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        positive("max_freq_jump_hz", self.max_freq_jump_hz)?;
        non_negative("crossing_band_hz", self.crossing_band_hz)?;
        non_negative("signature_weight", self.signature_weight)?;
        unit_interval("crossing_freq_weight", self.crossing_freq_weight)?;
        non_negative("tie_tolerance", self.tie_tolerance)?;
        if self.slope_window < 2 {
            return Err(TrackingError::config(format!(
                "slope_window must be at least 2 detections, got {}",
                self.slope_window
            )));
        }
        if self.electrode_count == Some(0) {
            return Err(TrackingError::config("electrode_count must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for the post-hoc cleanup engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Minimum number of detections a track needs to survive noise rejection
    pub min_track_len: usize,
    /// Minimum span from first to last frame (frames)
    pub min_track_span: u64,
    /// Minimum detections per frame over the track span, in [0, 1]
    pub min_density: f64,
    /// Minimum mean peak signature amplitude, in the units of the detection
    /// signatures (convert decibel floors upstream); disabled when unset
    pub min_peak_power: Option<f32>,
    /// Width of the Gaussian kernel of the frequency-band density filter (Hz);
    /// the filter is disabled when unset
    pub kde_sigma_hz: Option<f64>,
    /// Frames per density window
    pub kde_window_frames: u64,
    /// Fraction by which consecutive density windows overlap, in [0, 1)
    pub kde_window_overlap: f64,
    /// Density (detections per Hz) a band needs to count as populated; when
    /// unset, that of a fish detected in 5% of the window's frames
    pub kde_threshold: Option<f64>,
    /// Largest run of missed frames bridged by fragment merging
    pub gap_tolerance: u32,
    /// Largest plausible change of fundamental frequency per frame (Hz)
    pub max_freq_jump_hz: f64,
    /// Weight of signature dissimilarity in the merge cost
    pub signature_weight: f64,
    /// Largest signature distance between fragment endpoints, in [0, 1]
    pub max_merge_signature_distance: f64,
    /// Detections averaged at each fragment endpoint
    pub endpoint_window: usize,
    /// Frames two fragments may overlap and still be merged
    pub max_overlap_frames: u32,
    /// Frequency band defining a crossing between two tracks (Hz)
    pub crossing_band_hz: f64,
    /// Detections averaged on each side of a suspected swap
    pub swap_window: usize,
    /// Own-signature discontinuity above which a crossing is suspicious
    pub swap_signature_threshold: f64,
    /// Improvement a swap must achieve over the current assignment
    pub swap_margin: f64,
    /// Extra slope mismatch (Hz per frame) a swap may introduce before the
    /// frequency trends count as contradicting it
    pub swap_slope_margin_hz: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            min_track_len: 10,
            min_track_span: 0,
            min_density: 0.0,
            min_peak_power: None,
            kde_sigma_hz: None,
            kde_window_frames: 3000,
            kde_window_overlap: 0.2,
            kde_threshold: None,
            gap_tolerance: 10,
            max_freq_jump_hz: 1.5,
            signature_weight: 1.0,
            max_merge_signature_distance: 0.3,
            endpoint_window: 5,
            max_overlap_frames: 0,
            crossing_band_hz: 2.0,
            swap_window: 5,
            swap_signature_threshold: 0.15,
            swap_margin: 0.05,
            swap_slope_margin_hz: 0.75,
        }
    }
}

impl CleanupConfig {
    /// Cleanup settings sharing the tracking thresholds of `tracker`
    pub fn matching(tracker: &TrackerConfig) -> Self {
        Self {
            gap_tolerance: tracker.gap_tolerance,
            max_freq_jump_hz: tracker.max_freq_jump_hz,
            signature_weight: tracker.signature_weight,
            crossing_band_hz: tracker.crossing_band_hz,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_track_len == 0 {
            return Err(TrackingError::config("min_track_len must be at least 1"));
        }
        unit_interval("min_density", self.min_density)?;
        if let Some(power) = self.min_peak_power {
            if !power.is_finite() {
                return Err(TrackingError::config(format!(
                    "min_peak_power must be finite, got {power}"
                )));
            }
        }
        if let Some(sigma) = self.kde_sigma_hz {
            positive("kde_sigma_hz", sigma)?;
        }
        if let Some(threshold) = self.kde_threshold {
            non_negative("kde_threshold", threshold)?;
        }
        if self.kde_window_frames == 0 {
            return Err(TrackingError::config("kde_window_frames must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.kde_window_overlap) {
            return Err(TrackingError::config(format!(
                "kde_window_overlap must lie in [0, 1), got {}",
                self.kde_window_overlap
            )));
        }
        positive("max_freq_jump_hz", self.max_freq_jump_hz)?;
        non_negative("signature_weight", self.signature_weight)?;
        unit_interval(
            "max_merge_signature_distance",
            self.max_merge_signature_distance,
        )?;
        non_negative("crossing_band_hz", self.crossing_band_hz)?;
        non_negative("swap_signature_threshold", self.swap_signature_threshold)?;
        non_negative("swap_margin", self.swap_margin)?;
        non_negative("swap_slope_margin_hz", self.swap_slope_margin_hz)?;
        if self.endpoint_window == 0 {
            return Err(TrackingError::config("endpoint_window must be at least 1"));
        }
        if self.swap_window == 0 {
            return Err(TrackingError::config("swap_window must be at least 1"));
        }
        Ok(())
    }
}

/// Complete run configuration as loaded from disk
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WavetrackConfig {
    pub tracking: TrackerConfig,
    pub cleanup: CleanupConfig,
}

impl WavetrackConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracking.validate()?;
        self.cleanup.validate()
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TrackingError::config(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrackingError::config(format!(
            "{name} must be non-negative and finite, got {value}"
        )))
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TrackingError::config(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
        assert!(CleanupConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_thresholds_fail_fast() {
        let config = TrackerConfig {
            crossing_band_hz: -1.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackingError::Configuration(_))
        ));

        let config = TrackerConfig {
            max_freq_jump_hz: 0.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());

        let cleanup = CleanupConfig {
            min_density: 1.5,
            ..CleanupConfig::default()
        };
        assert!(cleanup.validate().is_err());

        for cleanup in [
            CleanupConfig {
                kde_sigma_hz: Some(0.0),
                ..CleanupConfig::default()
            },
            CleanupConfig {
                kde_window_overlap: 1.0,
                ..CleanupConfig::default()
            },
            CleanupConfig {
                swap_slope_margin_hz: -0.1,
                ..CleanupConfig::default()
            },
        ] {
            assert!(matches!(
                cleanup.validate(),
                Err(TrackingError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "tracking": { "gap_tolerance": 3 }, "cleanup": { "min_track_len": 4 } }"#;
        let config = WavetrackConfig::from_json_str(json).unwrap();
        assert_eq!(config.tracking.gap_tolerance, 3);
        assert_eq!(config.tracking.slope_window, 5);
        assert_eq!(config.cleanup.min_track_len, 4);
    }

    #[test]
    fn test_invalid_json_value_rejected() {
        let json = r#"{ "tracking": { "slope_window": 1 } }"#;
        assert!(matches!(
            WavetrackConfig::from_json_str(json),
            Err(TrackingError::Configuration(_))
        ));
    }

    #[test]
    fn test_matching_shares_thresholds() {
        let tracker = TrackerConfig {
            gap_tolerance: 2,
            max_freq_jump_hz: 0.5,
            ..TrackerConfig::default()
        };
        let cleanup = CleanupConfig::matching(&tracker);
        assert_eq!(cleanup.gap_tolerance, 2);
        assert_eq!(cleanup.max_freq_jump_hz, 0.5);
    }
}
