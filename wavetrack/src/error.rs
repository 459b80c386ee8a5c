//! Error types for the wavetrack library

use thiserror::Error;

/// Result type alias for the tracking library
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Fatal errors that abort a tracking or cleanup run
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Frame out of order: received frame {received} after frame {previous}")]
    Sequence { previous: u64, received: u64 },

    #[error(
        "Signature dimension mismatch in frame {frame_index}: expected {expected} electrodes, got {actual}"
    )]
    DimensionMismatch {
        frame_index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid detection in frame {frame_index}: {reason}")]
    InvalidDetection { frame_index: u64, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackingError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_detection<S: Into<String>>(frame_index: u64, reason: S) -> Self {
        Self::InvalidDetection {
            frame_index,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the input stream rather than the setup
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Sequence { .. } | Self::DimensionMismatch { .. } | Self::InvalidDetection { .. }
        )
    }
}
