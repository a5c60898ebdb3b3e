//! Error taxonomy for the frame pipeline

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or undersized frame buffer; the frame is dropped
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Canny thresholds that violate `0 <= low < high`
    #[error("invalid thresholds: low={low}, high={high}")]
    InvalidThreshold { low: f64, high: f64 },

    /// Scratch buffers could not be sized for the requested resolution
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// A frame is already in flight on this processor
    #[error("processor busy")]
    Busy,

    /// The processor is uninitialized or shut down
    #[error("processor not initialized")]
    NotInitialized,

    /// `initialize` on a live session; `cleanup` it first
    #[error("processor already initialized")]
    AlreadyInitialized,

    /// The pipeline has been shut down and its channels are gone
    #[error("pipeline closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PipelineError {
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::AllocationFailure(msg.into())
    }

    /// Errors that only cost the current frame
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::InvalidFormat(_) | Self::Busy)
    }
}

/// Validates a Canny threshold pair
pub fn check_thresholds(low: f64, high: f64) -> Result<()> {
    if low.is_finite() && high.is_finite() && low >= 0.0 && low < high {
        Ok(())
    } else {
        Err(PipelineError::InvalidThreshold { low, high })
    }
}
