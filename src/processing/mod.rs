//! Per-frame image work: color conversion, smoothing, edge detection and
//! the stateful processor that strings them together.

pub mod blur;
pub mod canny;
pub mod color;
pub mod params;
pub mod processor;

pub use params::{GradientNorm, ProcessingMode, ProcessingParams, QualityLevel, QualityTable};
pub use processor::{FrameProcessor, ProcessedFrame, ProcessorOptions, ProcessorState};
