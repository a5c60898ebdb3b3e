pub mod bridge;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod telemetry;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use capture::frame::PixelFormat;
use error::Result;
use processing::blur::DEFAULT_BLUR_RADIUS;
use processing::params::{GradientNorm, ProcessingMode};
use processing::processor::DEFAULT_MAX_PIXELS;
use telemetry::fps::DEFAULT_SAMPLE_SIZE;
use telemetry::AdaptivePolicy;

pub use bridge::NativeBridge;
pub use capture::{CameraFeed, Frame, SyntheticCamera};
pub use error::PipelineError;
pub use pipeline::Pipeline;

const ENV_PREFIX: &str = "EDGECAM";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub adaptive: AdaptivePolicy,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Frames waiting for the worker before the oldest is evicted
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Processed frames waiting for the renderer
    pub output_capacity: usize,
    pub mode: ProcessingMode,
    pub gradient_norm: GradientNorm,
    pub blur_radius: u32,
    pub fps_sample_size: usize,
    /// Pin the worker thread to this core id
    pub worker_core: Option<usize>,
    pub max_pixels: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Stop after this many seconds; 0 runs until Ctrl-C
    pub duration_secs: u64,
    pub report_interval_secs: u64,
    /// Write the last processed frame here as PNG
    pub dump_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Nv21,
            queue_capacity: 2,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_capacity: 2,
            mode: ProcessingMode::Edges,
            gradient_norm: GradientNorm::L1,
            blur_radius: DEFAULT_BLUR_RADIUS,
            fps_sample_size: DEFAULT_SAMPLE_SIZE,
            worker_core: None,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            report_interval_secs: 1,
            dump_path: None,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `EDGECAM_*` variables
    /// (`__` separates sections, e.g. `EDGECAM_CAPTURE__WIDTH=320`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.format.byte_len(capture.width, capture.height).unwrap_or(0) == 0 {
            return Err(PipelineError::invalid_format(format!(
                "capture size {}x{} is not valid for {}",
                capture.width, capture.height, capture.format
            )));
        }
        if capture.fps == 0 {
            return Err(PipelineError::invalid_format("capture fps must be non-zero"));
        }
        if capture.queue_capacity == 0 || self.pipeline.output_capacity == 0 {
            return Err(PipelineError::allocation("queue capacities must be at least 1"));
        }
        self.adaptive.validate()
    }
}
