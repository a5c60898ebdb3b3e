//! Host-facing call surface
//!
//! Mirrors the flat native interface a mobile host calls into: booleans and
//! options instead of errors, plain numbers for telemetry. Failures are logged
//! here and never cross the boundary. Each bridge owns its processor, so two
//! hosts in one process do not share state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, warn};

use crate::capture::{Frame, PixelFormat};
use crate::processing::{FrameProcessor, ProcessingMode, ProcessorState};
use crate::telemetry::{AdaptivePolicy, PerformanceMonitor};

pub struct NativeBridge {
    processor: FrameProcessor,
    input_format: PixelFormat,
    sequence: AtomicU64,
    /// Last output size packed as `width << 32 | height`
    last_output: AtomicU64,
}

impl Default for NativeBridge {
    fn default() -> Self {
        Self::new(Arc::new(PerformanceMonitor::new(AdaptivePolicy::default())))
    }
}

impl NativeBridge {
    /// Bridge expecting NV21 camera buffers
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self::with_format(monitor, PixelFormat::Nv21)
    }

    pub fn with_format(monitor: Arc<PerformanceMonitor>, input_format: PixelFormat) -> Self {
        Self {
            processor: FrameProcessor::new(monitor),
            input_format,
            sequence: AtomicU64::new(0),
            last_output: AtomicU64::new(0),
        }
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    /// Starts a fresh session, releasing any live one first
    pub fn initialize_processor(&self, width: i32, height: i32) -> bool {
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            error!("Refusing negative frame size {}x{}", width, height);
            return false;
        };
        if self.is_live() {
            self.processor.cleanup();
        }
        match self.processor.initialize(width, height) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to initialize frame processor: {}", e);
                false
            }
        }
    }

    /// Edge map bytes at the processed size, see [`Self::last_output_size`]
    pub fn process_frame_canny(&self, input: &[u8], width: i32, height: i32) -> Option<Bytes> {
        self.run(input, width, height, ProcessingMode::Edges)
    }

    pub fn process_frame_grayscale(&self, input: &[u8], width: i32, height: i32) -> Option<Bytes> {
        self.run(input, width, height, ProcessingMode::Grayscale)
    }

    fn run(&self, input: &[u8], width: i32, height: i32, mode: ProcessingMode) -> Option<Bytes> {
        if !self.is_live() {
            error!("Frame processor not initialized");
            return None;
        }
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            self.processor.monitor().record_dropped();
            warn!("Negative frame size {}x{}", width, height);
            return None;
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::with_sequence(
            Bytes::copy_from_slice(input),
            width,
            height,
            self.input_format,
            0,
            sequence,
        )
        .map_err(|e| {
            self.processor.monitor().record_dropped();
            warn!("Rejected input buffer: {}", e);
        })
        .ok()?;

        match self.processor.process(&frame, mode) {
            Ok(processed) => {
                let (w, h) = (processed.frame.width(), processed.frame.height());
                self.last_output
                    .store((w as u64) << 32 | h as u64, Ordering::Release);
                Some(processed.frame.data)
            }
            Err(e) => {
                warn!("Frame processing failed: {}", e);
                None
            }
        }
    }

    /// Size of the most recent output buffer
    pub fn last_output_size(&self) -> (u32, u32) {
        let packed = self.last_output.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    /// Milliseconds; 0 when no processor is live
    pub fn get_last_processing_time(&self) -> f64 {
        if self.is_live() {
            self.processor.last_processing_time_ms()
        } else {
            0.0
        }
    }

    pub fn get_processed_frame_count(&self) -> u64 {
        if self.is_live() {
            self.processor.processed_frame_count()
        } else {
            0
        }
    }

    pub fn cleanup(&self) {
        self.processor.cleanup();
    }

    fn is_live(&self) -> bool {
        matches!(
            self.processor.state(),
            ProcessorState::Ready | ProcessorState::Processing
        )
    }
}
