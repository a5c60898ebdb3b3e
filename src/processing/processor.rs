//! Per-session frame processor
//!
//! State machine: `Uninitialized -> Ready -> Processing -> Ready ... -> ShutDown`.
//! One frame at a time: the session lock is taken with `try_lock`, so an
//! overlapping call is rejected with [`PipelineError::Busy`] instead of
//! touching the scratch buffers of the frame in flight. `cleanup` takes the
//! lock blockingly and therefore waits for that frame to finish.
//!
//! Frames must match the initialized size. Work happens at the active tier's
//! resolution: the luma plane is fitted inside the tier size (aspect kept,
//! never upscaled) with nearest-neighbour sampling, and the output carries
//! the processed dimensions.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::capture::{Frame, PixelFormat};
use crate::error::{PipelineError, Result};
use crate::processing::blur::{GaussianBlur, DEFAULT_BLUR_RADIUS};
use crate::processing::canny::CannyEdgeDetector;
use crate::processing::color;
use crate::processing::params::{GradientNorm, ProcessingMode, ProcessingParams};
use crate::telemetry::{PerformanceMonitor, ProcessingResult};

/// Upper bound on session size (4096 x 4096)
pub const DEFAULT_MAX_PIXELS: usize = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    Uninitialized = 0,
    Ready = 1,
    Processing = 2,
    ShutDown = 3,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProcessorState::Ready,
            2 => ProcessorState::Processing,
            3 => ProcessorState::ShutDown,
            _ => ProcessorState::Uninitialized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorOptions {
    pub blur_radius: u32,
    pub gradient_norm: GradientNorm,
    pub max_pixels: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            blur_radius: DEFAULT_BLUR_RADIUS,
            gradient_norm: GradientNorm::default(),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Output of a successful run, ready to hand to a renderer
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Single-channel 8-bit snapshot at the processed resolution
    pub frame: Frame,
    pub params: ProcessingParams,
    pub mode: ProcessingMode,
    pub result: ProcessingResult,
}

struct Session {
    width: u32,
    height: u32,
    gray: Vec<u8>,
    blurred: Vec<u8>,
    edges: Vec<u8>,
    blur: GaussianBlur,
    canny: CannyEdgeDetector,
}

impl Session {
    fn allocate(width: u32, height: u32, options: &ProcessorOptions) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::allocation(format!(
                "invalid dimensions {}x{}",
                width, height
            )));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(PipelineError::allocation(format!(
                "{}x{} cannot hold 4:2:0 chroma planes",
                width, height
            )));
        }
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .filter(|p| *p <= options.max_pixels)
            .ok_or_else(|| {
                PipelineError::allocation(format!(
                    "{}x{} exceeds the {} pixel limit",
                    width, height, options.max_pixels
                ))
            })?;

        let mut session = Self {
            width,
            height,
            gray: Vec::new(),
            blurred: Vec::new(),
            edges: Vec::new(),
            blur: GaussianBlur::new(options.blur_radius),
            canny: CannyEdgeDetector::new(options.gradient_norm),
        };
        for buf in [&mut session.gray, &mut session.blurred, &mut session.edges] {
            buf.try_reserve_exact(pixels)
                .map_err(|e| PipelineError::allocation(format!("frame buffers: {}", e)))?;
            buf.resize(pixels, 0);
        }
        session.blur.reserve(pixels)?;
        session.canny.reserve(pixels)?;
        Ok(session)
    }

    fn run(&mut self, frame: &Frame, params: &ProcessingParams, mode: ProcessingMode) -> Result<Frame> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PipelineError::invalid_format(format!(
                "frame is {}x{}, session is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let luma = color::to_gray(frame)?;
        let (w, h) = (self.width as usize, self.height as usize);
        let (pw, ph) = color::fit_within(self.width, self.height, params.width, params.height);
        let n = pw as usize * ph as usize;
        color::resize_nearest(&luma.data, w, h, &mut self.gray[..n], pw as usize, ph as usize);

        let output = match mode {
            ProcessingMode::Grayscale => Bytes::copy_from_slice(&self.gray[..n]),
            ProcessingMode::Edges => {
                let source = if params.use_gaussian_blur {
                    self.blur
                        .apply(&self.gray[..n], &mut self.blurred[..n], pw as usize, ph as usize);
                    &self.blurred[..n]
                } else {
                    &self.gray[..n]
                };
                self.canny.detect_into(
                    source,
                    pw as usize,
                    ph as usize,
                    params.low_threshold,
                    params.high_threshold,
                    &mut self.edges[..n],
                )?;
                Bytes::copy_from_slice(&self.edges[..n])
            }
        };

        Frame::with_sequence(
            output,
            pw,
            ph,
            PixelFormat::Gray8,
            frame.meta.timestamp_ms,
            frame.meta.sequence,
        )
    }
}

pub struct FrameProcessor {
    monitor: Arc<PerformanceMonitor>,
    options: ProcessorOptions,
    session: Mutex<Option<Session>>,
    state: AtomicU8,
    processed_frames: AtomicU64,
    last_processing_us: AtomicU64,
    /// Session size packed as `width << 32 | height`, 0 when released
    session_dims: AtomicU64,
}

impl FrameProcessor {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self::with_options(monitor, ProcessorOptions::default())
    }

    pub fn with_options(monitor: Arc<PerformanceMonitor>, options: ProcessorOptions) -> Self {
        Self {
            monitor,
            options,
            session: Mutex::new(None),
            state: AtomicU8::new(ProcessorState::Uninitialized as u8),
            processed_frames: AtomicU64::new(0),
            last_processing_us: AtomicU64::new(0),
            session_dims: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Allocates scratch buffers for `width x height` frames.
    ///
    /// Valid from Uninitialized or ShutDown; a live session must be released
    /// with [`Self::cleanup`] first. On allocation failure the processor is
    /// left Uninitialized.
    #[instrument(skip(self))]
    pub fn initialize(&self, width: u32, height: u32) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if session.is_some() {
            warn!("initialize called on a live {:?} session", self.session_size());
            return Err(PipelineError::AlreadyInitialized);
        }

        match Session::allocate(width, height, &self.options) {
            Ok(fresh) => {
                *session = Some(fresh);
                self.session_dims
                    .store((width as u64) << 32 | height as u64, Ordering::Release);
                self.set_state(ProcessorState::Ready);
                info!("FrameProcessor initialized for {}x{} frames", width, height);
                Ok(())
            }
            Err(e) => {
                self.set_state(ProcessorState::Uninitialized);
                warn!("FrameProcessor initialization failed: {}", e);
                Err(e)
            }
        }
    }

    /// Edge map of one frame at the current tier
    pub fn process_frame(&self, frame: &Frame) -> Result<ProcessedFrame> {
        self.process(frame, ProcessingMode::Edges)
    }

    /// Luma of one frame at the current tier resolution
    pub fn process_frame_grayscale(&self, frame: &Frame) -> Result<ProcessedFrame> {
        self.process(frame, ProcessingMode::Grayscale)
    }

    pub fn process(&self, frame: &Frame, mode: ProcessingMode) -> Result<ProcessedFrame> {
        let mut guard = match self.session.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.monitor.record_dropped();
                debug!("Frame {} rejected: processor busy", frame.meta.sequence);
                return Err(PipelineError::Busy);
            }
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        let session = guard.as_mut().ok_or(PipelineError::NotInitialized)?;

        self.set_state(ProcessorState::Processing);
        let params = self.monitor.processing_params();
        let start = Instant::now();
        let outcome = session.run(frame, &params, mode);
        let elapsed = start.elapsed();
        self.set_state(ProcessorState::Ready);
        drop(guard);

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match outcome {
            Ok(output) => {
                self.processed_frames.fetch_add(1, Ordering::AcqRel);
                self.last_processing_us
                    .store(elapsed.as_micros() as u64, Ordering::Release);
                let result = self.monitor.record_frame_processing(elapsed_ms, true);
                Ok(ProcessedFrame {
                    frame: output,
                    params,
                    mode,
                    result,
                })
            }
            Err(e) => {
                self.monitor.record_frame_processing(elapsed_ms, false);
                warn!("Frame {} dropped: {}", frame.meta.sequence, e);
                Err(e)
            }
        }
    }

    /// Duration of the last successful frame
    pub fn last_processing_time(&self) -> Duration {
        Duration::from_micros(self.last_processing_us.load(Ordering::Acquire))
    }

    pub fn last_processing_time_ms(&self) -> f64 {
        self.last_processing_time().as_secs_f64() * 1000.0
    }

    /// Monotonic count of successfully processed frames
    pub fn processed_frame_count(&self) -> u64 {
        self.processed_frames.load(Ordering::Acquire)
    }

    /// Size the session was initialized with; never waits on the frame in flight
    pub fn session_size(&self) -> Option<(u32, u32)> {
        match self.session_dims.load(Ordering::Acquire) {
            0 => None,
            packed => Some(((packed >> 32) as u32, packed as u32)),
        }
    }

    /// Waits for the frame in flight, releases buffers, ends in ShutDown.
    /// Safe to call repeatedly.
    #[instrument(skip(self))]
    pub fn cleanup(&self) {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        self.session_dims.store(0, Ordering::Release);
        if let Some(mut released) = session.take() {
            released.blur.release();
            released.canny.release();
            info!("FrameProcessor cleaned up");
        }
        self.set_state(ProcessorState::ShutDown);
    }

    #[cfg(test)]
    fn hold_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        if self.state() != ProcessorState::ShutDown {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::params::QualityLevel;

    fn processor() -> FrameProcessor {
        FrameProcessor::new(Arc::new(PerformanceMonitor::default()))
    }

    /// YUV420 frame with a vertical step at `step_col`, neutral chroma
    fn step_frame(width: u32, height: u32, step_col: u32) -> Frame {
        let len = PixelFormat::Yuv420.byte_len(width, height).unwrap();
        let mut data = vec![128u8; len];
        for y in 0..height {
            for x in 0..width {
                data[(y * width + x) as usize] = if x >= step_col { 220 } else { 20 };
            }
        }
        Frame::new(Bytes::from(data), width, height, PixelFormat::Yuv420, 0).unwrap()
    }

    #[test]
    fn test_lifecycle_states() {
        let proc = processor();
        assert_eq!(proc.state(), ProcessorState::Uninitialized);
        proc.initialize(64, 48).unwrap();
        assert_eq!(proc.state(), ProcessorState::Ready);
        assert_eq!(proc.session_size(), Some((64, 48)));
        proc.cleanup();
        assert_eq!(proc.state(), ProcessorState::ShutDown);
        proc.initialize(32, 32).unwrap();
        assert_eq!(proc.state(), ProcessorState::Ready);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let proc = processor();
        proc.initialize(16, 16).unwrap();
        proc.cleanup();
        assert_eq!(proc.state(), ProcessorState::ShutDown);
        proc.cleanup();
        assert_eq!(proc.state(), ProcessorState::ShutDown);
        assert_eq!(proc.session_size(), None);
    }

    #[test]
    fn test_process_before_initialize() {
        let proc = processor();
        let err = proc.process_frame(&step_frame(8, 8, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::NotInitialized));

        proc.initialize(8, 8).unwrap();
        proc.cleanup();
        let err = proc.process_frame(&step_frame(8, 8, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::NotInitialized));
    }

    #[test]
    fn test_initialize_failures_leave_uninitialized() {
        let proc = processor();
        for (w, h) in [(0, 480), (641, 480), (65_536, 65_536)] {
            let err = proc.initialize(w, h).unwrap_err();
            assert!(matches!(err, PipelineError::AllocationFailure(_)));
            assert_eq!(proc.state(), ProcessorState::Uninitialized);
        }
    }

    #[test]
    fn test_edges_at_native_resolution() {
        let monitor = Arc::new(PerformanceMonitor::default());
        monitor.set_quality_level(QualityLevel::Medium);
        let proc = FrameProcessor::new(monitor);
        proc.initialize(16, 12).unwrap();

        let out = proc.process_frame(&step_frame(16, 12, 8)).unwrap();
        assert_eq!((out.frame.width(), out.frame.height()), (16, 12));
        assert_eq!(out.frame.format(), PixelFormat::Gray8);
        assert!(!out.params.use_gaussian_blur);
        assert_eq!(out.result.quality, QualityLevel::Medium);
        for y in 1..11usize {
            let row = &out.frame.data[y * 16..(y + 1) * 16];
            assert_eq!(row[7], 255);
            assert_eq!(row[8], 255);
            assert_eq!(row.iter().filter(|&&v| v == 255).count(), 2);
        }
        assert_eq!(proc.processed_frame_count(), 1);
        assert_eq!(proc.state(), ProcessorState::Ready);
    }

    #[test]
    fn test_downscales_to_tier() {
        let monitor = Arc::new(PerformanceMonitor::default());
        monitor.set_quality_level(QualityLevel::Low);
        let proc = FrameProcessor::new(monitor);
        proc.initialize(640, 480).unwrap();

        let out = proc.process_frame(&step_frame(640, 480, 320)).unwrap();
        assert_eq!((out.frame.width(), out.frame.height()), (160, 120));
        assert_eq!(out.frame.data.len(), 160 * 120);
        assert!(out.frame.data.iter().all(|&v| v == 0 || v == 255));
        assert!(out.frame.data.iter().any(|&v| v == 255));
    }

    #[test]
    fn test_grayscale_mode() {
        let monitor = Arc::new(PerformanceMonitor::default());
        monitor.set_quality_level(QualityLevel::Ultra);
        let proc = FrameProcessor::new(monitor);
        proc.initialize(8, 8).unwrap();
        let frame = step_frame(8, 8, 4);

        let out = proc.process_frame_grayscale(&frame).unwrap();
        assert_eq!(out.mode, ProcessingMode::Grayscale);
        assert_eq!(&out.frame.data[..], &frame.data[..64]);
    }

    #[test]
    fn test_blur_tier_still_finds_step() {
        let proc = processor();
        proc.initialize(32, 24).unwrap();
        let out = proc.process_frame(&step_frame(32, 24, 16)).unwrap();
        assert!(out.params.use_gaussian_blur);
        for y in 1..23usize {
            assert!(out.frame.data[y * 32..(y + 1) * 32].contains(&255));
        }
    }

    #[test]
    fn test_wrong_size_frame_is_dropped() {
        let proc = processor();
        proc.initialize(16, 16).unwrap();
        let err = proc.process_frame(&step_frame(8, 8, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFormat(_)));
        assert_eq!(proc.state(), ProcessorState::Ready);
        assert_eq!(proc.processed_frame_count(), 0);
        assert_eq!(proc.monitor().stats().dropped_frames, 1);

        // next frame goes through
        assert!(proc.process_frame(&step_frame(16, 16, 8)).is_ok());
    }

    #[test]
    fn test_overlapping_call_is_busy() {
        let proc = Arc::new(processor());
        proc.initialize(8, 8).unwrap();
        proc.process_frame(&step_frame(8, 8, 4)).unwrap();

        let in_flight = proc.hold_session();
        let before = in_flight.as_ref().unwrap().edges.clone();

        let other = Arc::clone(&proc);
        let err = std::thread::spawn(move || other.process_frame(&step_frame(8, 8, 2)))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Busy));
        assert_eq!(in_flight.as_ref().unwrap().edges, before);
        drop(in_flight);

        assert_eq!(proc.processed_frame_count(), 1);
        assert_eq!(proc.monitor().stats().dropped_frames, 1);
    }

    #[test]
    fn test_session_size_does_not_wait_for_frame_in_flight() {
        let proc = Arc::new(processor());
        proc.initialize(8, 8).unwrap();
        let in_flight = proc.hold_session();

        let (tx, rx) = flume::bounded(1);
        let reader = Arc::clone(&proc);
        std::thread::spawn(move || {
            let _ = tx.send(reader.session_size());
        });
        let size = rx.recv_timeout(Duration::from_secs(2));
        drop(in_flight);

        assert_eq!(size.unwrap(), Some((8, 8)));
        assert_eq!(proc.monitor().stats().dropped_frames, 0);
        proc.cleanup();
        assert_eq!(proc.session_size(), None);
    }

    #[test]
    fn test_initialize_rejected_while_live() {
        let proc = processor();
        proc.initialize(16, 12).unwrap();
        let err = proc.initialize(32, 24).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyInitialized));
        assert_eq!(proc.state(), ProcessorState::Ready);
        assert_eq!(proc.session_size(), Some((16, 12)));
        assert!(proc.process_frame(&step_frame(16, 12, 8)).is_ok());

        proc.cleanup();
        proc.initialize(32, 24).unwrap();
        assert_eq!(proc.session_size(), Some((32, 24)));
    }

    #[test]
    fn test_last_processing_time_recorded() {
        let proc = processor();
        proc.initialize(64, 48).unwrap();
        assert_eq!(proc.last_processing_time(), Duration::ZERO);
        proc.process_frame(&step_frame(64, 48, 32)).unwrap();
        assert!(proc.last_processing_time_ms() >= 0.0);
        assert_eq!(proc.monitor().stats().total_frames, 1);
    }
}
