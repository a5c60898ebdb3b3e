//! Camera → processor → renderer wiring
//!
//! ```text
//! CameraFeed ──(drop-oldest queue)──▶ worker thread ──(drop-oldest queue)──▶ renderer
//!                                        │
//!                                  FrameProcessor
//! ```
//!
//! The worker is a plain OS thread that owns the processing loop. Per-frame
//! failures are logged and skipped; only shutdown ends the loop.

pub mod queue;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::RecvTimeoutError;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{CameraFeed, Frame};
use crate::error::{PipelineError, Result};
use crate::processing::{FrameProcessor, ProcessedFrame, ProcessingMode, ProcessorOptions};
use crate::telemetry::{FpsCounter, FpsStats, PerformanceMonitor, PerformanceStats};
use crate::Config;

pub use queue::{frame_queue, FrameReceiver, FrameSender, QueueStats};

const WORKER_POLL: Duration = Duration::from_millis(20);

fn mode_to_u8(mode: ProcessingMode) -> u8 {
    match mode {
        ProcessingMode::Edges => 0,
        ProcessingMode::Grayscale => 1,
    }
}

fn mode_from_u8(raw: u8) -> ProcessingMode {
    match raw {
        1 => ProcessingMode::Grayscale,
        _ => ProcessingMode::Edges,
    }
}

/// Combined counters of one pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub fps: FpsStats,
    pub performance: PerformanceStats,
    pub input: QueueStats,
    pub output: QueueStats,
    pub processed_frames: u64,
    pub last_processing_ms: f64,
    /// Camera delivery to output hand-off for the last processed frame
    pub last_latency_ms: f64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Processed: {}, Last: {:.1}ms (latency {:.1}ms), Dropped: {}, Quality: {}",
            self.fps,
            self.processed_frames,
            self.last_processing_ms,
            self.last_latency_ms,
            self.performance.dropped_frames,
            self.performance.quality
        )
    }
}

pub struct Pipeline {
    processor: Arc<FrameProcessor>,
    monitor: Arc<PerformanceMonitor>,
    fps: Arc<FpsCounter>,
    feed: CameraFeed,
    output: FrameReceiver<ProcessedFrame>,
    mode: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    latency_us: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Initializes the processor for the configured capture size and starts
    /// the worker thread.
    #[instrument(skip(config))]
    pub fn start(config: &Config) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(PerformanceMonitor::new(config.adaptive.clone()));
        let fps = Arc::new(FpsCounter::new(config.pipeline.fps_sample_size));
        let processor = Arc::new(FrameProcessor::with_options(
            Arc::clone(&monitor),
            ProcessorOptions {
                blur_radius: config.pipeline.blur_radius,
                gradient_norm: config.pipeline.gradient_norm,
                max_pixels: config.pipeline.max_pixels,
            },
        ));
        processor.initialize(config.capture.width, config.capture.height)?;

        let (input_tx, input_rx) = frame_queue::<Frame>(config.capture.queue_capacity);
        let (output_tx, output_rx) = frame_queue::<ProcessedFrame>(config.pipeline.output_capacity);
        let feed = CameraFeed::new(
            config.capture.format,
            input_tx,
            Arc::clone(&fps),
            Arc::clone(&monitor),
        );

        let mode = Arc::new(AtomicU8::new(mode_to_u8(config.pipeline.mode)));
        let running = Arc::new(AtomicBool::new(true));
        let latency_us = Arc::new(AtomicU64::new(0));
        let worker = Worker {
            input: input_rx,
            output: output_tx,
            processor: Arc::clone(&processor),
            mode: Arc::clone(&mode),
            running: Arc::clone(&running),
            latency_us: Arc::clone(&latency_us),
            core: config.pipeline.worker_core,
        };
        let handle = thread::Builder::new()
            .name("edgecam-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::allocation(format!("worker thread: {}", e)))?;

        info!(
            "Pipeline started: {}x{} {}, mode {:?}",
            config.capture.width, config.capture.height, config.capture.format, config.pipeline.mode
        );
        Ok(Self {
            processor,
            monitor,
            fps,
            feed,
            output: output_rx,
            mode,
            running,
            latency_us,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Camera-side handle; clone it into the capture callback
    pub fn feed(&self) -> CameraFeed {
        self.feed.clone()
    }

    /// Renderer-side receiver; yields `None` after shutdown
    pub fn output(&self) -> FrameReceiver<ProcessedFrame> {
        self.output.clone()
    }

    pub fn mode(&self) -> ProcessingMode {
        mode_from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Takes effect from the next frame the worker picks up
    pub fn set_mode(&self, mode: ProcessingMode) {
        let previous = mode_from_u8(self.mode.swap(mode_to_u8(mode), Ordering::AcqRel));
        if previous != mode {
            info!("Processing mode: {:?} -> {:?}", previous, mode);
        }
    }

    /// Flips between edge and grayscale output, returning the new mode
    pub fn toggle_mode(&self) -> ProcessingMode {
        let next = match self.mode() {
            ProcessingMode::Edges => ProcessingMode::Grayscale,
            ProcessingMode::Grayscale => ProcessingMode::Edges,
        };
        self.set_mode(next);
        next
    }

    pub fn processor(&self) -> &Arc<FrameProcessor> {
        &self.processor
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn fps(&self) -> &Arc<FpsCounter> {
        &self.fps
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            fps: self.fps.stats(),
            performance: self.monitor.stats(),
            input: self.feed.queue_stats(),
            output: self.output.stats(),
            processed_frames: self.processor.processed_frame_count(),
            last_processing_ms: self.processor.last_processing_time_ms(),
            last_latency_ms: self.latency_us.load(Ordering::Acquire) as f64 / 1000.0,
        }
    }

    pub fn performance_report(&self) -> String {
        self.monitor.performance_report()
    }

    /// Stops the worker, waits for the frame in flight and releases the
    /// processor. Later deliveries fail with `Closed`. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
            self.processor.cleanup();
            info!("Pipeline shut down");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    input: FrameReceiver<Frame>,
    output: FrameSender<ProcessedFrame>,
    processor: Arc<FrameProcessor>,
    mode: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    latency_us: Arc<AtomicU64>,
    core: Option<usize>,
}

impl Worker {
    fn run(self) {
        if let Some(id) = self.core {
            pin_to_core(id);
        }
        debug!("Worker started");

        while self.running.load(Ordering::Acquire) {
            let frame = match self.input.recv_timeout(WORKER_POLL) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mode = mode_from_u8(self.mode.load(Ordering::Acquire));
            match self.processor.process(&frame, mode) {
                Ok(processed) => {
                    let latency = frame.timestamp.elapsed();
                    self.latency_us
                        .store(latency.as_micros() as u64, Ordering::Release);
                    metrics::histogram!("edgecam_latency_ms").record(latency.as_secs_f64() * 1000.0);
                    match self.output.push(processed) {
                        Ok(Some(stale)) => debug!(
                            "Renderer behind, discarded output for frame {}",
                            stale.frame.meta.sequence
                        ),
                        Ok(None) => {}
                        Err(_) => break,
                    }
                }
                Err(e) if e.is_frame_local() => {}
                Err(PipelineError::NotInitialized) => {
                    warn!("Processor released underneath the worker");
                    break;
                }
                Err(e) => warn!("Frame {} failed: {}", frame.meta.sequence, e),
            }
        }

        self.input.close();
        debug!("Worker stopped");
    }
}

fn pin_to_core(id: usize) {
    let core = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .find(|core| core.id == id);
    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            info!("Worker pinned to core {}", id);
        }
        _ => warn!("Could not pin worker to core {}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticCamera;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.capture.width = 64;
        config.capture.height = 48;
        config.capture.queue_capacity = 4;
        config.pipeline.output_capacity = 64;
        config
    }

    #[test]
    fn test_mode_toggle() {
        let pipeline = Pipeline::start(&small_config()).unwrap();
        assert_eq!(pipeline.mode(), ProcessingMode::Edges);
        assert_eq!(pipeline.toggle_mode(), ProcessingMode::Grayscale);
        assert_eq!(pipeline.mode(), ProcessingMode::Grayscale);
        pipeline.set_mode(ProcessingMode::Edges);
        assert_eq!(pipeline.mode(), ProcessingMode::Edges);
    }

    #[test]
    fn test_frames_flow_to_output() {
        let config = small_config();
        let pipeline = Pipeline::start(&config).unwrap();
        let mut camera = SyntheticCamera::new(&config.capture).unwrap();
        let output = pipeline.output();

        pipeline.feed().deliver_raw(camera.capture_frame()).unwrap();
        let processed = output.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(processed.mode, ProcessingMode::Edges);
        assert_eq!((processed.frame.width(), processed.frame.height()), (64, 48));
        assert!(processed.frame.data.iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn test_latency_covers_processing_time() {
        let config = small_config();
        let pipeline = Pipeline::start(&config).unwrap();
        let mut camera = SyntheticCamera::new(&config.capture).unwrap();
        let output = pipeline.output();
        assert_eq!(pipeline.stats().last_latency_ms, 0.0);

        pipeline.feed().deliver_raw(camera.capture_frame()).unwrap();
        output.recv_timeout(Duration::from_secs(5)).unwrap();

        let stats = pipeline.stats();
        assert!(stats.last_latency_ms > 0.0);
        assert!(stats.last_latency_ms >= stats.last_processing_ms);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let config = small_config();
        let pipeline = Pipeline::start(&config).unwrap();
        let feed = pipeline.feed();
        let output = pipeline.output();
        pipeline.shutdown();
        pipeline.shutdown();

        assert!(!pipeline.is_running());
        assert_eq!(
            pipeline.processor().state(),
            crate::processing::ProcessorState::ShutDown
        );
        let mut camera = SyntheticCamera::new(&config.capture).unwrap();
        assert!(matches!(
            feed.deliver_raw(camera.capture_frame()),
            Err(PipelineError::Closed)
        ));
        assert!(output.recv().is_none());
    }

    #[test]
    fn test_start_rejects_odd_size() {
        let mut config = small_config();
        config.capture.width = 63;
        assert!(Pipeline::start(&config).is_err());
    }
}
