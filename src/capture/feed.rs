//! Camera delivery handle
//!
//! The camera callback owns a [`CameraFeed`]. Each delivery is validated,
//! stamped with a sequence number, counted by the FPS window and pushed into
//! the drop-oldest input queue. Nothing here blocks: a full queue evicts its
//! oldest frame, which is counted as dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::synthetic::RawFrame;
use crate::error::Result;
use crate::pipeline::queue::{FrameSender, QueueStats};
use crate::telemetry::{FpsCounter, PerformanceMonitor};

#[derive(Clone)]
pub struct CameraFeed {
    format: PixelFormat,
    queue: FrameSender<Frame>,
    fps: Arc<FpsCounter>,
    monitor: Arc<PerformanceMonitor>,
    sequence: Arc<AtomicU64>,
}

impl CameraFeed {
    pub fn new(
        format: PixelFormat,
        queue: FrameSender<Frame>,
        fps: Arc<FpsCounter>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            format,
            queue,
            fps,
            monitor,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Hands one camera buffer to the pipeline and returns its sequence number.
    ///
    /// Malformed buffers fail with `InvalidFormat` and count as dropped.
    pub fn deliver(&self, data: Bytes, width: u32, height: u32, timestamp_ms: u64) -> Result<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = match Frame::with_sequence(data, width, height, self.format, timestamp_ms, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                self.monitor.record_dropped();
                warn!("Camera frame {} rejected: {}", sequence, e);
                return Err(e);
            }
        };

        let fps = self.fps.record_frame(timestamp_ms);
        self.monitor.update_fps(fps);

        if let Some(stale) = self.queue.push(frame)? {
            self.monitor.record_dropped();
            debug!("Frame {} evicted by frame {}", stale.meta.sequence, sequence);
        }
        Ok(sequence)
    }

    pub fn deliver_raw(&self, raw: RawFrame) -> Result<u64> {
        self.deliver(raw.data, raw.width, raw.height, raw.timestamp_ms)
    }

    /// Frames currently waiting for the worker
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
