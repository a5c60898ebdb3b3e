//! Rolling-window frame-rate estimator
//!
//! Keeps the last N arrival timestamps in a fixed-capacity ring. The rate
//! over the window is `(samples - 1) / span`; it stays at 0 until two samples
//! exist and keeps its previous value when the span is zero.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use flume::{Sender, TrySendError};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// Sent to the registered listener once per recorded frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsUpdate {
    pub fps: f64,
    pub frame_count: u64,
    pub timestamp_ms: u64,
}

/// Point-in-time counter snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsStats {
    pub current_fps: f64,
    pub average_fps: f64,
    pub total_frames: u64,
    pub sample_size: usize,
    pub uptime: Duration,
}

impl fmt::Display for FpsStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FPS: {:.1} (avg: {:.1}), Frames: {}, Uptime: {:.1}s",
            self.current_fps,
            self.average_fps,
            self.total_frames,
            self.uptime.as_secs_f64()
        )
    }
}

struct Window {
    samples: HeapRb<u64>,
    frame_count: u64,
    started: Instant,
    listener: Option<Sender<FpsUpdate>>,
}

pub struct FpsCounter {
    window: Mutex<Window>,
    /// Mirror of the current rate for lock-free readers
    current: AtomicU64,
    capacity: usize,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl FpsCounter {
    /// Window sizes below 2 are raised to 2
    pub fn new(sample_size: usize) -> Self {
        let capacity = sample_size.max(2);
        Self {
            window: Mutex::new(Window {
                samples: HeapRb::new(capacity),
                frame_count: 0,
                started: Instant::now(),
                listener: None,
            }),
            current: AtomicU64::new(0f64.to_bits()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers the update listener, replacing any previous one.
    /// Updates are dropped when the listener falls `capacity` behind.
    pub fn subscribe(&self, capacity: usize) -> flume::Receiver<FpsUpdate> {
        let (tx, rx) = flume::bounded(capacity.max(1));
        self.lock().listener = Some(tx);
        rx
    }

    /// Records a frame arrival and returns the windowed rate
    pub fn record_frame(&self, timestamp_ms: u64) -> f64 {
        let mut window = self.lock();
        window.frame_count += 1;
        window.samples.push_overwrite(timestamp_ms);

        let mut fps = f64::from_bits(self.current.load(Ordering::Acquire));
        let count = window.samples.occupied_len();
        if count >= 2 {
            let oldest = window.samples.iter().next().copied().unwrap_or(timestamp_ms);
            let newest = window.samples.iter().last().copied().unwrap_or(timestamp_ms);
            let span_ms = newest.saturating_sub(oldest);
            if span_ms > 0 {
                fps = (count - 1) as f64 / (span_ms as f64 / 1000.0);
                self.current.store(fps.to_bits(), Ordering::Release);
            }
        }
        metrics::gauge!("edgecam_fps").set(fps);

        let update = FpsUpdate {
            fps,
            frame_count: window.frame_count,
            timestamp_ms,
        };
        let disconnected = window.listener.as_ref().is_some_and(|tx| {
            matches!(tx.try_send(update), Err(TrySendError::Disconnected(_)))
        });
        if disconnected {
            window.listener = None;
        }
        fps
    }

    pub fn current_fps(&self) -> f64 {
        f64::from_bits(self.current.load(Ordering::Acquire))
    }

    pub fn frame_count(&self) -> u64 {
        self.lock().frame_count
    }

    /// Total frames over wall-clock time since construction or reset
    pub fn average_fps(&self) -> f64 {
        let window = self.lock();
        average(window.frame_count, window.started.elapsed())
    }

    pub fn stats(&self) -> FpsStats {
        let window = self.lock();
        let uptime = window.started.elapsed();
        FpsStats {
            current_fps: self.current_fps(),
            average_fps: average(window.frame_count, uptime),
            total_frames: window.frame_count,
            sample_size: window.samples.occupied_len(),
            uptime,
        }
    }

    pub fn sample_capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&self) {
        let mut window = self.lock();
        window.samples.clear();
        window.frame_count = 0;
        window.started = Instant::now();
        self.current.store(0f64.to_bits(), Ordering::Release);
    }
}

fn average(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}
