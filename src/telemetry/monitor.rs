//! Adaptive quality controller
//!
//! Consumes per-frame processing durations and the measured frame rate, and
//! moves the active [`QualityLevel`] by at most one tier per recorded frame:
//!
//! | Condition | Action |
//! |-----------|--------|
//! | duration > `max_processing_time_ms` and level > Low | demote one tier |
//! | duration < half that, fps > `optimal_target_fps`, level < Ultra | promote one tier |
//!
//! All counters are atomics and the policy sits behind an `ArcSwap`, so the
//! processing thread never waits on a telemetry reader.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::processing::params::{ProcessingParams, QualityLevel, QualityTable};

const EVENT_CAPACITY: usize = 64;

/// Controller thresholds and the tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivePolicy {
    /// Whether adaptation starts enabled
    pub enabled: bool,
    pub initial_quality: QualityLevel,
    pub max_processing_time_ms: f64,
    pub min_target_fps: f64,
    pub optimal_target_fps: f64,
    pub log_interval_secs: u64,
    pub tiers: QualityTable,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_quality: QualityLevel::High,
            max_processing_time_ms: 50.0,
            min_target_fps: 15.0,
            optimal_target_fps: 30.0,
            log_interval_secs: 5,
            tiers: QualityTable::default(),
        }
    }
}

impl AdaptivePolicy {
    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()
    }
}

/// Outcome of one recorded frame
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub success: bool,
    pub processing_time_ms: f64,
    pub quality: QualityLevel,
    pub optimization_hint: Option<String>,
}

/// Aggregate counters snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceStats {
    pub total_frames: u64,
    pub total_processing_ms: f64,
    pub dropped_frames: u64,
    pub current_fps: f64,
    pub quality: QualityLevel,
    pub adaptive_enabled: bool,
}

impl PerformanceStats {
    pub fn avg_processing_ms(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.total_processing_ms / self.total_frames as f64
        }
    }

    pub fn drop_rate_percent(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.dropped_frames as f64 / self.total_frames as f64 * 100.0
        }
    }
}

/// Published on quality changes and FPS threshold crossings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorEvent {
    QualityChanged {
        from: QualityLevel,
        to: QualityLevel,
        manual: bool,
    },
    FpsBelowMinimum { fps: f64 },
    FpsRecovered { fps: f64 },
}

pub struct PerformanceMonitor {
    policy: ArcSwap<AdaptivePolicy>,
    quality: AtomicU8,
    adaptive: AtomicBool,

    total_frames: AtomicU64,
    /// Successful processing time, microseconds
    total_processing_us: AtomicU64,
    dropped_frames: AtomicU64,

    /// f64 bits
    current_fps: AtomicU64,
    fps_warning: AtomicBool,

    started: Instant,
    /// Milliseconds since `started`
    last_log_ms: AtomicU64,

    events_tx: Sender<MonitorEvent>,
    events_rx: Receiver<MonitorEvent>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(AdaptivePolicy::default())
    }
}

impl PerformanceMonitor {
    pub fn new(policy: AdaptivePolicy) -> Self {
        let (events_tx, events_rx) = flume::bounded(EVENT_CAPACITY);
        Self {
            quality: AtomicU8::new(policy.initial_quality.as_u8()),
            adaptive: AtomicBool::new(policy.enabled),
            policy: ArcSwap::from_pointee(policy),
            total_frames: AtomicU64::new(0),
            total_processing_us: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            current_fps: AtomicU64::new(0f64.to_bits()),
            fps_warning: AtomicBool::new(false),
            started: Instant::now(),
            last_log_ms: AtomicU64::new(0),
            events_tx,
            events_rx,
        }
    }

    /// Records one processed (or failed) frame and runs one adaptation step
    pub fn record_frame_processing(&self, duration_ms: f64, success: bool) -> ProcessingResult {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        if success {
            let micros = (duration_ms.max(0.0) * 1000.0).round() as u64;
            self.total_processing_us.fetch_add(micros, Ordering::Relaxed);
            metrics::counter!("edgecam_frames_processed").increment(1);
            metrics::histogram!("edgecam_processing_ms").record(duration_ms);
        } else {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("edgecam_frames_dropped").increment(1);
        }

        let optimization_hint = self.adapt(duration_ms);
        self.log_periodically();

        ProcessingResult {
            success,
            processing_time_ms: duration_ms,
            quality: self.quality_level(),
            optimization_hint,
        }
    }

    /// Counts a frame rejected before it reached the stages
    pub fn record_dropped(&self) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("edgecam_frames_dropped").increment(1);
    }

    fn adapt(&self, duration_ms: f64) -> Option<String> {
        if !self.is_adaptive_enabled() {
            return Some("Adaptive quality disabled".to_string());
        }

        let policy = self.policy.load();
        let fps = self.current_fps();
        let step = |raw: u8| {
            let level = QualityLevel::from_u8(raw)?;
            let next = if duration_ms > policy.max_processing_time_ms {
                level.demoted()
            } else if duration_ms < policy.max_processing_time_ms * 0.5
                && fps > policy.optimal_target_fps
            {
                level.promoted()
            } else {
                None
            };
            next.map(QualityLevel::as_u8)
        };

        let previous = self
            .quality
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| step(raw))
            .ok()
            .and_then(QualityLevel::from_u8)?;
        let current = step(previous.as_u8()).and_then(QualityLevel::from_u8)?;

        let hint = if current < previous {
            format!(
                "Reduced quality to level {} for better performance",
                current.as_u8()
            )
        } else {
            format!(
                "Increased quality to level {} due to good performance",
                current.as_u8()
            )
        };
        info!("{}", hint);
        metrics::gauge!("edgecam_quality_level").set(current.as_u8() as f64);
        self.emit(MonitorEvent::QualityChanged {
            from: previous,
            to: current,
            manual: false,
        });
        Some(hint)
    }

    /// Updates the measured frame rate; warns once per threshold crossing
    pub fn update_fps(&self, fps: f64) -> Option<MonitorEvent> {
        self.current_fps.store(fps.to_bits(), Ordering::Release);
        let min = self.policy.load().min_target_fps;

        let event = if fps < min {
            self.fps_warning
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| {
                    warn!(
                        "Performance warning: FPS below minimum threshold ({:.1} < {:.1})",
                        fps, min
                    );
                    MonitorEvent::FpsBelowMinimum { fps }
                })
        } else {
            self.fps_warning
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| {
                    info!("Performance recovered: FPS back to acceptable level ({:.1})", fps);
                    MonitorEvent::FpsRecovered { fps }
                })
        };

        if let Some(event) = event {
            self.emit(event);
        }
        event
    }

    pub fn current_fps(&self) -> f64 {
        f64::from_bits(self.current_fps.load(Ordering::Acquire))
    }

    pub fn is_fps_warning_active(&self) -> bool {
        self.fps_warning.load(Ordering::Acquire)
    }

    pub fn quality_level(&self) -> QualityLevel {
        QualityLevel::from_u8(self.quality.load(Ordering::Acquire))
            .unwrap_or(QualityLevel::High)
    }

    /// Pins the tier and disables adaptation
    pub fn set_quality_level(&self, level: QualityLevel) {
        self.adaptive.store(false, Ordering::Release);
        let previous = self.quality.swap(level.as_u8(), Ordering::AcqRel);
        info!("Quality manually set to level {}", level);
        metrics::gauge!("edgecam_quality_level").set(level.as_u8() as f64);

        if let Some(from) = QualityLevel::from_u8(previous).filter(|from| *from != level) {
            self.emit(MonitorEvent::QualityChanged {
                from,
                to: level,
                manual: true,
            });
        }
    }

    /// Integer form, clamped to [Low, Ultra]
    pub fn set_quality_index(&self, level: i64) {
        self.set_quality_level(QualityLevel::clamped(level));
    }

    pub fn set_adaptive_quality_enabled(&self, enabled: bool) {
        self.adaptive.store(enabled, Ordering::Release);
        info!(
            "Adaptive quality {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_adaptive_enabled(&self) -> bool {
        self.adaptive.load(Ordering::Acquire)
    }

    /// Parameters for the current tier, read from the fixed table
    pub fn processing_params(&self) -> ProcessingParams {
        self.policy.load().tiers.params(self.quality_level())
    }

    pub fn policy(&self) -> Arc<AdaptivePolicy> {
        self.policy.load_full()
    }

    /// Replaces thresholds and tiers; in-flight frames keep their snapshot
    pub fn set_policy(&self, policy: AdaptivePolicy) -> Result<()> {
        policy.validate()?;
        self.policy.store(Arc::new(policy));
        Ok(())
    }

    /// Receiver for quality and FPS events; events are dropped when it lags
    pub fn events(&self) -> Receiver<MonitorEvent> {
        self.events_rx.clone()
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events_tx.try_send(event);
    }

    pub fn stats(&self) -> PerformanceStats {
        PerformanceStats {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            total_processing_ms: self.total_processing_us.load(Ordering::Relaxed) as f64 / 1000.0,
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            current_fps: self.current_fps(),
            quality: self.quality_level(),
            adaptive_enabled: self.is_adaptive_enabled(),
        }
    }

    fn log_periodically(&self) {
        let interval = Duration::from_secs(self.policy.load().log_interval_secs);
        let now_ms = self.started.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < interval.as_millis() as u64 {
            return;
        }
        if self
            .last_log_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.log_performance_stats();
        }
    }

    pub fn log_performance_stats(&self) {
        let stats = self.stats();
        if stats.total_frames == 0 {
            return;
        }
        info!(
            "Performance Stats - FPS: {:.1}, Avg Processing: {:.1}ms, Frames: {}, Dropped: {} ({:.1}%), Quality: {}",
            stats.current_fps,
            stats.avg_processing_ms(),
            stats.total_frames,
            stats.dropped_frames,
            stats.drop_rate_percent(),
            stats.quality.as_u8()
        );
    }

    pub fn performance_report(&self) -> String {
        let stats = self.stats();
        if stats.total_frames == 0 {
            return "No performance data available".to_string();
        }
        let min_fps = self.policy.load().min_target_fps;

        format!(
            "Performance Report:\n\
             - Current FPS: {:.1}\n\
             - Average Processing Time: {:.1}ms\n\
             - Total Frames Processed: {}\n\
             - Frames Dropped: {} ({:.1}%)\n\
             - Current Quality Level: {}\n\
             - Adaptive Quality: {}\n\
             - Performance Status: {}",
            stats.current_fps,
            stats.avg_processing_ms(),
            stats.total_frames,
            stats.dropped_frames,
            stats.drop_rate_percent(),
            stats.quality.as_u8(),
            if stats.adaptive_enabled { "Enabled" } else { "Disabled" },
            if stats.current_fps >= min_fps { "Good" } else { "Below Target" }
        )
    }

    /// Zeroes counters and restores the initial tier
    pub fn reset(&self) {
        let policy = self.policy.load();
        self.total_frames.store(0, Ordering::Relaxed);
        self.total_processing_us.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);
        self.current_fps.store(0f64.to_bits(), Ordering::Release);
        self.fps_warning.store(false, Ordering::Release);
        self.quality
            .store(policy.initial_quality.as_u8(), Ordering::Release);
        self.last_log_ms.store(
            self.started.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );
        info!("Performance monitor reset");
    }
}
