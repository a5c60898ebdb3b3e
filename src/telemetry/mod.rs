pub mod fps;
pub mod monitor;

pub use fps::{FpsCounter, FpsStats, FpsUpdate};
pub use monitor::{AdaptivePolicy, MonitorEvent, PerformanceMonitor, PerformanceStats, ProcessingResult};
