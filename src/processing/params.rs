//! Quality tiers and the per-frame parameter snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{check_thresholds, PipelineError, Result};

/// Discrete processing tier, ordered from cheapest to most expensive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum QualityLevel {
    Low = 1,
    Medium = 2,
    High = 3,
    Ultra = 4,
}

impl QualityLevel {
    pub const ALL: [QualityLevel; 4] = [
        QualityLevel::Low,
        QualityLevel::Medium,
        QualityLevel::High,
        QualityLevel::Ultra,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(QualityLevel::Low),
            2 => Some(QualityLevel::Medium),
            3 => Some(QualityLevel::High),
            4 => Some(QualityLevel::Ultra),
            _ => None,
        }
    }

    /// Maps any integer level onto the tier range
    pub fn clamped(value: i64) -> Self {
        match value {
            i64::MIN..=1 => QualityLevel::Low,
            2 => QualityLevel::Medium,
            3 => QualityLevel::High,
            _ => QualityLevel::Ultra,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// One tier up, `None` at Ultra
    pub fn promoted(self) -> Option<Self> {
        Self::from_u8(self.as_u8() + 1)
    }

    /// One tier down, `None` at Low
    pub fn demoted(self) -> Option<Self> {
        Self::from_u8(self.as_u8() - 1)
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::Ultra => "ultra",
        };
        write!(f, "{} ({})", self.as_u8(), name)
    }
}

/// Parameters applied to one frame; copied out before the frame starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub width: u32,
    pub height: u32,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub use_gaussian_blur: bool,
}

impl ProcessingParams {
    pub const fn new(
        width: u32,
        height: u32,
        low_threshold: f64,
        high_threshold: f64,
        use_gaussian_blur: bool,
    ) -> Self {
        Self {
            width,
            height,
            low_threshold,
            high_threshold,
            use_gaussian_blur,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width < 3 || self.height < 3 {
            return Err(PipelineError::allocation(format!(
                "tier resolution {}x{} is below 3x3",
                self.width, self.height
            )));
        }
        check_thresholds(self.low_threshold, self.high_threshold)
    }
}

impl fmt::Display for ProcessingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}, thresholds: {:.1}/{:.1}, blur: {}",
            self.width, self.height, self.low_threshold, self.high_threshold, self.use_gaussian_blur
        )
    }
}

/// Fixed lookup from tier to parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTable {
    pub low: ProcessingParams,
    pub medium: ProcessingParams,
    pub high: ProcessingParams,
    pub ultra: ProcessingParams,
}

impl Default for QualityTable {
    fn default() -> Self {
        Self {
            low: ProcessingParams::new(160, 120, 80.0, 200.0, false),
            medium: ProcessingParams::new(320, 240, 60.0, 160.0, false),
            high: ProcessingParams::new(640, 480, 50.0, 150.0, true),
            ultra: ProcessingParams::new(1280, 720, 30.0, 100.0, true),
        }
    }
}

impl QualityTable {
    pub fn params(&self, level: QualityLevel) -> ProcessingParams {
        match level {
            QualityLevel::Low => self.low,
            QualityLevel::Medium => self.medium,
            QualityLevel::High => self.high,
            QualityLevel::Ultra => self.ultra,
        }
    }

    pub fn validate(&self) -> Result<()> {
        QualityLevel::ALL
            .iter()
            .try_for_each(|level| self.params(*level).validate())
    }
}

/// What the processor produces for each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Binary Canny edge map
    #[default]
    Edges,
    /// Luma only, resampled to the tier resolution
    Grayscale,
}

/// Norm used to turn Sobel responses into a gradient magnitude.
///
/// Thresholds are expressed in this unit, so changing the norm changes what
/// a given threshold pair selects. With 8-bit input, L1 ranges 0..=2040 and
/// L2 0..=1442.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientNorm {
    /// `|gx| + |gy|`
    #[default]
    L1,
    /// `sqrt(gx² + gy²)`
    L2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ordering() {
        assert!(QualityLevel::Low < QualityLevel::Medium);
        assert!(QualityLevel::High < QualityLevel::Ultra);
        assert_eq!(QualityLevel::Ultra.promoted(), None);
        assert_eq!(QualityLevel::Low.demoted(), None);
        assert_eq!(QualityLevel::Medium.promoted(), Some(QualityLevel::High));
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(QualityLevel::clamped(-3), QualityLevel::Low);
        assert_eq!(QualityLevel::clamped(0), QualityLevel::Low);
        assert_eq!(QualityLevel::clamped(2), QualityLevel::Medium);
        assert_eq!(QualityLevel::clamped(99), QualityLevel::Ultra);
    }

    #[test]
    fn test_default_table() {
        let table = QualityTable::default();
        assert_eq!(
            table.params(QualityLevel::Low),
            ProcessingParams::new(160, 120, 80.0, 200.0, false)
        );
        assert_eq!(
            table.params(QualityLevel::Medium),
            ProcessingParams::new(320, 240, 60.0, 160.0, false)
        );
        assert_eq!(
            table.params(QualityLevel::High),
            ProcessingParams::new(640, 480, 50.0, 150.0, true)
        );
        assert_eq!(
            table.params(QualityLevel::Ultra),
            ProcessingParams::new(1280, 720, 30.0, 100.0, true)
        );
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_table_rejects_inverted_thresholds() {
        let mut table = QualityTable::default();
        table.medium.low_threshold = 200.0;
        assert!(matches!(
            table.validate(),
            Err(PipelineError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_params_display() {
        let params = QualityTable::default().params(QualityLevel::High);
        assert_eq!(params.to_string(), "640x480, thresholds: 50.0/150.0, blur: true");
    }
}
