//! Deterministic test-pattern camera
//!
//! Produces a horizontal luma ramp with a bright vertical bar that moves a
//! fixed step per frame, in any supported [`PixelFormat`]. Chroma is neutral.
//! Timestamps follow the nominal frame interval rather than the wall clock,
//! so a sequence is reproducible across runs.

use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::PixelFormat;
use crate::error::{PipelineError, Result};
use crate::CaptureConfig;

/// One camera delivery before validation
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
}

pub struct SyntheticCamera {
    width: u32,
    height: u32,
    fps: u32,
    format: PixelFormat,
    frame_len: usize,
    sequence: u64,
}

const RAMP_BASE: u32 = 16;
const RAMP_SPAN: u32 = 96;
const BAR_LUMA: u8 = 235;
const NEUTRAL_CHROMA: u8 = 128;

impl SyntheticCamera {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let frame_len = config
            .format
            .byte_len(config.width, config.height)
            .filter(|len| *len > 0)
            .ok_or_else(|| {
                PipelineError::invalid_format(format!(
                    "{}x{} is not a valid {} size",
                    config.width, config.height, config.format
                ))
            })?;
        if config.fps == 0 {
            return Err(PipelineError::invalid_format("camera fps must be non-zero"));
        }

        info!(
            "Synthetic camera: {}x{} {} @ {}fps",
            config.width, config.height, config.format, config.fps
        );
        Ok(Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            format: config.format,
            frame_len,
            sequence: 0,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    /// Frames produced so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Column where the bar starts in frame `sequence`
    pub fn bar_position(&self, sequence: u64) -> u32 {
        let step = (self.width / 64).max(1) as u64;
        ((sequence * step) % self.width as u64) as u32
    }

    pub fn capture_frame(&mut self) -> RawFrame {
        let sequence = self.sequence;
        self.sequence += 1;

        let (width, height) = (self.width as usize, self.height as usize);
        let luma = self.luma_plane(sequence);
        let mut data = Vec::with_capacity(self.frame_len);
        match self.format {
            PixelFormat::Yuv420 | PixelFormat::Nv21 | PixelFormat::Nv12 => {
                data.extend_from_slice(&luma);
                data.resize(self.frame_len, NEUTRAL_CHROMA);
            }
            PixelFormat::Gray8 => data.extend_from_slice(&luma),
            PixelFormat::Rgb888 => {
                for y in luma.iter().take(width * height) {
                    data.extend_from_slice(&[*y, *y, *y]);
                }
            }
        }

        RawFrame {
            data: Bytes::from(data),
            width: self.width,
            height: self.height,
            timestamp_ms: sequence * 1000 / self.fps as u64,
        }
    }

    fn luma_plane(&self, sequence: u64) -> Vec<u8> {
        let (width, height) = (self.width, self.height);
        let bar_start = self.bar_position(sequence);
        let bar_width = (width / 8).max(1);

        let row: Vec<u8> = (0..width)
            .map(|x| {
                let offset = (x + width - bar_start) % width;
                if offset < bar_width {
                    BAR_LUMA
                } else {
                    (RAMP_BASE + x * RAMP_SPAN / width) as u8
                }
            })
            .collect();

        let mut plane = Vec::with_capacity(row.len() * height as usize);
        for _ in 0..height {
            plane.extend_from_slice(&row);
        }
        plane
    }
}
