use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{PipelineError, Result};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival time in this process, for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Camera capture timestamp (monotonic, milliseconds)
    pub timestamp_ms: u64,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (Y, then U, then V)
    Yuv420,
    /// YUV 4:2:0 semi-planar, interleaved VU (Android camera default)
    Nv21,
    /// YUV 4:2:0 semi-planar, interleaved UV
    Nv12,
    Gray8,
    Rgb888,
}

impl PixelFormat {
    /// Exact byte length of a frame, `None` on overflow or odd 4:2:0 sizes
    pub fn byte_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Yuv420 | PixelFormat::Nv21 | PixelFormat::Nv12 => {
                if width % 2 != 0 || height % 2 != 0 {
                    return None;
                }
                pixels.checked_add(pixels / 2)
            }
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Rgb888 => pixels.checked_mul(3),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Yuv420 => write!(f, "YUV420 (planar)"),
            PixelFormat::Nv21 => write!(f, "NV21 (semi-planar VU)"),
            PixelFormat::Nv12 => write!(f, "NV12 (semi-planar UV)"),
            PixelFormat::Gray8 => write!(f, "GRAY8"),
            PixelFormat::Rgb888 => write!(f, "RGB888"),
        }
    }
}

impl Frame {
    /// Wraps a buffer, rejecting partial or oversized frames
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ms: u64,
    ) -> Result<Self> {
        Self::with_sequence(data, width, height, format, timestamp_ms, 0)
    }

    pub fn with_sequence(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ms: u64,
        sequence: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::invalid_format(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        let expected = format.byte_len(width, height).ok_or_else(|| {
            PipelineError::invalid_format(format!("{}x{} is not a valid {} size", width, height, format))
        })?;
        if data.len() != expected {
            return Err(PipelineError::invalid_format(format!(
                "{} {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                format,
                timestamp_ms,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn pixel_count(&self) -> usize {
        self.meta.width as usize * self.meta.height as usize
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_byte_len() {
        assert_eq!(PixelFormat::Yuv420.byte_len(640, 480), Some(640 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Nv21.byte_len(1280, 720), Some(1280 * 720 * 3 / 2));
        assert_eq!(PixelFormat::Gray8.byte_len(7, 5), Some(35));
        assert_eq!(PixelFormat::Rgb888.byte_len(4, 4), Some(48));
        assert_eq!(PixelFormat::Yuv420.byte_len(7, 4), None);
    }

    #[test]
    fn test_frame_rejects_partial_buffer() {
        let data = Bytes::from(vec![0u8; 10]);
        let err = Frame::new(data, 4, 4, PixelFormat::Yuv420, 0).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFormat(_)));
    }

    #[test]
    fn test_frame_rejects_empty_dimensions() {
        let err = Frame::new(Bytes::new(), 0, 4, PixelFormat::Gray8, 0).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFormat(_)));
    }

    #[test]
    fn test_frame_metadata() {
        let data = Bytes::from(vec![0u8; 24]);
        let frame = Frame::with_sequence(data, 4, 4, PixelFormat::Nv12, 33, 7).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.format(), PixelFormat::Nv12);
        assert_eq!(frame.meta.timestamp_ms, 33);
        assert_eq!(frame.meta.sequence, 7);
        assert_eq!(frame.pixel_count(), 16);
    }
}
