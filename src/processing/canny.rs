//! Canny edge detection: Sobel gradient, non-maximum suppression and
//! hysteresis linking.
//!
//! Gradient magnitude follows [`GradientNorm`]; thresholds are compared in
//! that unit. Direction is quantized to 0°, 45°, 90° and 135° by comparing
//! `|gy|` against `|gx| * tan(22.5°)` and `|gx| * tan(67.5°)`, with image y
//! growing downwards.
//!
//! A pixel survives suppression when its magnitude is >= both neighbours
//! along its direction and strictly greater than at least one of them, so a
//! flat plateau is suppressed. The outer one-pixel ring is always 0.

use bytes::Bytes;

use crate::capture::{Frame, PixelFormat};
use crate::error::{check_thresholds, PipelineError, Result};
use crate::processing::params::GradientNorm;

pub const EDGE: u8 = 255;

const TAN_22_5: f32 = 0.414_213_56;
const TAN_67_5: f32 = 2.414_213_6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Direction {
    Horizontal,
    Diagonal45,
    Vertical,
    Diagonal135,
}

/// Edge detector owning its gradient and linking scratch memory
#[derive(Debug)]
pub struct CannyEdgeDetector {
    norm: GradientNorm,
    magnitude: Vec<f32>,
    direction: Vec<Direction>,
    suppressed: Vec<f32>,
    stack: Vec<usize>,
}

impl Default for CannyEdgeDetector {
    fn default() -> Self {
        Self::new(GradientNorm::default())
    }
}

impl CannyEdgeDetector {
    pub fn new(norm: GradientNorm) -> Self {
        Self {
            norm,
            magnitude: Vec::new(),
            direction: Vec::new(),
            suppressed: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Pre-sizes scratch memory for frames up to `pixels`
    pub fn reserve(&mut self, pixels: usize) -> Result<()> {
        let grow = |len: usize| pixels.saturating_sub(len);
        self.magnitude
            .try_reserve_exact(grow(self.magnitude.len()))
            .and_then(|_| self.direction.try_reserve_exact(grow(self.direction.len())))
            .and_then(|_| self.suppressed.try_reserve_exact(grow(self.suppressed.len())))
            .map_err(|e| PipelineError::allocation(format!("canny scratch: {}", e)))
    }

    pub fn release(&mut self) {
        self.magnitude = Vec::new();
        self.direction = Vec::new();
        self.suppressed = Vec::new();
        self.stack = Vec::new();
    }

    /// Writes a 0/255 edge map of `gray` into `out`
    pub fn detect_into(
        &mut self,
        gray: &[u8],
        width: usize,
        height: usize,
        low: f64,
        high: f64,
        out: &mut [u8],
    ) -> Result<()> {
        check_thresholds(low, high)?;
        let len = width
            .checked_mul(height)
            .ok_or_else(|| PipelineError::invalid_format("frame size overflows"))?;
        if gray.len() != len || out.len() != len {
            return Err(PipelineError::invalid_format(format!(
                "{}x{} edge map needs {} bytes, got input {} / output {}",
                width,
                height,
                len,
                gray.len(),
                out.len()
            )));
        }

        out.fill(0);
        if width < 3 || height < 3 {
            return Ok(());
        }

        self.gradient(gray, width, height);
        self.suppress(width, height);
        hysteresis(
            &self.suppressed,
            width,
            height,
            low,
            high,
            out,
            &mut self.stack,
        );
        Ok(())
    }

    fn gradient(&mut self, src: &[u8], width: usize, height: usize) {
        let len = width * height;
        self.magnitude.clear();
        self.magnitude.resize(len, 0.0);
        self.direction.clear();
        self.direction.resize(len, Direction::Horizontal);

        let px = |x: usize, y: usize| src[y * width + x] as i32;

        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
                let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));

                let (ax, ay) = (gx.abs() as f32, gy.abs() as f32);
                let i = y * width + x;
                self.magnitude[i] = match self.norm {
                    GradientNorm::L1 => ax + ay,
                    GradientNorm::L2 => (ax * ax + ay * ay).sqrt(),
                };
                self.direction[i] = if ay <= ax * TAN_22_5 {
                    Direction::Horizontal
                } else if ay >= ax * TAN_67_5 {
                    Direction::Vertical
                } else if (gx > 0) == (gy > 0) {
                    Direction::Diagonal45
                } else {
                    Direction::Diagonal135
                };
            }
        }
    }

    fn suppress(&mut self, width: usize, height: usize) {
        self.suppressed.clear();
        self.suppressed.resize(width * height, 0.0);

        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let i = y * width + x;
                let m = self.magnitude[i];
                if m <= 0.0 {
                    continue;
                }
                let (a, b) = match self.direction[i] {
                    Direction::Horizontal => (i - 1, i + 1),
                    Direction::Vertical => (i - width, i + width),
                    Direction::Diagonal45 => (i - width - 1, i + width + 1),
                    Direction::Diagonal135 => (i - width + 1, i + width - 1),
                };
                let (n1, n2) = (self.magnitude[a], self.magnitude[b]);
                if m >= n1 && m >= n2 && (m > n1 || m > n2) {
                    self.suppressed[i] = m;
                }
            }
        }
    }
}

/// Seeds at `>= high`, grows through 8-connected interior pixels `>= low`
fn hysteresis(
    magnitude: &[f32],
    width: usize,
    height: usize,
    low: f64,
    high: f64,
    out: &mut [u8],
    stack: &mut Vec<usize>,
) {
    stack.clear();
    let candidate = |m: f32, threshold: f64| m > 0.0 && m as f64 >= threshold;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let seed = y * width + x;
            if out[seed] == EDGE || !candidate(magnitude[seed], high) {
                continue;
            }
            out[seed] = EDGE;
            stack.push(seed);

            while let Some(i) = stack.pop() {
                let (cx, cy) = (i % width, i / width);
                for ny in cy - 1..=cy + 1 {
                    if ny == 0 || ny >= height - 1 {
                        continue;
                    }
                    for nx in cx - 1..=cx + 1 {
                        if nx == 0 || nx >= width - 1 {
                            continue;
                        }
                        let j = ny * width + nx;
                        if out[j] != EDGE && candidate(magnitude[j], low) {
                            out[j] = EDGE;
                            stack.push(j);
                        }
                    }
                }
            }
        }
    }
}

/// Edge map of a grayscale frame using the L1 gradient norm
pub fn detect(frame: &Frame, low: f64, high: f64) -> Result<Frame> {
    detect_with_norm(frame, low, high, GradientNorm::L1)
}

pub fn detect_with_norm(frame: &Frame, low: f64, high: f64, norm: GradientNorm) -> Result<Frame> {
    check_thresholds(low, high)?;
    if frame.format() != PixelFormat::Gray8 {
        return Err(PipelineError::invalid_format(format!(
            "edge detection expects GRAY8, got {}",
            frame.format()
        )));
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let mut out = vec![0u8; width * height];
    CannyEdgeDetector::new(norm).detect_into(&frame.data, width, height, low, high, &mut out)?;

    Frame::with_sequence(
        Bytes::from(out),
        frame.width(),
        frame.height(),
        PixelFormat::Gray8,
        frame.meta.timestamp_ms,
        frame.meta.sequence,
    )
}
