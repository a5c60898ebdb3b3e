//! Separable Gaussian smoothing with edge-clamped borders

use bytes::Bytes;

use crate::capture::{Frame, PixelFormat};
use crate::error::{PipelineError, Result};

/// Default radius: a 5x5 kernel
pub const DEFAULT_BLUR_RADIUS: u32 = 2;

/// Normalized 1-D Gaussian weights, `2 * radius + 1` taps
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    radius: usize,
    weights: Vec<f32>,
}

impl GaussianKernel {
    /// Sigma defaults to `0.7 * radius` (1.4 for the 5x5 kernel)
    pub fn new(radius: u32) -> Self {
        Self::with_sigma(radius, 0.7 * radius as f32)
    }

    pub fn with_sigma(radius: u32, sigma: f32) -> Self {
        let radius = radius as usize;
        if radius == 0 || sigma <= 0.0 {
            return Self {
                radius: 0,
                weights: vec![1.0],
            };
        }

        let denom = 2.0 * sigma * sigma;
        let mut weights: Vec<f32> = (0..=2 * radius)
            .map(|i| {
                let d = i as f32 - radius as f32;
                (-(d * d) / denom).exp()
            })
            .collect();
        let sum: f32 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= sum);

        Self { radius, weights }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

/// Blur stage that keeps its intermediate row buffer between frames
#[derive(Debug)]
pub struct GaussianBlur {
    kernel: GaussianKernel,
    scratch: Vec<f32>,
}

impl GaussianBlur {
    pub fn new(radius: u32) -> Self {
        Self {
            kernel: GaussianKernel::new(radius),
            scratch: Vec::new(),
        }
    }

    /// Pre-sizes the intermediate buffer for frames up to `pixels`
    pub fn reserve(&mut self, pixels: usize) -> Result<()> {
        let additional = pixels.saturating_sub(self.scratch.len());
        self.scratch
            .try_reserve_exact(additional)
            .map_err(|e| PipelineError::allocation(format!("blur scratch: {}", e)))
    }

    pub fn release(&mut self) {
        self.scratch = Vec::new();
    }

    /// Horizontal then vertical pass from `src` into `dst`
    pub fn apply(&mut self, src: &[u8], dst: &mut [u8], width: usize, height: usize) {
        let len = width * height;
        debug_assert!(src.len() >= len && dst.len() >= len);

        let radius = self.kernel.radius;
        if radius == 0 {
            dst[..len].copy_from_slice(&src[..len]);
            return;
        }

        let weights = &self.kernel.weights;
        self.scratch.clear();
        self.scratch.resize(len, 0.0);
        let last_x = width as isize - 1;
        let last_y = height as isize - 1;

        for y in 0..height {
            let row = &src[y * width..(y + 1) * width];
            for x in 0..width {
                let mut acc = 0.0f32;
                for (k, w) in weights.iter().enumerate() {
                    let sx = (x as isize + k as isize - radius as isize).clamp(0, last_x);
                    acc += w * row[sx as usize] as f32;
                }
                self.scratch[y * width + x] = acc;
            }
        }

        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0f32;
                for (k, w) in weights.iter().enumerate() {
                    let sy = (y as isize + k as isize - radius as isize).clamp(0, last_y);
                    acc += w * self.scratch[sy as usize * width + x];
                }
                dst[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Blurs a grayscale frame; radius 0 returns the input bytes unchanged
pub fn blur(frame: &Frame, radius: u32) -> Result<Frame> {
    if frame.format() != PixelFormat::Gray8 {
        return Err(PipelineError::invalid_format(format!(
            "blur expects GRAY8, got {}",
            frame.format()
        )));
    }
    if frame.data.len() != frame.pixel_count() {
        return Err(PipelineError::invalid_format(format!(
            "gray plane is {} bytes, expected {}",
            frame.data.len(),
            frame.pixel_count()
        )));
    }
    if radius == 0 {
        return Ok(frame.clone());
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let mut out = vec![0u8; width * height];
    GaussianBlur::new(radius).apply(&frame.data, &mut out, width, height);

    Frame::with_sequence(
        Bytes::from(out),
        frame.width(),
        frame.height(),
        PixelFormat::Gray8,
        frame.meta.timestamp_ms,
        frame.meta.sequence,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame::new(Bytes::from(data), width, height, PixelFormat::Gray8, 0).unwrap()
    }

    #[test]
    fn test_kernel_normalized_and_symmetric() {
        let kernel = GaussianKernel::new(2);
        let w = kernel.weights();
        assert_eq!(w.len(), 5);
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(w[0], w[4]);
        assert_eq!(w[1], w[3]);
        assert!(w[2] > w[1] && w[1] > w[0]);
    }

    #[test]
    fn test_radius_zero_is_identity() {
        let data: Vec<u8> = (0..64).map(|i| (i * 37 % 256) as u8).collect();
        let frame = gray(8, 8, data.clone());
        let out = blur(&frame, 0).unwrap();
        assert_eq!(&out.data[..], &data[..]);

        let mut stage = GaussianBlur::new(0);
        let mut dst = vec![0u8; 64];
        stage.apply(&data, &mut dst, 8, 8);
        assert_eq!(dst, data);
    }

    #[test]
    fn test_constant_image_unchanged() {
        // Edge clamping keeps borders at the interior value
        let frame = gray(6, 5, vec![90; 30]);
        let out = blur(&frame, 2).unwrap();
        assert!(out.data.iter().all(|&v| v == 90));
    }

    #[test]
    fn test_blur_smooths_impulse() {
        let mut data = vec![0u8; 49];
        data[24] = 255;
        let out = blur(&gray(7, 7, data), 1).unwrap();
        assert!(out.data[24] < 255);
        assert!(out.data[23] > 0 && out.data[17] > 0);
        assert_eq!(out.data[23], out.data[25]);
        assert_eq!(out.data[17], out.data[31]);
        assert_eq!(out.data[0], 0);
    }

    #[test]
    fn test_blur_rejects_non_gray() {
        let frame = Frame::new(Bytes::from(vec![0u8; 24]), 4, 4, PixelFormat::Yuv420, 0).unwrap();
        assert!(matches!(
            blur(&frame, 2),
            Err(PipelineError::InvalidFormat(_))
        ));
    }
}
