//! Color conversion and resampling for the filter stages

use bytes::Bytes;

use crate::capture::{Frame, PixelFormat};
use crate::error::{PipelineError, Result};

/// Grayscale view of a frame.
///
/// For 4:2:0 input this is the Y plane itself (a zero-copy slice); chroma is
/// discarded, not averaged. RGB input goes through integer BT.601 luma.
pub fn to_gray(frame: &Frame) -> Result<Frame> {
    let (width, height) = (frame.width(), frame.height());
    let luma_len = check_len(frame)?;

    let data = match frame.format() {
        PixelFormat::Yuv420 | PixelFormat::Nv21 | PixelFormat::Nv12 => {
            frame.data.slice(..luma_len)
        }
        PixelFormat::Gray8 => frame.data.clone(),
        PixelFormat::Rgb888 => {
            let gray: Vec<u8> = frame
                .data
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect();
            Bytes::from(gray)
        }
    };

    Frame::with_sequence(
        data,
        width,
        height,
        PixelFormat::Gray8,
        frame.meta.timestamp_ms,
        frame.meta.sequence,
    )
}

/// Converts 4:2:0 or grayscale input into packed RGB888 for display fallback
pub fn to_rgb(frame: &Frame) -> Result<Frame> {
    check_len(frame)?;
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let src = &frame.data[..];
    let luma_len = width * height;

    let mut rgb = vec![0u8; luma_len * 3];
    match frame.format() {
        PixelFormat::Rgb888 => rgb.copy_from_slice(src),
        PixelFormat::Gray8 => {
            for (dst, &y) in rgb.chunks_exact_mut(3).zip(src) {
                dst.fill(y);
            }
        }
        format => {
            for row in 0..height {
                for col in 0..width {
                    let (u, v) = chroma_at(src, format, width, height, col, row);
                    let y = src[row * width + col];
                    let out = (row * width + col) * 3;
                    rgb[out..out + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
                }
            }
        }
    }

    Frame::with_sequence(
        Bytes::from(rgb),
        frame.width(),
        frame.height(),
        PixelFormat::Rgb888,
        frame.meta.timestamp_ms,
        frame.meta.sequence,
    )
}

/// Largest size inside `(max_w, max_h)` with the source aspect ratio,
/// never larger than the source and never below 3x3
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scale = (max_w as f64 / width as f64)
        .min(max_h as f64 / height as f64)
        .min(1.0);
    let w = ((width as f64 * scale).round() as u32).clamp(3.min(width), width);
    let h = ((height as f64 * scale).round() as u32).clamp(3.min(height), height);
    (w, h)
}

/// Nearest-neighbour resample of a single-channel plane
pub fn resize_nearest(src: &[u8], sw: usize, sh: usize, dst: &mut [u8], dw: usize, dh: usize) {
    debug_assert!(src.len() >= sw * sh && dst.len() >= dw * dh);

    if sw == dw && sh == dh {
        dst[..dw * dh].copy_from_slice(&src[..sw * sh]);
        return;
    }

    for y in 0..dh {
        let sy = y * sh / dh;
        let src_row = &src[sy * sw..(sy + 1) * sw];
        let dst_row = &mut dst[y * dw..(y + 1) * dw];
        for (x, out) in dst_row.iter_mut().enumerate() {
            *out = src_row[x * sw / dw];
        }
    }
}

fn check_len(frame: &Frame) -> Result<usize> {
    let (width, height, format) = (frame.width(), frame.height(), frame.format());
    let expected = format.byte_len(width, height).ok_or_else(|| {
        PipelineError::invalid_format(format!("{}x{} is not a valid {} size", width, height, format))
    })?;
    if frame.data.len() != expected {
        return Err(PipelineError::invalid_format(format!(
            "{} plane data is {} bytes, expected {}",
            format,
            frame.data.len(),
            expected
        )));
    }
    Ok(width as usize * height as usize)
}

fn chroma_at(
    src: &[u8],
    format: PixelFormat,
    width: usize,
    height: usize,
    col: usize,
    row: usize,
) -> (u8, u8) {
    let luma_len = width * height;
    match format {
        PixelFormat::Yuv420 => {
            let idx = (row / 2) * (width / 2) + col / 2;
            (src[luma_len + idx], src[luma_len + luma_len / 4 + idx])
        }
        PixelFormat::Nv21 => {
            let idx = luma_len + (row / 2) * width + (col / 2) * 2;
            (src[idx + 1], src[idx])
        }
        PixelFormat::Nv12 => {
            let idx = luma_len + (row / 2) * width + (col / 2) * 2;
            (src[idx], src[idx + 1])
        }
        PixelFormat::Gray8 | PixelFormat::Rgb888 => (128, 128),
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

// BT.601 full range, 8.8 fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = y + ((359 * e) >> 8);
    let g = y - ((88 * d + 183 * e) >> 8);
    let b = y + ((454 * d) >> 8);
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}
