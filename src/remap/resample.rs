//! Bilinear resampling of interleaved sample buffers through a [`RemapTable`].
//!
//! Border policy is constant zero: every one of the four bilinear taps that falls
//! outside the source contributes zero, so edges fade to black instead of being
//! clamped or wrapped. Destination pixels without a source are zero.

use crate::remap::RemapTable;
use exr::prelude::f16;

/// A pixel channel value that can be resampled.
///
/// Integer samples are rounded and saturated on the way back; float samples are
/// passed through unclamped to keep the full dynamic range.
pub trait Sample: Copy {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl Sample for u8 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        // `as` saturates and maps NaN to zero.
        value.round() as u8
    }
}

impl Sample for u16 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value.round() as u16
    }
}

impl Sample for u32 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value.round() as u32
    }
}

impl Sample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Sample for f16 {
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("Buffer holds {actual} samples, expected {expected} for {width}x{height}x{channels}")]
    BufferSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        channels: usize,
    },
    #[error("A pixel must have at least one channel")]
    NoChannels,
}

/// Resamples a row-major interleaved buffer of `width x height` pixels with
/// `channels` samples each.
///
/// The result has the table's resolution and the same channel layout as `src`.
pub fn remap_interleaved<T: Sample>(
    src: &[T],
    width: u32,
    height: u32,
    channels: usize,
    table: &RemapTable,
) -> Result<Vec<T>, ResampleError> {
    if channels == 0 {
        return Err(ResampleError::NoChannels);
    }
    let expected = width as usize * height as usize * channels;
    if src.len() != expected {
        return Err(ResampleError::BufferSize {
            expected,
            actual: src.len(),
            width,
            height,
            channels,
        });
    }

    let zero = T::from_f32(0.0);
    let mut dst = vec![zero; table.len() * channels];
    let (w, h) = (width as i64, height as i64);
    let mut acc = vec![0.0f32; channels];

    for (pixel, entry) in dst.chunks_exact_mut(channels).zip(table.entries()) {
        let Some(point) = entry else {
            continue;
        };

        let (x0, y0) = (point.x as i64, point.y as i64);
        if x0 < -1 || y0 < -1 || x0 >= w || y0 >= h {
            continue;
        }
        let (ax, ay) = point.weights();

        let taps = [
            (x0, y0, (1.0 - ax) * (1.0 - ay)),
            (x0 + 1, y0, ax * (1.0 - ay)),
            (x0, y0 + 1, (1.0 - ax) * ay),
            (x0 + 1, y0 + 1, ax * ay),
        ];

        acc.fill(0.0);
        for (tx, ty, weight) in taps {
            if weight == 0.0 || tx < 0 || ty < 0 || tx >= w || ty >= h {
                continue;
            }
            let offset = (ty * w + tx) as usize * channels;
            for (sum, &sample) in acc.iter_mut().zip(&src[offset..offset + channels]) {
                *sum += weight * sample.to_f32();
            }
        }

        for (out, &sum) in pixel.iter_mut().zip(&acc) {
            *out = T::from_f32(sum);
        }
    }

    Ok(dst)
}
