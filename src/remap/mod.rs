//! Dense remap tables.
//!
//! A [`RemapTable`] holds, for every destination pixel, the source coordinate it is
//! sampled from. The table is computed once per sequence from the lens model and the
//! ideal pinhole camera that keeps [`RETENTION_ALPHA`] of the field of view:
//!
//! * [`ProcessingDirection::RemoveDistortion`]: destination is the linear image.
//!   `linear.unproject` followed by `lens.project` gives the distorted source pixel.
//! * [`ProcessingDirection::ApplyDistortion`]: destination is the distorted image.
//!   `lens.unproject` followed by `linear.project` gives the linear source pixel.
//!
//! Coordinates are stored in fixed point with [`INTER_BITS`] fractional bits, which
//! bounds the sub-pixel quantization to `1/32` of a pixel. Each entry takes six bytes:
//! the integer pixel as an `i16` pair and both fractional parts packed into one `u16`
//! index, `(y_frac << INTER_BITS) | x_frac`. Sources whose integer part does not fit
//! an `i16` are stored as invalid entries.

use crate::camera::{CameraModel, CameraModelError, Resolution};
use log::{debug, info};
use nalgebra::{Matrix3, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod resample;

pub use resample::{remap_interleaved, ResampleError, Sample};

/// Fraction of the undistorted field of view kept by the linear camera (no cropping).
pub const RETENTION_ALPHA: f64 = 1.0;

/// Fractional bits of a table coordinate.
pub const INTER_BITS: u32 = 5;

/// Sub-pixel positions per pixel, `2^INTER_BITS`.
pub const INTER_TAB_SIZE: i32 = 1 << INTER_BITS;

/// Marks a destination pixel without a source, e.g. a ray behind the camera.
const INVALID: i16 = i16::MIN;

const FRAC_MASK: u16 = (INTER_TAB_SIZE - 1) as u16;

/// Direction of the geometric mapping, fixed for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingDirection {
    /// Produce distorted frames from linear ones.
    ApplyDistortion,
    /// Produce linear frames from distorted ones.
    #[default]
    RemoveDistortion,
}

impl fmt::Display for ProcessingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingDirection::ApplyDistortion => write!(f, "Reverse (Distorting)"),
            ProcessingDirection::RemoveDistortion => write!(f, "Restore (Undistorting)"),
        }
    }
}

/// Per-pixel source coordinates in fixed point, row-major.
#[derive(Clone, PartialEq)]
pub struct RemapTable {
    resolution: Resolution,
    /// Integer source pixel `[x, y]`.
    map: Vec<[i16; 2]>,
    /// Sub-pixel index, `(y_frac << INTER_BITS) | x_frac`.
    frac: Vec<u16>,
    camera_matrix: Matrix3<f32>,
}

/// One valid table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FixedPoint {
    pub x: i16,
    pub y: i16,
    pub frac: u16,
}

impl FixedPoint {
    /// Sub-pixel offsets in `[0, 1)`.
    pub fn weights(&self) -> (f32, f32) {
        let scale = INTER_TAB_SIZE as f32;
        (
            (self.frac & FRAC_MASK) as f32 / scale,
            (self.frac >> INTER_BITS) as f32 / scale,
        )
    }
}

impl RemapTable {
    /// Builds a table by evaluating `source` for every destination pixel.
    ///
    /// `None`, non-finite and unrepresentable coordinates are stored as invalid entries
    /// and resample to the border value.
    pub fn from_fn<F>(resolution: Resolution, mut source: F) -> Self
    where
        F: FnMut(u32, u32) -> Option<Vector2<f64>>,
    {
        let len = resolution.width as usize * resolution.height as usize;
        let mut map = Vec::with_capacity(len);
        let mut frac = Vec::with_capacity(len);

        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let entry = source(x, y).and_then(|point| {
                    let (ix, fx) = to_fixed(point.x)?;
                    let (iy, fy) = to_fixed(point.y)?;
                    Some(([ix, iy], (fy << INTER_BITS) | fx))
                });
                let (integer, fraction) = entry.unwrap_or(([INVALID, INVALID], 0));
                map.push(integer);
                frac.push(fraction);
            }
        }

        RemapTable {
            resolution,
            map,
            frac,
            camera_matrix: Matrix3::identity(),
        }
    }

    /// Table that samples every pixel from itself.
    pub fn identity(resolution: Resolution) -> Self {
        Self::from_fn(resolution, |x, y| Some(Vector2::new(x as f64, y as f64)))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Heap size of the coordinate storage.
    pub fn size_in_bytes(&self) -> usize {
        self.map.len() * std::mem::size_of::<[i16; 2]>()
            + self.frac.len() * std::mem::size_of::<u16>()
    }

    /// Camera matrix of the linear side of the mapping.
    pub fn camera_matrix(&self) -> &Matrix3<f32> {
        &self.camera_matrix
    }

    /// Source coordinate of destination pixel `(x, y)`, `None` for invalid entries and
    /// pixels outside the table.
    pub fn source(&self, x: u32, y: u32) -> Option<Vector2<f32>> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let index = y as usize * self.resolution.width as usize + x as usize;
        let point = self.entry(index)?;
        let (ax, ay) = point.weights();
        Some(Vector2::new(point.x as f32 + ax, point.y as f32 + ay))
    }

    /// Number of destination pixels without a source.
    pub fn invalid_count(&self) -> usize {
        self.map.iter().filter(|[x, _]| *x == INVALID).count()
    }

    fn entry(&self, index: usize) -> Option<FixedPoint> {
        let [x, y] = self.map[index];
        (x != INVALID).then_some(FixedPoint {
            x,
            y,
            frac: self.frac[index],
        })
    }

    /// Entries in row-major order, `None` for pixels without a source.
    pub(crate) fn entries(&self) -> impl Iterator<Item = Option<FixedPoint>> + '_ {
        (0..self.map.len()).map(|index| self.entry(index))
    }
}

impl fmt::Debug for RemapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RemapTable [{}x{}, invalid: {}]",
            self.resolution.width,
            self.resolution.height,
            self.invalid_count()
        )
    }
}

/// Splits `value` into its integer pixel and sub-pixel index.
fn to_fixed(value: f64) -> Option<(i16, u16)> {
    let fixed = (value * INTER_TAB_SIZE as f64).round();
    if !fixed.is_finite() {
        return None;
    }
    // Saturating cast; anything that large is rejected below.
    let fixed = fixed as i64;
    let integer = fixed >> INTER_BITS;
    if integer <= INVALID as i64 || integer > i16::MAX as i64 {
        return None;
    }
    Some((integer as i16, (fixed & (INTER_TAB_SIZE as i64 - 1)) as u16))
}

/// Builds the remap table for `model` in `direction`.
///
/// The linear camera is estimated with `model.optimal_pinhole(alpha)` at the model's
/// resolution, which also becomes the table (and output frame) resolution.
///
/// # Errors
///
/// Fails when the linear camera cannot be estimated. Individual pixels that cannot be
/// mapped do not fail the build; they are stored as invalid entries.
pub fn build_remap_table(
    model: &dyn CameraModel,
    direction: ProcessingDirection,
    alpha: f64,
) -> Result<RemapTable, CameraModelError> {
    let linear = model.optimal_pinhole(alpha)?;
    let camera_matrix = linear.matrix();
    info!("New camera matrix (K'): {camera_matrix:?}");

    let mut table = RemapTable::from_fn(model.get_resolution(), |x, y| {
        let pixel = Vector2::new(x as f64, y as f64);
        let source = match direction {
            ProcessingDirection::RemoveDistortion => linear
                .unproject(&pixel)
                .and_then(|ray| model.project(&ray)),
            ProcessingDirection::ApplyDistortion => model
                .unproject(&pixel)
                .and_then(|ray| linear.project(&ray)),
        };
        source.ok()
    });
    table.camera_matrix = camera_matrix;

    debug!(
        "{} table for {} model: {:?}",
        direction,
        model.name(),
        table
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, KannalaBrandtModel, PinholeModel, RadTanModel};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn resolution() -> Resolution {
        Resolution {
            width: 160,
            height: 120,
        }
    }

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 79.5,
            cy: 59.5,
        }
    }

    #[test]
    fn test_fixed_point_quantization() {
        let table = RemapTable::from_fn(resolution(), |x, y| {
            Some(Vector2::new(x as f64 + 0.26, y as f64 - 0.5))
        });
        let source = table.source(10, 20).unwrap();
        // 0.26 px rounds to the nearest 1/32.
        assert_relative_eq!(source.x, 10.25);
        assert_relative_eq!(source.y, 19.5);
        assert_eq!(table.len(), 160 * 120);
        assert_eq!(table.invalid_count(), 0);
    }

    #[test]
    fn test_table_takes_six_bytes_per_pixel() {
        let table = RemapTable::identity(resolution());
        assert_eq!(table.size_in_bytes(), 160 * 120 * 6);
    }

    #[test]
    fn test_negative_fraction_floors() {
        let table = RemapTable::from_fn(resolution(), |_, _| Some(Vector2::new(-0.5, -1.25)));
        let point = table.entries().next().flatten().unwrap();
        assert_eq!((point.x, point.y), (-1, -2));
        assert_eq!(point.weights(), (0.5, 0.75));
        assert_eq!(table.source(0, 0), Some(Vector2::new(-0.5, -1.25)));
    }

    #[test]
    fn test_coordinate_range() {
        let table = RemapTable::from_fn(resolution(), |x, _| match x {
            0 => Some(Vector2::new(32767.5, -32767.0)),
            1 => Some(Vector2::new(32768.0, 0.0)),
            2 => Some(Vector2::new(0.0, -32768.0)),
            _ => Some(Vector2::new(0.0, -32767.9)),
        });
        assert_eq!(table.source(0, 0), Some(Vector2::new(32767.5, -32767.0)));
        assert_eq!(table.source(1, 0), None);
        assert_eq!(table.source(2, 0), None);
        assert_eq!(table.source(3, 0), None);
        assert_eq!(table.invalid_count(), (160 - 1) * 120);
    }

    #[test]
    fn test_invalid_entries() {
        let table = RemapTable::from_fn(resolution(), |x, _| match x {
            0 => None,
            1 => Some(Vector2::new(f64::NAN, 0.0)),
            2 => Some(Vector2::new(1e12, 0.0)),
            _ => Some(Vector2::new(-3.0, -4.0)),
        });
        assert_eq!(table.source(0, 0), None);
        assert_eq!(table.source(1, 5), None);
        assert_eq!(table.source(2, 7), None);
        assert_eq!(table.source(3, 0), Some(Vector2::new(-3.0, -4.0)));
        assert_eq!(table.source(160, 0), None);
        assert_eq!(table.invalid_count(), 3 * 120);
    }

    #[test]
    fn test_pinhole_table_is_identity() {
        let model = PinholeModel::new(intrinsics(), resolution()).unwrap();
        for direction in [
            ProcessingDirection::RemoveDistortion,
            ProcessingDirection::ApplyDistortion,
        ] {
            let table = build_remap_table(&model, direction, RETENTION_ALPHA).unwrap();
            assert_eq!(table, {
                let mut identity = RemapTable::identity(resolution());
                identity.camera_matrix = model.matrix();
                identity
            });
        }
    }

    #[test]
    fn test_zero_distortion_radtan_is_affine() {
        let model = RadTanModel::new(intrinsics(), resolution(), [0.0; 6]).unwrap();
        let linear = model.optimal_pinhole(RETENTION_ALPHA).unwrap();
        let (k, k_new) = (&model.intrinsics, &linear.intrinsics);

        let remove =
            build_remap_table(&model, ProcessingDirection::RemoveDistortion, RETENTION_ALPHA)
                .unwrap();
        let apply =
            build_remap_table(&model, ProcessingDirection::ApplyDistortion, RETENTION_ALPHA)
                .unwrap();
        assert_eq!(remove.invalid_count(), 0);
        assert_eq!(apply.invalid_count(), 0);

        for (x, y) in [(0u32, 0u32), (80, 60), (159, 119), (17, 101)] {
            let (px, py) = (x as f64, y as f64);

            let source = remove.source(x, y).unwrap();
            let expected_x = (px - k_new.cx) / k_new.fx * k.fx + k.cx;
            let expected_y = (py - k_new.cy) / k_new.fy * k.fy + k.cy;
            assert_relative_eq!(source.x as f64, expected_x, epsilon = 1.0 / 32.0);
            assert_relative_eq!(source.y as f64, expected_y, epsilon = 1.0 / 32.0);

            let source = apply.source(x, y).unwrap();
            let expected_x = (px - k.cx) / k.fx * k_new.fx + k_new.cx;
            let expected_y = (py - k.cy) / k.fy * k_new.fy + k_new.cy;
            assert_relative_eq!(source.x as f64, expected_x, epsilon = 1.0 / 32.0);
            assert_relative_eq!(source.y as f64, expected_y, epsilon = 1.0 / 32.0);
        }
    }

    #[test]
    fn test_remove_distortion_samples_distorted_pixels() {
        let model =
            RadTanModel::new(intrinsics(), resolution(), [-0.1, 0.0, 0.001, 0.0, 0.0, 0.0])
                .unwrap();
        let table =
            build_remap_table(&model, ProcessingDirection::RemoveDistortion, RETENTION_ALPHA)
                .unwrap();
        let linear = model.optimal_pinhole(RETENTION_ALPHA).unwrap();
        assert_eq!(table.camera_matrix(), &linear.matrix());

        let expected = model
            .project(&linear.unproject(&Vector2::new(20.0, 30.0)).unwrap())
            .unwrap();
        let source = table.source(20, 30).unwrap();
        assert_relative_eq!(source.x as f64, expected.x, epsilon = 1.0 / 32.0);
        assert_relative_eq!(source.y as f64, expected.y, epsilon = 1.0 / 32.0);
    }

    #[test]
    fn test_apply_distortion_samples_linear_pixels() {
        let model = KannalaBrandtModel::new(
            Intrinsics {
                fx: 120.0,
                fy: 120.0,
                cx: 79.5,
                cy: 59.5,
            },
            resolution(),
            [0.02, 0.005, 0.0, 0.0],
        )
        .unwrap();
        let table =
            build_remap_table(&model, ProcessingDirection::ApplyDistortion, RETENTION_ALPHA)
                .unwrap();
        let linear = model.optimal_pinhole(RETENTION_ALPHA).unwrap();

        let ray = model.unproject(&Vector2::new(150.0, 10.0)).unwrap();
        let expected = linear.project(&ray).unwrap();
        let source = table.source(150, 10).unwrap();
        assert_relative_eq!(source.x as f64, expected.x, epsilon = 1.0 / 32.0);
        assert_relative_eq!(source.y as f64, expected.y, epsilon = 1.0 / 32.0);

        // The optical axis stays where the linear camera puts it.
        let center = linear.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert!((center.x - 79.5).abs() < 1.0 && (center.y - 59.5).abs() < 1.0);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(ProcessingDirection::default(), ProcessingDirection::RemoveDistortion);
        assert_eq!(
            ProcessingDirection::RemoveDistortion.to_string(),
            "Restore (Undistorting)"
        );
        assert_eq!(
            ProcessingDirection::ApplyDistortion.to_string(),
            "Reverse (Distorting)"
        );
    }
}
