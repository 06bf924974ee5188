//! Camera models used to build distortion remap tables.
//!
//! Every lens model implements the [`CameraModel`] trait: `project` maps a 3D ray in
//! camera coordinates to a (distorted) pixel coordinate, `unproject` maps a pixel back
//! to a unit ray. A remap table is nothing more than a composition of the lens model
//! with an ideal [`PinholeModel`] in one direction or the other.
//!
//! Unlike a calibration tool, these models never reject pixels that fall outside the
//! image: a remap table has to record where every destination pixel comes from, even
//! when that location is off the source frame.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod kannala_brandt;
pub mod pinhole;
pub mod rad_tan;

pub use kannala_brandt::KannalaBrandtModel;
pub use pinhole::PinholeModel;
pub use rad_tan::RadTanModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Builds intrinsics from a 3x3 camera matrix `[[fx,0,cx],[0,fy,cy],[0,0,1]]`.
    pub fn from_matrix(matrix: &Matrix3<f32>) -> Self {
        Intrinsics {
            fx: matrix[(0, 0)] as f64,
            fy: matrix[(1, 1)] as f64,
            cx: matrix[(0, 2)] as f64,
            cy: matrix[(1, 2)] as f64,
        }
    }

    /// Single precision camera matrix, the representation used for every intermediate
    /// matrix of a table build.
    pub fn to_matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx as f32,
            0.0,
            self.cx as f32,
            0.0,
            self.fy as f32,
            self.cy as f32,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Pixel coordinate to normalized image plane coordinate.
    pub fn normalize(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    /// Normalized image plane coordinate to pixel coordinate.
    pub fn denormalize(&self, point: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(self.fx * point.x + self.cx, self.fy * point.y + self.cy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
}

/// Trait defining the core functionality for lens models.
pub trait CameraModel {
    /// Project a 3D ray in camera coordinates to a distorted pixel coordinate.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject a distorted pixel coordinate to a unit ray.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Ideal pinhole camera that keeps `alpha` of the undistorted field of view.
    ///
    /// `alpha = 1.0` keeps every source pixel (black borders allowed), `alpha = 0.0`
    /// crops to valid pixels only.
    fn optimal_pinhole(&self, alpha: f64) -> Result<PinholeModel, CameraModelError>;

    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_distortion(&self) -> Vec<f64>;

    /// Human readable model name for logs.
    fn name(&self) -> &'static str;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CameraModelError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::InvalidResolution {
                width: resolution.width,
                height: resolution.height,
            });
        }
        Ok(())
    }

    pub fn validate_coefficients(coefficients: &[f64]) -> Result<(), CameraModelError> {
        if let Some(index) = coefficients.iter().position(|c| !c.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "Distortion coefficient at index {index} is not finite"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intrinsics_matrix_round_trip() {
        let intrinsics = Intrinsics {
            fx: 500.0,
            fy: 480.0,
            cx: 320.5,
            cy: 240.25,
        };
        let matrix = intrinsics.to_matrix();
        assert_eq!(matrix[(0, 1)], 0.0);
        assert_eq!(matrix[(2, 2)], 1.0);
        assert_eq!(Intrinsics::from_matrix(&matrix), intrinsics);
    }

    #[test]
    fn test_normalize_denormalize() {
        let intrinsics = Intrinsics {
            fx: 400.0,
            fy: 300.0,
            cx: 200.0,
            cy: 150.0,
        };
        let pixel = Vector2::new(250.0, 90.0);
        let normalized = intrinsics.normalize(&pixel);
        assert_relative_eq!(normalized.x, 0.125);
        assert_relative_eq!(normalized.y, -0.2);
        let back = intrinsics.denormalize(&normalized);
        assert_relative_eq!(back.x, pixel.x);
        assert_relative_eq!(back.y, pixel.y);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut intrinsics = Intrinsics {
            fx: 0.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
        };
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
        intrinsics.fx = 1.0;
        intrinsics.cy = f64::NAN;
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
        assert!(validation::validate_resolution(&Resolution {
            width: 0,
            height: 10
        })
        .is_err());
        assert!(validation::validate_coefficients(&[0.1, f64::INFINITY]).is_err());
    }
}
