//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct, an ideal distortion-free camera.
//! It plays the role of the *linear* camera in a remap: the undistorted side of every
//! table is described by a pinhole model whose matrix is estimated from the lens model
//! (see [`CameraModel::optimal_pinhole`]).

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a Pinhole camera model.
///
/// # Examples
///
/// ```rust
/// use distortion_tools::camera::{CameraModel, Intrinsics, PinholeModel, Resolution};
/// use nalgebra::Vector3;
///
/// let model = PinholeModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
///
/// let pixel = model.project(&Vector3::new(0.1, 0.2, 1.0)).unwrap();
/// assert!((pixel.x - 370.0).abs() < 1e-9);
/// assert!((pixel.y - 340.0).abs() < 1e-9);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a validated [`PinholeModel`].
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidResolution`]
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Creates a [`PinholeModel`] from a single precision 3x3 camera matrix.
    pub fn from_matrix(
        matrix: &Matrix3<f32>,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        Self::new(Intrinsics::from_matrix(matrix), resolution)
    }

    pub fn matrix(&self) -> Matrix3<f32> {
        self.intrinsics.to_matrix()
    }
}

impl fmt::Debug for PinholeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PinholeModel [fx: {} fy: {} cx: {} cy: {} resolution: {}x{}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.resolution.width,
            self.resolution.height,
        )
    }
}

impl CameraModel for PinholeModel {
    /// Projects a ray with the pinhole equations `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: the ray does not point forward.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let u = self.intrinsics.fx * point_3d.x / point_3d.z + self.intrinsics.cx;
        let v = self.intrinsics.fy * point_3d.y / point_3d.z + self.intrinsics.cy;
        Ok(Vector2::new(u, v))
    }

    /// Unprojects a pixel to the normalized direction of `((u - cx) / fx, (v - cy) / fy, 1)`.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let m = self.intrinsics.normalize(point_2d);

        let r2 = m.x * m.x + m.y * m.y;
        let norm_inv = 1.0 / (1.0 + r2).sqrt();

        Ok(Vector3::new(m.x * norm_inv, m.y * norm_inv, norm_inv))
    }

    fn optimal_pinhole(&self, _alpha: f64) -> Result<PinholeModel, CameraModelError> {
        // Nothing to compensate, the linear camera is the camera itself.
        Ok(self.clone())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_resolution(&self.resolution)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![] // Pinhole model has no distortion parameters
    }

    fn name(&self) -> &'static str {
        "Pinhole"
    }
}
