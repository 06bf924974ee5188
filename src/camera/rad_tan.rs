//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This is the perspective lens model used for every non-fisheye calibration. It
//! supports three polynomial radial terms, one rational radial term and two
//! tangential terms:
//!
//! ```text
//! g  = (1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r²)
//! xd = x g + 2 p1 x y + p2 (r² + 2 x²)
//! yd = y g + p1 (r² + 2 y²) + 2 p2 x y
//! ```
//!
//! With `k4 = 0` the model reduces to the classic five parameter Brown-Conrady model.

use crate::camera::{
    validation, CameraModel, CameraModelError, Intrinsics, PinholeModel, Resolution,
};
use log::warn;
use nalgebra::{Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of grid samples per axis used to measure the undistorted image extent.
const RECTANGLE_GRID: usize = 9;

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// The distortion coefficients are stored in the order `k1, k2, p1, p2, k3, k4`.
///
/// # Examples
///
/// ```rust
/// use distortion_tools::camera::{CameraModel, Intrinsics, RadTanModel, Resolution};
/// use nalgebra::Vector3;
///
/// let model = RadTanModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
///     [0.1, -0.05, 0.001, 0.001, 0.02, 0.0],
/// )
/// .unwrap();
///
/// let ray = Vector3::new(0.1, -0.1, 1.0);
/// let pixel = model.project(&ray).unwrap();
/// let back = model.unproject(&pixel).unwrap();
/// assert!((back - ray.normalize()).norm() < 1e-9);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RadTanModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub distortions: [f64; 6], // k1, k2, p1, p2, k3, k4
}

impl RadTanModel {
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        distortions: [f64; 6],
    ) -> Result<Self, CameraModelError> {
        let model = RadTanModel {
            intrinsics,
            resolution,
            distortions,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Applies the lens distortion to a point on the normalized image plane.
    pub fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3, k4] = self.distortions;
        let (x, y) = (point.x, point.y);

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2);

        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Inverts [`RadTanModel::distort`] with Newton-Raphson iterations, starting from
    /// the distorted point itself.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NumericalError`] when the Jacobian becomes singular or the
    /// iteration does not converge, which happens outside the region where the
    /// polynomial is invertible.
    pub fn undistort(&self, distorted: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        const EPS: f64 = 1e-10;
        const MAX_ITERATIONS: u32 = 20;

        let [k1, k2, p1, p2, k3, k4] = self.distortions;
        let mut point = *distorted;

        for _ in 0..MAX_ITERATIONS {
            let (x, y) = (point.x, point.y);
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;

            let numerator = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
            let denominator = 1.0 + k4 * r2;
            if denominator.abs() < f64::EPSILON {
                return Err(CameraModelError::NumericalError(
                    "Rational distortion term is singular".to_string(),
                ));
            }
            let radial = numerator / denominator;

            let error = self.distort(&point) - distorted;
            if error.norm() < EPS {
                return Ok(point);
            }

            // d(radial)/d(r²), then chain rule through r² = x² + y²
            let d_radial_dr2 = ((k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4) * denominator
                - numerator * k4)
                / (denominator * denominator);
            let d_radial_dx = d_radial_dr2 * 2.0 * x;
            let d_radial_dy = d_radial_dr2 * 2.0 * y;

            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + 6.0 * p2 * x;
            let j01 = x * d_radial_dy + 2.0 * p1 * x + 2.0 * p2 * y;
            let j10 = y * d_radial_dx + 2.0 * p1 * x + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + 6.0 * p1 * y + 2.0 * p2 * x;

            let jacobian = Matrix2::new(j00, j01, j10, j11);
            let inv_jacobian = jacobian.try_inverse().ok_or_else(|| {
                CameraModelError::NumericalError("Jacobian is singular".to_string())
            })?;

            let delta = inv_jacobian * error;
            point -= delta;

            if !point.x.is_finite() || !point.y.is_finite() {
                break;
            }
            if delta.norm() < EPS {
                return Ok(point);
            }
        }

        Err(CameraModelError::NumericalError(format!(
            "Undistortion did not converge after {MAX_ITERATIONS} iterations"
        )))
    }

    /// Inner (fully valid) and outer (bounding) rectangles of the undistorted image on
    /// the normalized plane, as `(x0, y0, x1, y1)`.
    fn undistorted_rectangles(&self) -> Result<([f64; 4], [f64; 4]), CameraModelError> {
        let width = self.resolution.width as f64;
        let height = self.resolution.height as f64;
        let n = RECTANGLE_GRID;

        let mut inner = [f64::MIN, f64::MIN, f64::MAX, f64::MAX];
        let mut outer = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
        let mut failures = 0usize;

        for row in 0..n {
            for col in 0..n {
                let pixel = Vector2::new(
                    col as f64 * width / (n - 1) as f64,
                    row as f64 * height / (n - 1) as f64,
                );
                let point = match self.undistort(&self.intrinsics.normalize(&pixel)) {
                    Ok(point) => point,
                    Err(_) => {
                        failures += 1;
                        continue;
                    }
                };

                outer[0] = outer[0].min(point.x);
                outer[1] = outer[1].min(point.y);
                outer[2] = outer[2].max(point.x);
                outer[3] = outer[3].max(point.y);

                if col == 0 {
                    inner[0] = inner[0].max(point.x);
                }
                if col == n - 1 {
                    inner[2] = inner[2].min(point.x);
                }
                if row == 0 {
                    inner[1] = inner[1].max(point.y);
                }
                if row == n - 1 {
                    inner[3] = inner[3].min(point.y);
                }
            }
        }

        if failures > 0 {
            warn!(
                "{failures} of {} boundary samples could not be undistorted",
                n * n
            );
        }
        if outer[2] <= outer[0] || outer[3] <= outer[1] {
            return Err(CameraModelError::NumericalError(
                "Undistorted image extent is empty".to_string(),
            ));
        }
        Ok((inner, outer))
    }
}

impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let distorted = self.distort(&normalized);

        Ok(self.intrinsics.denormalize(&distorted))
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let point = self.undistort(&self.intrinsics.normalize(point_2d))?;
        Ok(Vector3::new(point.x, point.y, 1.0).normalize())
    }

    /// Camera matrix mapping the undistorted image onto the original resolution.
    ///
    /// `alpha` interpolates between the projection of the inner rectangle (only valid
    /// pixels) and the projection of the outer rectangle (every source pixel).
    fn optimal_pinhole(&self, alpha: f64) -> Result<PinholeModel, CameraModelError> {
        let (inner, outer) = self.undistorted_rectangles()?;
        let width = self.resolution.width as f64;
        let height = self.resolution.height as f64;

        let fx0 = (width - 1.0) / (inner[2] - inner[0]);
        let fy0 = (height - 1.0) / (inner[3] - inner[1]);
        let cx0 = -fx0 * inner[0];
        let cy0 = -fy0 * inner[1];

        let fx1 = (width - 1.0) / (outer[2] - outer[0]);
        let fy1 = (height - 1.0) / (outer[3] - outer[1]);
        let cx1 = -fx1 * outer[0];
        let cy1 = -fy1 * outer[1];

        let intrinsics = Intrinsics {
            fx: fx0 * (1.0 - alpha) + fx1 * alpha,
            fy: fy0 * (1.0 - alpha) + fy1 * alpha,
            cx: cx0 * (1.0 - alpha) + cx1 * alpha,
            cy: cy0 * (1.0 - alpha) + cy1 * alpha,
        };

        // Round through single precision like every other intermediate matrix.
        PinholeModel::from_matrix(&intrinsics.to_matrix(), self.resolution)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_resolution(&self.resolution)?;
        validation::validate_coefficients(&self.distortions)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }

    fn name(&self) -> &'static str {
        "Perspective"
    }
}
