//! Implements the equidistant fisheye (Kannala-Brandt) camera model.
//!
//! A ray at angle `θ` from the optical axis lands at distance
//! `θ_d = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)` from the principal point on the
//! normalized plane. There are no tangential terms.

use crate::camera::{
    validation, CameraModel, CameraModelError, Intrinsics, PinholeModel, Resolution,
};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::fmt;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KannalaBrandtModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub coefficients: [f64; 4], // k1, k2, k3, k4
}

impl KannalaBrandtModel {
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        coefficients: [f64; 4],
    ) -> Result<Self, CameraModelError> {
        let model = KannalaBrandtModel {
            intrinsics,
            resolution,
            coefficients,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Distorted angle `θ_d` for an incidence angle `θ`.
    pub fn distort_theta(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.coefficients;
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        theta * (1.0 + k1 * theta2 + k2 * theta4 + k3 * theta6 + k4 * theta8)
    }

    /// Solves `distort_theta(θ) = θ_d` with Newton iterations starting at zero.
    ///
    /// Returns `None` when the iteration does not converge or converges to a root on
    /// the other side of the optical axis.
    pub fn undistort_theta(&self, theta_d: f64) -> Option<f64> {
        const EPS: f64 = 1e-8;
        const MAX_ITERATIONS: u32 = 10;
        const MAX_STEP: f64 = 0.9;

        // The model is only meaningful up to a 180 degree field of view.
        let theta_d = theta_d.clamp(-FRAC_PI_2, FRAC_PI_2);
        if theta_d.abs() <= EPS {
            return Some(theta_d);
        }

        let [k1, k2, k3, k4] = self.coefficients;
        let mut theta = 0.0f64;
        for _ in 0..MAX_ITERATIONS {
            let theta2 = theta * theta;
            let theta4 = theta2 * theta2;
            let theta6 = theta4 * theta2;
            let theta8 = theta6 * theta2;

            let derivative =
                1.0 + 3.0 * k1 * theta2 + 5.0 * k2 * theta4 + 7.0 * k3 * theta6 + 9.0 * k4 * theta8;
            let step = ((self.distort_theta(theta) - theta_d) / derivative)
                .clamp(-MAX_STEP, MAX_STEP);
            theta -= step;

            if step.abs() < EPS {
                let flipped = (theta_d < 0.0 && theta > 0.0) || (theta_d > 0.0 && theta < 0.0);
                return (!flipped && theta.is_finite()).then_some(theta);
            }
        }
        None
    }

    /// Undistorts a pixel onto the normalized plane of the linear camera (`z = 1`).
    fn undistort_to_plane(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        let ray = self.unproject(pixel)?;
        if ray.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        Ok(Vector2::new(ray.x / ray.z, ray.y / ray.z))
    }
}

impl fmt::Debug for KannalaBrandtModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KannalaBrandtModel [fx: {} fy: {} cx: {} cy: {} coefficients: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.coefficients,
        )
    }
}

impl CameraModel for KannalaBrandtModel {
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let x = point_3d.x / point_3d.z;
        let y = point_3d.y / point_3d.z;
        let r = (x * x + y * y).sqrt();

        let theta = r.atan();
        let scale = if r > 0.0 {
            self.distort_theta(theta) / r
        } else {
            1.0
        };

        Ok(self
            .intrinsics
            .denormalize(&Vector2::new(x * scale, y * scale)))
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let m = self.intrinsics.normalize(point_2d);
        let theta_d = (m.x * m.x + m.y * m.y).sqrt();

        if theta_d < f64::EPSILON {
            return Ok(Vector3::new(0.0, 0.0, 1.0));
        }

        let theta = self.undistort_theta(theta_d).ok_or_else(|| {
            CameraModelError::NumericalError(format!(
                "Fisheye undistortion did not converge for theta_d = {theta_d}"
            ))
        })?;

        let (sin_theta, cos_theta) = theta.sin_cos();
        Ok(Vector3::new(
            sin_theta * m.x / theta_d,
            sin_theta * m.y / theta_d,
            cos_theta,
        ))
    }

    /// Estimates the linear camera from the four edge midpoints of the image.
    ///
    /// `alpha` acts as the balance between the smallest focal length that keeps every
    /// edge midpoint (`1.0`) and the largest one (`0.0`).
    fn optimal_pinhole(&self, alpha: f64) -> Result<PinholeModel, CameraModelError> {
        let balance = alpha.clamp(0.0, 1.0);
        let w = self.resolution.width;
        let h = self.resolution.height;

        let midpoints = [
            Vector2::new((w / 2) as f64, 0.0),
            Vector2::new(w as f64, (h / 2) as f64),
            Vector2::new((w / 2) as f64, h as f64),
            Vector2::new(0.0, (h / 2) as f64),
        ];

        let aspect_ratio = self.intrinsics.fx / self.intrinsics.fy;
        let mut points = Vec::with_capacity(midpoints.len());
        for pixel in &midpoints {
            let mut point = self.undistort_to_plane(pixel)?;
            // Work in identity aspect ratio.
            point.y *= aspect_ratio;
            points.push(point);
        }

        let center = points.iter().sum::<Vector2<f64>>() / points.len() as f64;
        let min_x = points.iter().map(|p| p.x).fold(f64::MAX, f64::min);
        let max_x = points.iter().map(|p| p.x).fold(f64::MIN, f64::max);
        let min_y = points.iter().map(|p| p.y).fold(f64::MAX, f64::min);
        let max_y = points.iter().map(|p| p.y).fold(f64::MIN, f64::max);

        let (w, h) = (w as f64, h as f64);
        let candidates = [
            w * 0.5 / (center.x - min_x),
            w * 0.5 / (max_x - center.x),
            h * 0.5 * aspect_ratio / (center.y - min_y),
            h * 0.5 * aspect_ratio / (max_y - center.y),
        ];
        let f_min = candidates.iter().copied().fold(f64::MAX, f64::min);
        let f_max = candidates.iter().copied().fold(f64::MIN, f64::max);
        if !(f_min.is_finite() && f_max.is_finite() && f_min > 0.0) {
            return Err(CameraModelError::NumericalError(
                "Degenerate fisheye extent while estimating the linear camera".to_string(),
            ));
        }

        let f = balance * f_min + (1.0 - balance) * f_max;
        let intrinsics = Intrinsics {
            fx: f,
            fy: f / aspect_ratio,
            cx: -center.x * f + w * 0.5,
            cy: (-center.y * f + h * aspect_ratio * 0.5) / aspect_ratio,
        };

        PinholeModel::from_matrix(&intrinsics.to_matrix(), self.resolution)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_resolution(&self.resolution)?;
        validation::validate_coefficients(&self.coefficients)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.coefficients.to_vec()
    }

    fn name(&self) -> &'static str {
        "Fisheye"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_model() -> KannalaBrandtModel {
        KannalaBrandtModel::new(
            Intrinsics {
                fx: 190.97847715128717,
                fy: 190.9733070521226,
                cx: 254.93170605935475,
                cy: 256.8974428996504,
            },
            Resolution {
                width: 512,
                height: 512,
            },
            [
                0.0034823894022493434,
                0.0007150348452162257,
                -0.0020532361418706202,
                0.00020293673591811182,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_kb_project_unproject() {
        let model = sample_model();
        let point_3d = Vector3::new(0.6, -0.4, 1.0);

        let pixel = model.project(&point_3d).unwrap();
        let ray = model.unproject(&pixel).unwrap();

        assert_relative_eq!(ray, point_3d.normalize(), epsilon = 1e-7);
    }

    #[test]
    fn test_kb_principal_point_maps_to_axis() {
        let model = sample_model();
        let center = Vector2::new(model.intrinsics.cx, model.intrinsics.cy);
        let ray = model.unproject(&center).unwrap();
        assert_relative_eq!(ray, Vector3::new(0.0, 0.0, 1.0));

        let pixel = model.project(&Vector3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(pixel, center);
    }

    #[test]
    fn test_kb_theta_inverse() {
        let model = sample_model();
        for theta in [0.05, 0.4, 0.9, 1.3] {
            let theta_d = model.distort_theta(theta);
            let recovered = model.undistort_theta(theta_d).unwrap();
            assert_relative_eq!(recovered, theta, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_kb_equidistant_without_coefficients() {
        let mut model = sample_model();
        model.coefficients = [0.0; 4];

        // 45 degrees off axis lands at pi/4 focal lengths from the center.
        let pixel = model.project(&Vector3::new(1.0, 0.0, 1.0)).unwrap();
        assert_relative_eq!(
            pixel.x,
            model.intrinsics.cx + model.intrinsics.fx * std::f64::consts::FRAC_PI_4,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_kb_optimal_pinhole_balance() {
        let model = sample_model();
        let keep_all = model.optimal_pinhole(1.0).unwrap();
        let crop = model.optimal_pinhole(0.0).unwrap();

        assert!(keep_all.intrinsics.fx <= crop.intrinsics.fx);

        // Every edge midpoint of the fisheye frame stays inside the linear frame.
        for pixel in [
            Vector2::new(256.0, 0.0),
            Vector2::new(511.0, 256.0),
            Vector2::new(256.0, 511.0),
            Vector2::new(0.0, 256.0),
        ] {
            let ray = model.unproject(&pixel).unwrap();
            let linear = keep_all.project(&ray).unwrap();
            assert!(linear.x > -1.0 && linear.x < 513.0, "{linear:?}");
            assert!(linear.y > -1.0 && linear.y < 513.0, "{linear:?}");
        }
    }
}
