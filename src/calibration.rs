//! Camera calibration documents.
//!
//! A calibration is a flat JSON object in the layout written by common
//! structure-from-motion exporters (`transforms.json` style):
//!
//! ```json
//! { "fl_x": 1080.0, "fl_y": 1080.0, "cx": 960.0, "cy": 540.0, "w": 1920, "h": 1080,
//!   "k1": -0.05, "k2": 0.01, "p1": 0.0, "p2": 0.0, "is_fisheye": false }
//! ```
//!
//! `fl_x, fl_y, cx, cy, w, h` are mandatory; `k1..k4, p1, p2` default to zero and
//! `is_fisheye` to `false`. Numbers may also be given as numeric strings. Everything
//! is validated when the document is loaded.

use crate::camera::{
    validation, CameraModel, CameraModelError, Intrinsics, KannalaBrandtModel, RadTanModel,
    Resolution,
};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("JSON file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read calibration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed calibration document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Calibration document must be a JSON object")]
    NotAnObject,
    #[error("Missing critical key in JSON data: '{0}'")]
    MissingField(&'static str),
    #[error("Field '{field}' is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Field '{field}' is not a boolean: {value}")]
    InvalidBool { field: &'static str, value: String },
    #[error("Field '{field}' is not a valid image dimension: {value}")]
    InvalidDimension { field: &'static str, value: String },
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(#[from] CameraModelError),
    #[error("End frame {end} precedes start frame {start}")]
    InvalidFrameRange { start: i64, end: i64 },
    #[error("Frame range {start} to {end} holds more frames than can be counted")]
    FrameRangeTooLarge { start: i64, end: i64 },
}

/// Distortion coefficients in the order `[k1, k2, p1, p2, k3, k4]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionCoefficients(pub [f32; 6]);

impl DistortionCoefficients {
    /// Coefficients of the perspective model, `[k1, k2, p1, p2, k3, k4]`.
    pub fn perspective(&self) -> [f64; 6] {
        self.0.map(f64::from)
    }

    /// Coefficients of the fisheye model, `[k1, k2, k3, k4]`.
    pub fn fisheye(&self) -> [f64; 4] {
        let [k1, k2, _, _, k3, k4] = self.perspective();
        [k1, k2, k3, k4]
    }
}

impl fmt::Display for DistortionCoefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [k1, k2, p1, p2, k3, k4] = self.0;
        write!(
            f,
            "[k1: {k1}, k2: {k2}, p1: {p1}, p2: {p2}, k3: {k3}, k4: {k4}]"
        )
    }
}

/// Intrinsics, resolution and lens coefficients of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub fl_x: f64,
    pub fl_y: f64,
    pub cx: f64,
    pub cy: f64,
    pub w: u32,
    pub h: u32,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub p1: f64,
    pub p2: f64,
    pub is_fisheye: bool,
}

impl CameraCalibration {
    /// Loads and validates a calibration document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the file is missing or unreadable, is not a
    /// JSON object, lacks a mandatory key, or holds a value that cannot be coerced.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::NotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigurationError> {
        let doc: Value = serde_json::from_str(contents)?;
        Self::from_json_value(&doc)
    }

    pub fn from_json_value(doc: &Value) -> Result<Self, ConfigurationError> {
        let doc = doc.as_object().ok_or(ConfigurationError::NotAnObject)?;

        let calibration = CameraCalibration {
            fl_x: required_number(doc, "fl_x")?,
            fl_y: required_number(doc, "fl_y")?,
            cx: required_number(doc, "cx")?,
            cy: required_number(doc, "cy")?,
            w: required_dimension(doc, "w")?,
            h: required_dimension(doc, "h")?,
            k1: optional_number(doc, "k1")?,
            k2: optional_number(doc, "k2")?,
            k3: optional_number(doc, "k3")?,
            k4: optional_number(doc, "k4")?,
            p1: optional_number(doc, "p1")?,
            p2: optional_number(doc, "p2")?,
            is_fisheye: optional_bool(doc, "is_fisheye")?,
        };

        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics())?;
        validation::validate_resolution(&self.resolution())?;
        validation::validate_coefficients(&[self.k1, self.k2, self.k3, self.k4, self.p1, self.p2])?;
        Ok(())
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics {
            fx: self.fl_x,
            fy: self.fl_y,
            cx: self.cx,
            cy: self.cy,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.w,
            height: self.h,
        }
    }

    /// The calibration camera matrix `K` in single precision.
    pub fn intrinsic_matrix(&self) -> Matrix3<f32> {
        self.intrinsics().to_matrix()
    }

    pub fn distortion_coefficients(&self) -> DistortionCoefficients {
        DistortionCoefficients(
            [self.k1, self.k2, self.p1, self.p2, self.k3, self.k4].map(|c| c as f32),
        )
    }

    /// Builds the lens model selected by `is_fisheye` from the single precision matrix
    /// and coefficients.
    pub fn camera_model(&self) -> Result<Box<dyn CameraModel>, CameraModelError> {
        let intrinsics = Intrinsics::from_matrix(&self.intrinsic_matrix());
        let coefficients = self.distortion_coefficients();
        let model: Box<dyn CameraModel> = if self.is_fisheye {
            Box::new(KannalaBrandtModel::new(
                intrinsics,
                self.resolution(),
                coefficients.fisheye(),
            )?)
        } else {
            Box::new(RadTanModel::new(
                intrinsics,
                self.resolution(),
                coefficients.perspective(),
            )?)
        };
        Ok(model)
    }
}

fn required_number(
    doc: &Map<String, Value>,
    field: &'static str,
) -> Result<f64, ConfigurationError> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(ConfigurationError::MissingField(field)),
        Some(value) => coerce_number(field, value),
    }
}

fn optional_number(
    doc: &Map<String, Value>,
    field: &'static str,
) -> Result<f64, ConfigurationError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(0.0),
        Some(value) => coerce_number(field, value),
    }
}

fn coerce_number(field: &'static str, value: &Value) -> Result<f64, ConfigurationError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| ConfigurationError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Image dimensions accept integral floats (`1920.0`); fractional parts are truncated.
fn required_dimension(
    doc: &Map<String, Value>,
    field: &'static str,
) -> Result<u32, ConfigurationError> {
    let number = required_number(doc, field)?.trunc();
    if number < 1.0 || number > u32::MAX as f64 {
        return Err(ConfigurationError::InvalidDimension {
            field,
            value: number.to_string(),
        });
    }
    Ok(number as u32)
}

fn optional_bool(
    doc: &Map<String, Value>,
    field: &'static str,
) -> Result<bool, ConfigurationError> {
    let invalid = |value: &Value| ConfigurationError::InvalidBool {
        field,
        value: value.to_string(),
    };
    match doc.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(value @ Value::Number(number)) => {
            number.as_f64().map(|n| n != 0.0).ok_or_else(|| invalid(value))
        }
        Some(value @ Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            _ => Err(invalid(value)),
        },
        Some(value) => Err(invalid(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_load_from_json_sample() {
        let calibration = CameraCalibration::load_from_json("samples/transforms.json").unwrap();

        assert_relative_eq!(calibration.fl_x, 1101.4);
        assert_relative_eq!(calibration.fl_y, 1100.9);
        assert_relative_eq!(calibration.cx, 959.2);
        assert_relative_eq!(calibration.cy, 541.3);
        assert_eq!(calibration.w, 1920);
        assert_eq!(calibration.h, 1080);
        assert_relative_eq!(calibration.k1, -0.0621);
        assert_eq!(calibration.k4, 0.0);
        assert!(!calibration.is_fisheye);
    }

    #[test]
    fn test_load_fisheye_sample() {
        let calibration = CameraCalibration::load_from_json("samples/fisheye.json").unwrap();
        assert!(calibration.is_fisheye);

        let model = calibration.camera_model().unwrap();
        assert_eq!(model.name(), "Fisheye");
        assert_eq!(
            model.get_distortion(),
            calibration.distortion_coefficients().fisheye().to_vec()
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let calibration = CameraCalibration::from_json_value(&json!({
            "fl_x": 500, "fl_y": 500, "cx": 320, "cy": 240, "w": 640, "h": 480
        }))
        .unwrap();

        assert_eq!(calibration.k1, 0.0);
        assert_eq!(calibration.p2, 0.0);
        assert!(!calibration.is_fisheye);
        assert_eq!(calibration.camera_model().unwrap().name(), "Perspective");
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let calibration = CameraCalibration::from_json_value(&json!({
            "fl_x": "1080.0", "fl_y": " 1080.5 ", "cx": "960", "cy": 540.0,
            "w": "1920.0", "h": 1080.0, "k1": "-0.1", "is_fisheye": "true"
        }))
        .unwrap();

        assert_eq!(calibration.fl_x, 1080.0);
        assert_relative_eq!(calibration.fl_y, 1080.5);
        assert_eq!(calibration.w, 1920);
        assert_eq!(calibration.h, 1080);
        assert_relative_eq!(calibration.k1, -0.1);
        assert!(calibration.is_fisheye);
    }

    #[test]
    fn test_missing_mandatory_field() {
        let result = CameraCalibration::from_json_value(&json!({
            "fl_x": 500, "fl_y": 500, "cy": 240, "w": 640, "h": 480
        }));
        assert!(matches!(result, Err(ConfigurationError::MissingField("cx"))));
    }

    #[test]
    fn test_uncoercible_values() {
        let result = CameraCalibration::from_json_value(&json!({
            "fl_x": "wide", "fl_y": 500, "cx": 320, "cy": 240, "w": 640, "h": 480
        }));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidNumber { field: "fl_x", .. })
        ));

        let result = CameraCalibration::from_json_value(&json!({
            "fl_x": 500, "fl_y": 500, "cx": 320, "cy": 240, "w": 640, "h": 480,
            "is_fisheye": "maybe"
        }));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidBool { field: "is_fisheye", .. })
        ));
    }

    #[test]
    fn test_invalid_invariants() {
        let result = CameraCalibration::from_json_value(&json!({
            "fl_x": -1, "fl_y": 500, "cx": 320, "cy": 240, "w": 640, "h": 480
        }));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidCalibration(
                CameraModelError::FocalLengthMustBePositive
            ))
        ));

        let result = CameraCalibration::from_json_value(&json!({
            "fl_x": 1, "fl_y": 500, "cx": 320, "cy": 240, "w": 0, "h": 480
        }));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidDimension { field: "w", .. })
        ));
    }

    #[test]
    fn test_malformed_and_missing_documents() {
        assert!(matches!(
            CameraCalibration::from_json_str("{ not json"),
            Err(ConfigurationError::Json(_))
        ));
        assert!(matches!(
            CameraCalibration::from_json_str("[1, 2, 3]"),
            Err(ConfigurationError::NotAnObject)
        ));
        assert!(matches!(
            CameraCalibration::load_from_json("samples/does_not_exist.json"),
            Err(ConfigurationError::NotFound(_))
        ));
    }

    #[test]
    fn test_matrix_and_coefficient_layout() {
        let calibration = CameraCalibration::from_json_value(&json!({
            "fl_x": 800, "fl_y": 810, "cx": 400, "cy": 300, "w": 800, "h": 600,
            "k1": 0.1, "k2": 0.2, "k3": 0.3, "k4": 0.4, "p1": 0.01, "p2": 0.02
        }))
        .unwrap();

        let k = calibration.intrinsic_matrix();
        assert_eq!(k, Matrix3::new(800.0, 0.0, 400.0, 0.0, 810.0, 300.0, 0.0, 0.0, 1.0));

        let coefficients = calibration.distortion_coefficients();
        assert_eq!(coefficients.0, [0.1, 0.2, 0.01, 0.02, 0.3, 0.4]);
        let [k1, k2, k3, k4] = coefficients.fisheye();
        assert_relative_eq!(k1, 0.1, epsilon = 1e-7);
        assert_relative_eq!(k2, 0.2, epsilon = 1e-7);
        assert_relative_eq!(k3, 0.3, epsilon = 1e-7);
        assert_relative_eq!(k4, 0.4, epsilon = 1e-7);
    }
}
