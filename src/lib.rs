//! Distortion Tools Library
//!
//! Applies or removes lens distortion across image sequences. The library provides:
//! - Calibration documents with pinhole (radial-tangential) and fisheye
//!   (Kannala-Brandt) lens models
//! - Reconciliation of calibration intrinsics with the actual frame resolution
//! - Remap tables built once per sequence, in either direction
//! - Bilinear resampling that preserves the native sample format of every frame,
//!   including half and full float OpenEXR
//! - Frame pattern resolution (`####`, `%04d`) and progress reporting for render farm
//!   managers

pub mod calibration;
pub mod camera;
pub mod frame;
pub mod frame_name;
pub mod pipeline;
pub mod reconcile;
pub mod remap;
pub mod sequence;

// Re-export commonly used types
pub use calibration::{CameraCalibration, ConfigurationError, DistortionCoefficients};
pub use camera::{
    CameraModel, CameraModelError, Intrinsics, KannalaBrandtModel, PinholeModel, RadTanModel,
    Resolution,
};
pub use frame::{Frame, FrameError, OutputError};
pub use pipeline::{run, RunConfig, RunError};
pub use remap::{build_remap_table, ProcessingDirection, RemapTable, RETENTION_ALPHA};
pub use sequence::{OutputErrorPolicy, SequenceJob, SequenceSummary};
