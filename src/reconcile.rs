//! Reconciles calibration intrinsics with the resolution of the frames being processed.
//!
//! Calibrations are often exported at a different resolution than the plates they are
//! applied to. Focal lengths and principal point scale independently per axis; the
//! distortion coefficients live on the normalized image plane and are left untouched.

use crate::calibration::CameraCalibration;
use crate::camera::Resolution;
use crate::frame::Frame;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// The first frame could not be decoded; the calibration resolution is used as is.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Could not read first frame {} to verify resolution ({reason}); using calibration resolution", path.display())]
pub struct ResolutionWarning {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of reconciling a calibration with the first frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The frame matches the calibration resolution.
    Unchanged,
    /// Intrinsics were rescaled from `from` to `to`.
    Rescaled {
        scale_x: f64,
        scale_y: f64,
        from: Resolution,
        to: Resolution,
    },
    /// The frame could not be read.
    Unverified(ResolutionWarning),
}

/// Rescales `calibration` to `actual` when the two resolutions differ.
pub fn reconcile(
    calibration: &CameraCalibration,
    actual: Resolution,
) -> (CameraCalibration, Reconciliation) {
    let declared = calibration.resolution();
    if declared == actual {
        return (calibration.clone(), Reconciliation::Unchanged);
    }

    let scale_x = actual.width as f64 / declared.width as f64;
    let scale_y = actual.height as f64 / declared.height as f64;

    let rescaled = CameraCalibration {
        fl_x: calibration.fl_x * scale_x,
        cx: calibration.cx * scale_x,
        fl_y: calibration.fl_y * scale_y,
        cy: calibration.cy * scale_y,
        w: actual.width,
        h: actual.height,
        ..calibration.clone()
    };

    (
        rescaled,
        Reconciliation::Rescaled {
            scale_x,
            scale_y,
            from: declared,
            to: actual,
        },
    )
}

/// Decodes the frame at `first_frame` and reconciles `calibration` against it.
///
/// An unreadable frame is not fatal: the calibration is returned unchanged together
/// with a [`ResolutionWarning`].
pub fn reconcile_with_frame(
    calibration: &CameraCalibration,
    first_frame: &Path,
) -> (CameraCalibration, Reconciliation) {
    let actual = match Frame::open(first_frame) {
        Ok(frame) => frame.resolution(),
        Err(err) => {
            let warning = ResolutionWarning {
                path: first_frame.to_path_buf(),
                reason: err.to_string(),
            };
            warn!("{warning}");
            return (calibration.clone(), Reconciliation::Unverified(warning));
        }
    };

    let (reconciled, outcome) = reconcile(calibration, actual);
    if let Reconciliation::Rescaled {
        scale_x,
        scale_y,
        from,
        to,
    } = &outcome
    {
        warn!(
            "Image resolution {}x{} differs from calibration {}x{}",
            to.width, to.height, from.width, from.height
        );
        info!(
            "Scaling intrinsics by ({scale_x:.4}, {scale_y:.4}): fl_x={:.3} fl_y={:.3} cx={:.3} cy={:.3}",
            reconciled.fl_x, reconciled.fl_y, reconciled.cx, reconciled.cy
        );
    }
    (reconciled, outcome)
}
