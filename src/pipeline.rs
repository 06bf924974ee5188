//! One complete run: calibration, reconciliation, table construction and sequence.

use crate::calibration::{CameraCalibration, ConfigurationError};
use crate::camera::CameraModelError;
use crate::frame::OutputError;
use crate::reconcile::reconcile_with_frame;
use crate::remap::{build_remap_table, ProcessingDirection, RETENTION_ALPHA};
use crate::sequence::{
    create_output_dir, process_sequence, ProgressReporter, SequenceJob, SequenceSummary,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a run needs, as parsed from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Calibration document.
    pub json_path: PathBuf,
    #[serde(flatten)]
    pub job: SequenceJob,
    #[serde(default)]
    pub direction: ProcessingDirection,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.job.end_frame < self.job.start_frame {
            return Err(ConfigurationError::InvalidFrameRange {
                start: self.job.start_frame,
                end: self.job.end_frame,
            });
        }
        if self.job.frame_count().is_none() {
            return Err(ConfigurationError::FrameRangeTooLarge {
                start: self.job.start_frame,
                end: self.job.end_frame,
            });
        }
        Ok(())
    }
}

/// Fatal errors of a run.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to build remap table: {0}")]
    Camera(#[from] CameraModelError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Runs `config` to completion, reporting frame progress to `reporter`.
///
/// Nothing is written before the calibration is loaded and the remap table is built;
/// the output directory is created right before the first frame.
///
/// # Errors
///
/// Configuration, camera model and (depending on the policy) output failures.
/// Missing or unreadable input frames are reported and skipped instead.
pub fn run(
    config: &RunConfig,
    reporter: &mut dyn ProgressReporter,
) -> Result<SequenceSummary, RunError> {
    if let Ok(serialized) = serde_json::to_string(config) {
        debug!("Run configuration: {serialized}");
    }

    info!(
        "Loading calibration data from {}...",
        config.json_path.display()
    );
    let calibration = CameraCalibration::load_from_json(&config.json_path)?;
    config.validate()?;

    let first_frame = config.job.input_path(config.job.start_frame);
    let (calibration, _) = reconcile_with_frame(&calibration, &first_frame);

    let model = calibration.camera_model()?;
    info!("  Resolution: {}x{}", calibration.w, calibration.h);
    info!("  Camera Matrix (K): {:?}", calibration.intrinsic_matrix());
    info!(
        "  Distortion Coeffs (D): {}",
        calibration.distortion_coefficients()
    );
    info!("  Model: {}", model.name());
    info!("  Mode: {}", config.direction);

    info!("Pre-calculating remapping maps...");
    let table = build_remap_table(model.as_ref(), config.direction, RETENTION_ALPHA)?;

    create_output_dir(&config.job.output_dir)?;
    Ok(process_sequence(&config.job, &table, reporter)?)
}
