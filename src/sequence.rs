//! Applies a fixed [`RemapTable`] to every frame of a sequence.
//!
//! Frames are processed in order, one at a time. An input frame that is missing or
//! cannot be decoded is reported and skipped; it never stops the batch. What happens
//! when an output frame cannot be written is decided by [`OutputErrorPolicy`].
//!
//! Progress is reported through a [`ProgressReporter`]. [`TextReporter`] writes the
//! line protocol render farm managers scrape from standard output:
//!
//! ```text
//! Error: Input image not found at shot.0003.exr
//! Progress: 25.0%
//! Done.
//! ```

use crate::frame::{Frame, FrameError, OutputError};
use crate::frame_name::resolve_frame_path;
use crate::remap::RemapTable;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Receives the progress of a sequence.
pub trait ProgressReporter {
    /// Called after every frame, processed or skipped, with the completed percentage.
    fn progress(&mut self, percent: f64);

    /// Called for every frame that could not be processed.
    fn frame_error(&mut self, message: &str);

    /// Called once after the last frame.
    fn done(&mut self);
}

/// Writes `Progress: N.N%`, `Error: ...` and `Done.` lines, flushing after each one.
pub struct TextReporter<W: Write> {
    writer: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(writer: W) -> Self {
        TextReporter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn line(&mut self, line: std::fmt::Arguments<'_>) {
        let result = self
            .writer
            .write_fmt(line)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(err) = result {
            warn!("Failed to write progress line: {err}");
        }
    }
}

impl<W: Write> ProgressReporter for TextReporter<W> {
    fn progress(&mut self, percent: f64) {
        self.line(format_args!("Progress: {percent:.1}%"));
    }

    fn frame_error(&mut self, message: &str) {
        self.line(format_args!("Error: {message}"));
    }

    fn done(&mut self) {
        self.line(format_args!("Done."));
    }
}

/// What to do when an output frame cannot be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputErrorPolicy {
    /// Stop the sequence with an error.
    #[default]
    Fail,
    /// Report the frame like a missing input and continue.
    Skip,
}

/// A contiguous range of frames to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceJob {
    pub input_pattern: String,
    pub output_dir: PathBuf,
    pub start_frame: i64,
    pub end_frame: i64,
    #[serde(default)]
    pub on_output_error: OutputErrorPolicy,
}

impl SequenceJob {
    /// Frame numbers in processing order, `start_frame..=end_frame`.
    pub fn frames(&self) -> RangeInclusive<i64> {
        self.start_frame..=self.end_frame
    }

    /// Number of frames in the range, `None` when it does not fit in a `u64`.
    pub fn frame_count(&self) -> Option<u64> {
        if self.end_frame < self.start_frame {
            Some(0)
        } else {
            self.end_frame.abs_diff(self.start_frame).checked_add(1)
        }
    }

    /// Input path of `frame`.
    pub fn input_path(&self, frame: i64) -> PathBuf {
        resolve_frame_path(&self.input_pattern, frame)
    }

    /// Output path for `input`: the input file name inside the output directory.
    pub fn output_path(&self, input: &Path) -> Option<PathBuf> {
        input.file_name().map(|name| self.output_dir.join(name))
    }
}

/// Outcome of a completed sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceSummary {
    /// Number of frames written.
    pub processed: usize,
    /// Frame numbers that were reported and skipped.
    pub skipped: Vec<i64>,
}

impl SequenceSummary {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

enum FrameFailure {
    Input(FrameError),
    Output(OutputError),
}

/// Creates `path` and its parents.
pub fn create_output_dir(path: &Path) -> Result<(), OutputError> {
    fs::create_dir_all(path).map_err(|source| OutputError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Remaps every frame of `job` through `table` and writes it to the output directory.
///
/// The output directory must already exist.
///
/// # Errors
///
/// Only output failures under [`OutputErrorPolicy::Fail`] abort the sequence.
pub fn process_sequence(
    job: &SequenceJob,
    table: &RemapTable,
    reporter: &mut dyn ProgressReporter,
) -> Result<SequenceSummary, OutputError> {
    let total = job.frame_count().unwrap_or(u64::MAX);
    let mut summary = SequenceSummary::default();
    info!(
        "Processing frames {} to {}...",
        job.start_frame, job.end_frame
    );

    for (index, frame) in job.frames().enumerate() {
        let input = job.input_path(frame);
        match process_frame(job, table, frame, &input) {
            Ok(()) => summary.processed += 1,
            Err(FrameFailure::Input(err)) => {
                warn!("Skipping frame {frame}: {err}");
                reporter.frame_error(&err.to_string());
                summary.skipped.push(frame);
            }
            Err(FrameFailure::Output(err)) => match job.on_output_error {
                OutputErrorPolicy::Fail => return Err(err),
                OutputErrorPolicy::Skip => {
                    warn!("Skipping frame {frame}: {err}");
                    reporter.frame_error(&err.to_string());
                    summary.skipped.push(frame);
                }
            },
        }
        reporter.progress((index + 1) as f64 / total as f64 * 100.0);
    }

    reporter.done();
    if !summary.is_complete() {
        warn!(
            "{} of {} frames skipped: {:?}",
            summary.skipped.len(),
            total,
            summary.skipped
        );
    }
    Ok(summary)
}

fn process_frame(
    job: &SequenceJob,
    table: &RemapTable,
    frame: i64,
    input: &Path,
) -> Result<(), FrameFailure> {
    if !input.exists() {
        return Err(FrameFailure::Input(FrameError::NotFound {
            path: input.to_path_buf(),
        }));
    }
    let output = job.output_path(input).ok_or_else(|| {
        FrameFailure::Input(FrameError::Unsupported {
            path: input.to_path_buf(),
            reason: "path has no file name".to_string(),
        })
    })?;

    info!("Frame {frame}: {} -> {}", input.display(), output.display());
    let decoded = Frame::open(input).map_err(FrameFailure::Input)?;
    debug!(
        "Frame {frame}: {}x{} {:?}",
        decoded.resolution().width,
        decoded.resolution().height,
        decoded.sample_precisions()
    );

    let remapped = decoded.remap(table, input).map_err(FrameFailure::Input)?;
    remapped.save(&output).map_err(FrameFailure::Output)
}
