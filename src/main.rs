//! Sequence distortion tool
//!
//! Applies or removes lens distortion on every frame of an image sequence using a
//! `transforms.json` style calibration. Progress and per-frame errors are printed to
//! standard output as `Progress: N.N%` / `Error: ...` lines for render farm managers;
//! logs go to standard error.
//!
//! Usage:
//! ```bash
//! distortion --json_path transforms.json --input_pattern plates/shot.####.exr \
//!   --output_dir undistorted --start_frame 1001 --end_frame 1100
//! ```

use clap::Parser;
use distortion_tools::pipeline::{run, RunConfig};
use distortion_tools::remap::ProcessingDirection;
use distortion_tools::sequence::{OutputErrorPolicy, ProgressReporter, SequenceJob, TextReporter};
use log::error;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Apply or remove lens distortion across an image sequence
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the calibration JSON file
    #[arg(long = "json_path")]
    json_path: PathBuf,

    /// Input filename pattern, e.g. shot.####.exr or shot.%04d.exr
    #[arg(long = "input_pattern")]
    input_pattern: String,

    /// Directory the processed frames are written to
    #[arg(long = "output_dir")]
    output_dir: PathBuf,

    /// First frame of the range (inclusive)
    #[arg(long = "start_frame", allow_negative_numbers = true)]
    start_frame: i64,

    /// Last frame of the range (inclusive)
    #[arg(long = "end_frame", allow_negative_numbers = true)]
    end_frame: i64,

    /// Apply the lens distortion to linear frames
    #[arg(long, conflicts_with = "undistort")]
    distort: bool,

    /// Remove the lens distortion from distorted frames (default)
    #[arg(long)]
    undistort: bool,

    /// What to do when an output frame cannot be written
    #[arg(long = "on_output_error", value_enum, default_value_t = OutputErrorPolicy::Fail)]
    on_output_error: OutputErrorPolicy,
}

impl From<Cli> for RunConfig {
    fn from(cli: Cli) -> Self {
        let direction = if cli.distort {
            ProcessingDirection::ApplyDistortion
        } else {
            ProcessingDirection::RemoveDistortion
        };
        RunConfig {
            json_path: cli.json_path,
            job: SequenceJob {
                input_pattern: cli.input_pattern,
                output_dir: cli.output_dir,
                start_frame: cli.start_frame,
                end_frame: cli.end_frame,
                on_output_error: cli.on_output_error,
            },
            direction,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = RunConfig::from(Cli::parse());
    let mut reporter = TextReporter::new(io::stdout().lock());

    match run(&config, &mut reporter) {
        Ok(summary) => {
            if !summary.is_complete() {
                error!(
                    "{} frame(s) could not be processed: {:?}",
                    summary.skipped.len(),
                    summary.skipped
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            reporter.frame_error(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const REQUIRED: [&str; 11] = [
        "distortion",
        "--json_path",
        "transforms.json",
        "--input_pattern",
        "shot.####.exr",
        "--output_dir",
        "out",
        "--start_frame",
        "1001",
        "--end_frame",
        "1004",
    ];

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_direction_removes_distortion() {
        let config = RunConfig::from(Cli::try_parse_from(REQUIRED).unwrap());
        assert_eq!(config.direction, ProcessingDirection::RemoveDistortion);
        assert_eq!(config.job.start_frame, 1001);
        assert_eq!(config.job.end_frame, 1004);
        assert_eq!(config.job.on_output_error, OutputErrorPolicy::Fail);
    }

    #[test]
    fn test_direction_flags() {
        let args = |extra: &[&'static str]| {
            REQUIRED
                .iter()
                .chain(extra)
                .copied()
                .collect::<Vec<_>>()
        };

        let config = RunConfig::from(Cli::try_parse_from(args(&["--distort"])).unwrap());
        assert_eq!(config.direction, ProcessingDirection::ApplyDistortion);

        let config = RunConfig::from(Cli::try_parse_from(args(&["--undistort"])).unwrap());
        assert_eq!(config.direction, ProcessingDirection::RemoveDistortion);

        assert!(Cli::try_parse_from(args(&["--distort", "--undistort"])).is_err());
    }

    #[test]
    fn test_output_error_policy_flag() {
        let args: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .chain(["--on_output_error", "skip"])
            .collect();
        let config = RunConfig::from(Cli::try_parse_from(args).unwrap());
        assert_eq!(config.job.on_output_error, OutputErrorPolicy::Skip);
    }

    #[test]
    fn test_missing_required_flag() {
        assert!(Cli::try_parse_from(&REQUIRED[..REQUIRED.len() - 2]).is_err());
    }

    #[test]
    fn test_negative_frames() {
        let mut args = REQUIRED.to_vec();
        args[8] = "-5";
        args[10] = "-1";
        let config = RunConfig::from(Cli::try_parse_from(args).unwrap());
        assert_eq!((config.job.start_frame, config.job.end_frame), (-5, -1));
    }
}
