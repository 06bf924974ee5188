//! OpenEXR frames.
//!
//! The first valid layer of the file is read with all of its channels and attributes.
//! Every channel is resampled as its own plane in its stored sample type, so a half
//! float plate is written back as half float and a full float plate as full float.

use crate::camera::Resolution;
use crate::frame::{FrameError, OutputError, SamplePrecision};
use crate::remap::{remap_interleaved, RemapTable, Sample};
use exr::prelude::*;
use std::path::Path;
// The exr prelude brings its own single-parameter `Result`.
use std::result::Result;

type FlatLayerImage = Image<Layer<AnyChannels<FlatSamples>>>;

/// The first layer of an OpenEXR file.
#[derive(Debug, Clone)]
pub struct ExrFrame {
    image: FlatLayerImage,
}

impl ExrFrame {
    pub fn read(path: &Path) -> Result<Self, FrameError> {
        let image = read()
            .no_deep_data()
            .largest_resolution_level()
            .all_channels()
            .first_valid_layer()
            .all_attributes()
            .from_file(path)
            .map_err(|err| FrameError::decode(path, err))?;

        if let Some(channel) = image
            .layer_data
            .channel_data
            .list
            .iter()
            .find(|channel| channel.sampling != Vec2(1, 1))
        {
            return Err(FrameError::Unsupported {
                path: path.to_path_buf(),
                reason: format!("subsampled channel {}", channel.name),
            });
        }

        Ok(ExrFrame { image })
    }

    pub fn image(&self) -> &FlatLayerImage {
        &self.image
    }

    pub fn resolution(&self) -> Resolution {
        let size = self.image.layer_data.size;
        Resolution {
            width: size.width() as u32,
            height: size.height() as u32,
        }
    }

    pub fn sample_precisions(&self) -> Vec<SamplePrecision> {
        self.image
            .layer_data
            .channel_data
            .list
            .iter()
            .map(|channel| match channel.sample_data {
                FlatSamples::F16(_) => SamplePrecision::F16,
                FlatSamples::F32(_) => SamplePrecision::F32,
                FlatSamples::U32(_) => SamplePrecision::U32,
            })
            .collect()
    }

    /// Resamples every channel through `table`.
    ///
    /// When the frame changes size the display window follows the data window.
    pub fn remap(&self, table: &RemapTable, path: &Path) -> Result<Self, FrameError> {
        let source = self.resolution();
        let mut image = self.image.clone();

        for channel in image.layer_data.channel_data.list.iter_mut() {
            channel.sample_data = match &channel.sample_data {
                FlatSamples::F16(samples) => {
                    FlatSamples::F16(remap_plane(samples, source, table, path)?)
                }
                FlatSamples::F32(samples) => {
                    FlatSamples::F32(remap_plane(samples, source, table, path)?)
                }
                FlatSamples::U32(samples) => {
                    FlatSamples::U32(remap_plane(samples, source, table, path)?)
                }
            };
        }

        let target = table.resolution();
        if target != source {
            let size = Vec2(target.width as usize, target.height as usize);
            if image.attributes.display_window.size == image.layer_data.size {
                image.attributes.display_window.size = size;
            }
            image.layer_data.size = size;
        }

        Ok(ExrFrame { image })
    }

    pub fn write(&self, path: &Path) -> Result<(), OutputError> {
        self.image
            .write()
            .to_file(path)
            .map_err(|err| OutputError::encode(path, err))
    }
}

fn remap_plane<T: Sample>(
    samples: &[T],
    source: Resolution,
    table: &RemapTable,
    path: &Path,
) -> Result<Vec<T>, FrameError> {
    remap_interleaved(samples, source.width, source.height, 1, table).map_err(|source| {
        FrameError::Resample {
            path: path.to_path_buf(),
            source,
        }
    })
}
