//! Frame decoding, resampling and encoding.
//!
//! Frames keep their native sample format end to end. OpenEXR files are handled by
//! [`openexr::ExrFrame`] so that half and full float channels survive untouched;
//! every other format goes through [`image::DynamicImage`]. The decoder is chosen
//! from the file content, not its extension.

use crate::camera::Resolution;
use crate::remap::{remap_interleaved, RemapTable, ResampleError, Sample};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, ImageReader, ImageResult, Pixel};
use std::error::Error as StdError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub mod openexr;

pub use openexr::ExrFrame;

type BoxedError = Box<dyn StdError + Send + Sync>;

/// Quality of JPEG output frames.
pub const JPEG_QUALITY: u8 = 95;

/// Per-frame input failure. The frame is skipped and the sequence continues.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Input image not found at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("Could not read image: {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
    #[error("Unsupported image layout in {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },
    #[error("Could not resample image: {}", path.display())]
    Resample {
        path: PathBuf,
        #[source]
        source: ResampleError,
    },
}

/// Output failure: the directory cannot be created or a frame cannot be encoded.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("Could not create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not write image: {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
}

impl FrameError {
    pub(crate) fn decode(path: &Path, source: impl Into<BoxedError>) -> Self {
        FrameError::Decode {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

impl OutputError {
    pub(crate) fn encode(path: &Path, source: impl Into<BoxedError>) -> Self {
        OutputError::Encode {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

/// Numeric representation of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplePrecision {
    U8,
    U16,
    U32,
    F16,
    F32,
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Integer or float raster decoded by the `image` crate.
    Raster(DynamicImage),
    /// OpenEXR image with its channels and attributes.
    OpenExr(ExrFrame),
}

impl Frame {
    /// Decodes the frame at `path`.
    ///
    /// # Errors
    ///
    /// * [`FrameError::NotFound`] if `path` does not exist.
    /// * [`FrameError::Decode`] if the content cannot be decoded.
    /// * [`FrameError::Unsupported`] for OpenEXR layouts that cannot be resampled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FrameError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let reader = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|err| FrameError::decode(path, err))?;

        if reader.format() == Some(ImageFormat::OpenExr) {
            return ExrFrame::read(path).map(Frame::OpenExr);
        }

        let image = reader
            .decode()
            .map_err(|err| FrameError::decode(path, err))?;
        Ok(Frame::Raster(image))
    }

    pub fn resolution(&self) -> Resolution {
        match self {
            Frame::Raster(image) => Resolution {
                width: image.width(),
                height: image.height(),
            },
            Frame::OpenExr(exr) => exr.resolution(),
        }
    }

    /// Sample precision of every channel, in channel order.
    pub fn sample_precisions(&self) -> Vec<SamplePrecision> {
        match self {
            Frame::Raster(image) => {
                vec![raster_precision(image); image.color().channel_count() as usize]
            }
            Frame::OpenExr(exr) => exr.sample_precisions(),
        }
    }

    /// Resamples every channel through `table`. The result has the table's resolution.
    pub fn remap(&self, table: &RemapTable, path: &Path) -> Result<Frame, FrameError> {
        match self {
            Frame::Raster(image) => remap_dynamic(image, table, path).map(Frame::Raster),
            Frame::OpenExr(exr) => exr.remap(table, path).map(Frame::OpenExr),
        }
    }

    /// Encodes the frame to `path`. Raster formats are chosen by extension, JPEG at
    /// [`JPEG_QUALITY`]. OpenEXR frames are always written as OpenEXR with their
    /// channel precisions.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), OutputError> {
        let path = path.as_ref();
        match self {
            Frame::Raster(image) => {
                save_raster(image, path).map_err(|err| OutputError::encode(path, err))
            }
            Frame::OpenExr(exr) => exr.write(path),
        }
    }
}

fn save_raster(image: &DynamicImage, path: &Path) -> ImageResult<()> {
    if ImageFormat::from_path(path).ok() != Some(ImageFormat::Jpeg) {
        return image.save(path);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))?;
    writer.flush()?;
    Ok(())
}

fn raster_precision(image: &DynamicImage) -> SamplePrecision {
    match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => SamplePrecision::U16,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => SamplePrecision::F32,
        _ => SamplePrecision::U8,
    }
}

fn remap_buffer<P>(
    buffer: &ImageBuffer<P, Vec<P::Subpixel>>,
    table: &RemapTable,
    path: &Path,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, FrameError>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let resampled = remap_interleaved(
        buffer.as_raw(),
        buffer.width(),
        buffer.height(),
        P::CHANNEL_COUNT as usize,
        table,
    )
    .map_err(|source| FrameError::Resample {
        path: path.to_path_buf(),
        source,
    })?;

    ImageBuffer::from_raw(table.width(), table.height(), resampled).ok_or_else(|| {
        FrameError::Unsupported {
            path: path.to_path_buf(),
            reason: "resampled buffer does not match the table resolution".to_string(),
        }
    })
}

fn remap_dynamic(
    image: &DynamicImage,
    table: &RemapTable,
    path: &Path,
) -> Result<DynamicImage, FrameError> {
    let remapped = match image {
        DynamicImage::ImageLuma8(buffer) => {
            DynamicImage::ImageLuma8(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageLumaA8(buffer) => {
            DynamicImage::ImageLumaA8(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgb8(buffer) => {
            DynamicImage::ImageRgb8(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgba8(buffer) => {
            DynamicImage::ImageRgba8(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageLuma16(buffer) => {
            DynamicImage::ImageLuma16(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageLumaA16(buffer) => {
            DynamicImage::ImageLumaA16(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgb16(buffer) => {
            DynamicImage::ImageRgb16(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgba16(buffer) => {
            DynamicImage::ImageRgba16(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgb32F(buffer) => {
            DynamicImage::ImageRgb32F(remap_buffer(buffer, table, path)?)
        }
        DynamicImage::ImageRgba32F(buffer) => {
            DynamicImage::ImageRgba32F(remap_buffer(buffer, table, path)?)
        }
        other => {
            return Err(FrameError::Unsupported {
                path: path.to_path_buf(),
                reason: format!("{:?} pixels", other.color()),
            })
        }
    };
    Ok(remapped)
}
