use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::avif::AvifEncoder;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{
    AnimationDecoder, DynamicImage, Frame, GenericImageView, ImageDecoder, ImageEncoder,
    ImageFormat, ImageReader,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Image operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Image worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageConversionFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
    Tiff,
    Bmp,
}

impl ImageConversionFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
            Self::Avif => ImageFormat::Avif,
            Self::Tiff => ImageFormat::Tiff,
            Self::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn can_encode(self) -> bool {
        self.image_format().writing_enabled()
    }

    fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

/// Intrinsic properties of an origin image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub pages: u32,
}

/// One resize/re-encode of an origin image into `destination`.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub width: u32,
    pub format: ImageConversionFormat,
    pub preserve_metadata: bool,
    pub animated: bool,
}

/// The image-processing capability the engine consumes.
///
/// Both operations block; callers run them on the blocking pool.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions (and, when `count_frames` is set, the GIF frame count).
    fn probe(&self, path: &Path, count_frames: bool) -> Result<ImageInfo, TransformError>;

    /// Decode, resize, encode and write `job.destination`.
    fn transform(&self, job: &TransformJob) -> Result<(), TransformError>;
}

/// Backend built on the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterBackend;

impl RasterBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ImageBackend for RasterBackend {
    fn probe(&self, path: &Path, count_frames: bool) -> Result<ImageInfo, TransformError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format();
        let (width, height) = reader.into_dimensions()?;

        let pages = if count_frames && format == Some(ImageFormat::Gif) {
            let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
            decoder.into_frames().count() as u32
        } else {
            1
        };

        Ok(ImageInfo {
            width,
            height,
            pages,
        })
    }

    fn transform(&self, job: &TransformJob) -> Result<(), TransformError> {
        if job.animated && job.format == ImageConversionFormat::Gif {
            return transform_animation(job);
        }

        let mut decoder = ImageReader::open(&job.source)?
            .with_guessed_format()?
            .into_decoder()?;
        let icc_profile = if job.preserve_metadata {
            decoder.icc_profile()?
        } else {
            None
        };
        let img = DynamicImage::from_decoder(decoder)?;

        encode_image(resize_to_width(img, job.width), job, icc_profile)
    }
}

// Height that keeps the aspect ratio at the new width
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let ratio = height as f64 / width as f64;
    ((target_width as f64 * ratio).round() as u32).max(1)
}

fn resize_to_width(img: DynamicImage, width: u32) -> DynamicImage {
    let (current_width, current_height) = img.dimensions();
    if current_width == width {
        return img;
    }
    let height = scaled_height(current_width, current_height, width);
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn attach_icc_profile<E: ImageEncoder>(encoder: &mut E, icc_profile: Option<Vec<u8>>) {
    if let Some(profile) = icc_profile {
        if let Err(e) = encoder.set_icc_profile(profile) {
            log::debug!("ICC profile dropped: {}", e);
        }
    }
}

fn encode_image(
    img: DynamicImage,
    job: &TransformJob,
    icc_profile: Option<Vec<u8>>,
) -> Result<(), TransformError> {
    if !job.format.can_encode() {
        return Err(TransformError::UnsupportedFormat(format!("{:?}", job.format)));
    }

    let img = match job.format {
        _ if !job.format.supports_alpha() => DynamicImage::ImageRgb8(img.to_rgb8()),
        ImageConversionFormat::Avif => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => img,
    };

    let mut writer = BufWriter::new(File::create(&job.destination)?);

    match job.format {
        ImageConversionFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, 85);
            attach_icc_profile(&mut encoder, icc_profile);
            img.write_with_encoder(encoder)?;
        }
        ImageConversionFormat::Png => {
            let mut encoder = PngEncoder::new(&mut writer);
            attach_icc_profile(&mut encoder, icc_profile);
            img.write_with_encoder(encoder)?;
        }
        ImageConversionFormat::Webp => {
            let mut encoder = WebPEncoder::new_lossless(&mut writer);
            attach_icc_profile(&mut encoder, icc_profile);
            img.write_with_encoder(encoder)?;
        }
        ImageConversionFormat::Avif => {
            let encoder = AvifEncoder::new(&mut writer);
            img.write_with_encoder(encoder)?;
        }
        ImageConversionFormat::Gif | ImageConversionFormat::Tiff | ImageConversionFormat::Bmp => {
            img.write_to(&mut writer, job.format.image_format())?;
        }
    }

    writer.flush()?;
    Ok(())
}

// Resize every frame of an animated GIF and keep it looping
fn transform_animation(job: &TransformJob) -> Result<(), TransformError> {
    let decoder = GifDecoder::new(BufReader::new(File::open(&job.source)?))?;
    let (canvas_width, canvas_height) = decoder.dimensions();
    let frames = decoder.into_frames().collect_frames()?;

    let scale = job.width as f64 / canvas_width as f64;
    let target_height = scaled_height(canvas_width, canvas_height, job.width);

    let resized = frames.into_iter().map(|frame| {
        let left = (frame.left() as f64 * scale).round() as u32;
        let top = (frame.top() as f64 * scale).round() as u32;
        let delay = frame.delay();
        let buffer = frame.into_buffer();
        let (width, height) = if buffer.dimensions() == (canvas_width, canvas_height) {
            (job.width, target_height)
        } else {
            (
                ((buffer.width() as f64 * scale).round() as u32).max(1),
                ((buffer.height() as f64 * scale).round() as u32).max(1),
            )
        };
        let buffer = image::imageops::resize(&buffer, width, height, FilterType::Triangle);
        Frame::from_parts(buffer, left, top, delay)
    });

    let mut writer = BufWriter::new(File::create(&job.destination)?);
    {
        let mut encoder = GifEncoder::new(&mut writer);
        encoder.set_repeat(Repeat::Infinite)?;
        encoder.encode_frames(resized)?;
    }
    writer.flush()?;
    Ok(())
}
