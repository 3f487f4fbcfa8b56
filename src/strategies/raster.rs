//! # Raster Strategies
//!
//! Crop-to-square, stretch (stretch / fit / fill) and format conversion.
//!
//! ## Tool Strategy
//! - **Stills**: decoded and re-encoded with the `image` crate on a blocking worker
//! - **Animated GIF**: gifsicle's native `--crop` / `--resize`, so frames are not
//!   re-quantized
//! - **WebP targets**: ffmpeg `libwebp`, the raster stack here only decodes WebP
//!
//! The geometry is computed by pure functions shared by both paths.

use crate::args;
use crate::command::ToolRunner;
use crate::error::{ConvertError, ConvertResult};
use crate::format_gate::MediaKind;
use crate::operation::{QualityProfile, StretchMode, TargetFormat};
use crate::probe;
use crate::strategies::lossy::{self, LossySettings};
use crate::strategies::{blocking, SourceFile, TranscodeOutput};
use crate::temp::TempTracker;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Quality used when a still is re-encoded as JPEG without a user choice
const DEFAULT_JPEG_QUALITY: u8 = 92;
/// ICO entries cannot exceed 256 pixels per side
const ICO_MAX_SIDE: u32 = 256;

/// Region of a source image, in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// gifsicle `--crop` geometry
    pub fn to_gifsicle(&self) -> String {
        format!("{},{}+{}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Centered square of side min(width, height)
pub fn square_crop(width: u32, height: u32) -> CropRect {
    let size = width.min(height);
    CropRect {
        x: (width - size) / 2,
        y: (height - size) / 2,
        width: size,
        height: size,
    }
}

/// Largest size with the source aspect ratio inside the box, never upscaling
pub fn fit_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let (w, h, mw, mh) = (width as u64, height as u64, max_width as u64, max_height as u64);
    if mw * h <= mh * w {
        let scaled = ((h * mw + w / 2) / w).clamp(1, mh);
        (max_width, scaled as u32)
    } else {
        let scaled = ((w * mh + h / 2) / h).clamp(1, mw);
        (scaled as u32, max_height)
    }
}

/// Centered source region with the target aspect ratio; scaling it to the target covers it exactly
pub fn fill_crop(width: u32, height: u32, target_width: u32, target_height: u32) -> CropRect {
    let (w, h, tw, th) = (width as u64, height as u64, target_width as u64, target_height as u64);
    if w * th > h * tw {
        let crop_w = ((h * tw + th / 2) / th).clamp(1, w) as u32;
        CropRect {
            x: (width - crop_w) / 2,
            y: 0,
            width: crop_w,
            height,
        }
    } else {
        let crop_h = ((w * th + tw / 2) / tw).clamp(1, h) as u32;
        CropRect {
            x: 0,
            y: (height - crop_h) / 2,
            width,
            height: crop_h,
        }
    }
}

/// What stretch does to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    Resize { width: u32, height: u32 },
    CropResize { crop: CropRect, width: u32, height: u32 },
}

impl ResizePlan {
    pub fn output_size(&self) -> (u32, u32) {
        match *self {
            ResizePlan::Resize { width, height } | ResizePlan::CropResize { width, height, .. } => {
                (width, height)
            }
        }
    }
}

pub fn plan_stretch(
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
    mode: StretchMode,
) -> ResizePlan {
    match mode {
        StretchMode::Stretch => ResizePlan::Resize {
            width: target_width,
            height: target_height,
        },
        StretchMode::Fit => {
            let (width, height) = fit_size(width, height, target_width, target_height);
            ResizePlan::Resize { width, height }
        }
        StretchMode::Fill => ResizePlan::CropResize {
            crop: fill_crop(width, height, target_width, target_height),
            width: target_width,
            height: target_height,
        },
    }
}

/// Apply a plan to a decoded still
pub fn apply_plan(image: &DynamicImage, plan: ResizePlan) -> DynamicImage {
    match plan {
        ResizePlan::Resize { width, height } => {
            if (width, height) == (image.width(), image.height()) {
                image.clone()
            } else {
                image.resize_exact(width, height, FilterType::Lanczos3)
            }
        }
        ResizePlan::CropResize { crop, width, height } => image
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .resize_exact(width, height, FilterType::Lanczos3),
    }
}

/// gifsicle arguments applying a plan to every frame
pub fn gifsicle_plan_args(plan: ResizePlan, input: &Path, output: &Path) -> Vec<String> {
    let mut args = Vec::new();
    match plan {
        ResizePlan::Resize { width, height } => {
            args.extend(args!["--resize", format!("{}x{}", width, height)]);
        }
        ResizePlan::CropResize { crop, width, height } => {
            args.extend(args![
                "--crop", crop.to_gifsicle(),
                "--resize", format!("{}x{}", width, height),
            ]);
        }
    }
    args.extend(args![input.display(), "-o", output.display()]);
    args
}

/// Decode a still, guessing the format from content rather than the temp name
pub fn decode_still(path: &Path) -> ConvertResult<DynamicImage> {
    Ok(image::io::Reader::open(path)?.with_guessed_format()?.decode()?)
}

/// Encode a still into one of the raster-writable formats
pub fn encode_still(image: &DynamicImage, format: TargetFormat, quality: u8) -> ConvertResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        TargetFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut buffer, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))?,
        TargetFormat::Png => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buffer, ImageOutputFormat::Png)?,
        TargetFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buffer, ImageOutputFormat::Gif)?,
        TargetFormat::Bmp => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buffer, ImageOutputFormat::Bmp)?,
        TargetFormat::Tiff => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buffer, ImageOutputFormat::Tiff)?,
        TargetFormat::Ico => {
            let icon = if image.width() > ICO_MAX_SIDE || image.height() > ICO_MAX_SIDE {
                image.thumbnail(ICO_MAX_SIDE, ICO_MAX_SIDE)
            } else {
                image.clone()
            };
            DynamicImage::ImageRgba8(icon.to_rgba8()).write_to(&mut buffer, ImageOutputFormat::Ico)?
        }
        TargetFormat::Webp => {
            return Err(ConvertError::Transcode(
                "WebP output is encoded by ffmpeg, not the raster encoder".to_string(),
            ))
        }
    }
    Ok(buffer.into_inner())
}

/// Format a crop/stretch result is written in: the source's own, WebP falls back to PNG
pub fn same_format_target(extension: &str) -> TargetFormat {
    match TargetFormat::parse(extension) {
        Ok((TargetFormat::Webp, _)) | Err(_) => TargetFormat::Png,
        Ok((format, _)) => format,
    }
}

async fn is_animated(source: &SourceFile) -> ConvertResult<bool> {
    if source.kind != MediaKind::Gif {
        return Ok(false);
    }
    let path = source.path.clone();
    blocking(move || probe::is_animated_gif(&path)).await
}

async fn dimensions(source: &SourceFile) -> ConvertResult<(u32, u32)> {
    let path = source.path.clone();
    blocking(move || probe::image_dimensions(&path)).await
}

/// Run gifsicle over an animated source and read back the result
async fn gifsicle_transform(
    runner: &ToolRunner,
    source: &SourceFile,
    tracker: &mut TempTracker,
    build: impl FnOnce(&Path, &Path) -> Vec<String>,
    filename: String,
) -> ConvertResult<TranscodeOutput> {
    let output = tracker.allocate("transformed", "gif");
    runner.run("gifsicle", &build(&source.path, &output)).await?;
    TranscodeOutput::from_path(&output, filename).await
}

/// Decode, transform and re-encode a still on a blocking worker
async fn still_transform(
    source: &SourceFile,
    format: TargetFormat,
    quality: u8,
    transform: impl FnOnce(DynamicImage) -> DynamicImage + Send + 'static,
    filename: String,
) -> ConvertResult<TranscodeOutput> {
    let path = source.path.clone();
    let bytes = blocking(move || {
        let image = decode_still(&path)?;
        encode_still(&transform(image), format, quality)
    })
    .await?;
    Ok(TranscodeOutput {
        bytes,
        filename,
        side_text: None,
    })
}

/// Extract a centered square of side min(width, height)
pub async fn crop_square(
    runner: &ToolRunner,
    source: &SourceFile,
    tracker: &mut TempTracker,
) -> ConvertResult<TranscodeOutput> {
    if is_animated(source).await? {
        let (width, height) = dimensions(source).await?;
        let rect = square_crop(width, height);
        debug!("Cropping animated {}x{} to {:?}", width, height, rect);
        return gifsicle_transform(
            runner,
            source,
            tracker,
            |input, output| args!["--crop", rect.to_gifsicle(), input.display(), "-o", output.display()],
            format!("{}_square.gif", source.stem()),
        )
        .await;
    }

    let format = same_format_target(&source.extension());
    still_transform(
        source,
        format,
        DEFAULT_JPEG_QUALITY,
        |image| {
            let rect = square_crop(image.width(), image.height());
            image.crop_imm(rect.x, rect.y, rect.width, rect.height)
        },
        format!("{}_square.{}", source.stem(), format.extension()),
    )
    .await
}

/// Resize to an explicit box with the given mode
pub async fn stretch(
    runner: &ToolRunner,
    source: &SourceFile,
    target_width: u32,
    target_height: u32,
    mode: StretchMode,
    tracker: &mut TempTracker,
) -> ConvertResult<TranscodeOutput> {
    if is_animated(source).await? {
        let (width, height) = dimensions(source).await?;
        let plan = plan_stretch(width, height, target_width, target_height, mode);
        let (out_w, out_h) = plan.output_size();
        return gifsicle_transform(
            runner,
            source,
            tracker,
            |input, output| gifsicle_plan_args(plan, input, output),
            format!("{}_{}x{}.gif", source.stem(), out_w, out_h),
        )
        .await;
    }

    let format = same_format_target(&source.extension());
    let path = source.path.clone();
    let (bytes, (out_w, out_h)) = blocking(move || {
        let image = decode_still(&path)?;
        let plan = plan_stretch(image.width(), image.height(), target_width, target_height, mode);
        let resized = apply_plan(&image, plan);
        Ok((encode_still(&resized, format, DEFAULT_JPEG_QUALITY)?, plan.output_size()))
    })
    .await?;

    Ok(TranscodeOutput {
        bytes,
        filename: format!("{}_{}x{}.{}", source.stem(), out_w, out_h, format.extension()),
        side_text: None,
    })
}

/// Quality actually used: the optimization retry caps lossy quality
/// Side note for a target format that was swapped for a writable one
pub fn rebase_note(requested: &str, format: TargetFormat) -> String {
    format!(
        "{} output is not supported, the image was written as {} instead.",
        requested.to_ascii_uppercase(),
        format.extension().to_ascii_uppercase()
    )
}

pub fn effective_quality(quality: u8, profile: &QualityProfile) -> u8 {
    let quality = quality.clamp(1, 100);
    if profile.optimized {
        quality.min(50)
    } else {
        quality
    }
}

pub fn webp_args(input: &Path, output: &Path, quality: u8, animated: bool) -> Vec<String> {
    let mut args = args!["-y", "-i", input.display()];
    if animated {
        args.extend(args!["-loop", "0"]);
    }
    args.extend(args![
        "-c:v", "libwebp",
        "-lossless", "0",
        "-quality", quality,
        "-an",
        "-loglevel", "error",
        output.display(),
    ]);
    args
}

/// Convert to another format
pub async fn convert(
    runner: &ToolRunner,
    source: &SourceFile,
    target: TargetFormat,
    quality: u8,
    profile: &QualityProfile,
    tracker: &mut TempTracker,
) -> ConvertResult<TranscodeOutput> {
    let quality = effective_quality(quality, profile);
    let animated = is_animated(source).await?;
    let filename = format!("{}.{}", source.stem(), target.extension());

    match target {
        TargetFormat::Gif if animated => {
            let settings = LossySettings::for_quality(quality, profile);
            let output = lossy::recompress(runner, &source.path, &settings, tracker).await?;
            TranscodeOutput::from_path(&output, filename).await
        }
        TargetFormat::Webp => {
            let output = tracker.allocate("converted", "webp");
            runner
                .run("ffmpeg", &webp_args(&source.path, &output, quality, animated))
                .await?;
            TranscodeOutput::from_path(&output, filename).await
        }
        _ => {
            let output = still_transform(source, target, quality, |image| image, filename).await?;
            if animated {
                Ok(output.with_side_text("Only the first frame was kept, the target format is not animated"))
            } else {
                Ok(output)
            }
        }
    }
}
