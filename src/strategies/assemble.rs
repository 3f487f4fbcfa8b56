//! Multi-still assembly: up to N images become one animated GIF.
//!
//! Stills are decoded, centered on a common black canvas and written as an
//! image sequence; ffmpeg turns the sequence into an intermediate clip that goes
//! through the same two-pass encoder as video sources.

use crate::args;
use crate::command::ToolRunner;
use crate::error::{ConvertError, ConvertResult};
use crate::operation::QualityProfile;
use crate::strategies::raster::{decode_still, fit_size};
use crate::strategies::{animated, blocking, SourceFile};
use crate::temp::TempTracker;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Frame rate of the intermediate sequence; `frame_duration` counts frames at this rate
pub const SEQUENCE_FPS: u32 = 10;
/// Largest canvas side
pub const MAX_CANVAS_SIDE: u32 = 1280;

/// Canvas every still is placed on: the largest width and height, bounded and even
pub fn canvas_size(sizes: &[(u32, u32)]) -> (u32, u32) {
    let width = sizes.iter().map(|(w, _)| *w).max().unwrap_or(2);
    let height = sizes.iter().map(|(_, h)| *h).max().unwrap_or(2);
    let (width, height) = fit_size(width, height, MAX_CANVAS_SIDE, MAX_CANVAS_SIDE);
    (even(width), even(height))
}

/// yuv420p needs even dimensions
fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

/// Scale a still into the canvas preserving aspect and center it on black
pub fn letterbox(image: &DynamicImage, canvas: (u32, u32)) -> RgbImage {
    let (cw, ch) = canvas;
    let (w, h) = fit_size(image.width(), image.height(), cw, ch);
    let scaled = if (w, h) == (image.width(), image.height()) {
        image.to_rgb8()
    } else {
        image.resize_exact(w, h, FilterType::Lanczos3).to_rgb8()
    };

    let mut frame = RgbImage::from_pixel(cw, ch, Rgb([0, 0, 0]));
    imageops::overlay(&mut frame, &scaled, ((cw - w) / 2) as i64, ((ch - h) / 2) as i64);
    frame
}

pub fn sequence_args(pattern: &Path, output: &Path) -> Vec<String> {
    args![
        "-y",
        "-framerate", SEQUENCE_FPS,
        "-i", pattern.display(),
        "-c:v", "libx264",
        "-pix_fmt", "yuv420p",
        "-loglevel", "error",
        output.display(),
    ]
}

/// Frames each still is held for.
///
/// The animated encoder cuts the intermediate clip at `max_duration_secs`, so the
/// requested hold shrinks until every still fits inside that window.
pub fn hold_frames(frame_duration: u32, stills: usize, profile: &QualityProfile) -> u32 {
    let budget = profile.max_duration_secs as usize * SEQUENCE_FPS as usize / stills.max(1);
    frame_duration.clamp(1, budget.max(1) as u32)
}

/// Decode every source, skipping the ones that fail
fn decode_all(sources: &[SourceFile]) -> Vec<DynamicImage> {
    sources
        .iter()
        .filter_map(|source| match decode_still(&source.path) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("⚠️  Skipping {}: {}", source.name, e);
                None
            }
        })
        .collect()
}

/// Assemble the sources into a looping GIF
pub async fn assemble(
    runner: &ToolRunner,
    sources: &[SourceFile],
    frame_duration: u32,
    profile: &QualityProfile,
    tracker: &mut TempTracker,
) -> ConvertResult<PathBuf> {
    let owned = sources.to_vec();
    let images = blocking(move || Ok(decode_all(&owned))).await?;
    if images.is_empty() {
        return Err(ConvertError::NoValidInput);
    }

    let hold = hold_frames(frame_duration, images.len(), profile);
    if hold < frame_duration {
        info!(
            "Shortening each still from {} to {} frames to fit {}s",
            frame_duration, hold, profile.max_duration_secs
        );
    }
    let repeats = hold as usize;
    let total = images.len() * repeats;
    let frame_paths: Vec<PathBuf> = (0..total)
        .map(|i| tracker.allocate_named(&format!("frame_{:05}.png", i)))
        .collect();
    let pattern = tracker.dir().join("frame_%05d.png");

    info!(
        "🖼️  Assembling {} stills ({} frames each)",
        images.len(),
        repeats
    );

    blocking(move || {
        let sizes: Vec<(u32, u32)> = images.iter().map(|i| (i.width(), i.height())).collect();
        let canvas = canvas_size(&sizes);
        let mut paths = frame_paths.iter();
        for image in &images {
            let frame = letterbox(image, canvas);
            for _ in 0..repeats {
                if let Some(path) = paths.next() {
                    frame.save(path)?;
                }
            }
        }
        Ok(())
    })
    .await?;

    let sequence = tracker.allocate("sequence", "mp4");
    runner.run("ffmpeg", &sequence_args(&pattern, &sequence)).await?;

    animated::encode(runner, &sequence, profile, tracker).await
}
