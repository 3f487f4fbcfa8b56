//! Two-pass animated GIF encoding.
//!
//! Pass 1 samples the clip and builds a bounded palette (`palettegen`), pass 2
//! remaps every sampled frame through it with ordered (bayer) dithering. Both
//! passes read the same scale, frame rate and duration cap from the
//! `QualityProfile`, so the optimization retry only changes the profile.

use crate::args;
use crate::command::ToolRunner;
use crate::error::ConvertResult;
use crate::operation::QualityProfile;
use crate::temp::TempTracker;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Shared filter prefix: frame sampling then lanczos downscale
fn sampling_filter(profile: &QualityProfile) -> String {
    format!(
        "fps={},scale='min({},iw)':-1:flags=lanczos",
        profile.fps, profile.scale_width
    )
}

/// ffmpeg arguments for the palette pass
pub fn palette_args(input: &Path, palette: &Path, profile: &QualityProfile) -> Vec<String> {
    args![
        "-y",
        "-t", profile.max_duration_secs,
        "-i", input.display(),
        "-vf", format!(
            "{},palettegen=max_colors={}:stats_mode=diff",
            sampling_filter(profile),
            profile.max_colors.min(256)
        ),
        "-loglevel", "error",
        palette.display(),
    ]
}

/// ffmpeg arguments for the remap pass, output loops forever
pub fn remap_args(input: &Path, palette: &Path, output: &Path, profile: &QualityProfile) -> Vec<String> {
    args![
        "-y",
        "-t", profile.max_duration_secs,
        "-i", input.display(),
        "-i", palette.display(),
        "-lavfi", format!(
            "{}[x];[x][1:v]paletteuse=dither=bayer:bayer_scale={}:diff_mode=rectangle",
            sampling_filter(profile),
            profile.bayer_scale()
        ),
        "-loop", "0",
        "-loglevel", "error",
        output.display(),
    ]
}

/// Note for the user when the source runs longer than the profile keeps
pub fn trim_note(source_secs: f64, profile: &QualityProfile) -> Option<String> {
    let kept = profile.max_duration_secs as f64;
    (source_secs > kept + 0.5).then(|| {
        format!(
            "The source runs {:.1}s; only the first {}s were encoded.",
            source_secs, profile.max_duration_secs
        )
    })
}

/// Encode `input` into a looping GIF, returning the tracked output path
pub async fn encode(
    runner: &ToolRunner,
    input: &Path,
    profile: &QualityProfile,
    tracker: &mut TempTracker,
) -> ConvertResult<PathBuf> {
    let palette = tracker.allocate("palette", "png");
    let output = tracker.allocate("animated", "gif");

    debug!(
        "🎬 Palette pass: {} colors at {} fps, width {}",
        profile.max_colors, profile.fps, profile.scale_width
    );
    runner.run("ffmpeg", &palette_args(input, &palette, profile)).await?;

    debug!("🎨 Remap pass with bayer scale {}", profile.bayer_scale());
    runner
        .run("ffmpeg", &remap_args(input, &palette, &output, profile))
        .await?;

    Ok(output)
}
