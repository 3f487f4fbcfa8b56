//! Lossy GIF recompression through gifsicle.
//!
//! A single reduction percentage (0-100) drives three knobs at once: a uniform
//! scale factor, the `--lossy` strength and the palette size.

use crate::args;
use crate::command::ToolRunner;
use crate::error::ConvertResult;
use crate::operation::QualityProfile;
use crate::temp::TempTracker;
use std::path::{Path, PathBuf};

/// gifsicle settings derived from a reduction percentage
#[derive(Debug, Clone, PartialEq)]
pub struct LossySettings {
    /// Effective reduction after the profile floor, 0-100
    pub reduction: u8,
    /// Uniform scale factor, 0.5-1.0
    pub scale: f64,
    /// `--lossy` strength, 30-200
    pub lossy: u16,
    /// Palette size, 32-256
    pub colors: u16,
}

impl LossySettings {
    pub fn derive(percentage: u8, profile: &QualityProfile) -> Self {
        let reduction = percentage.min(100).max(profile.min_reduction);
        let r = reduction as f64;

        let scale = ((1.0 - r * 0.005) * 100.0).round() / 100.0;
        let lossy = (30.0 + r * 1.7).round() as u16 + profile.compression_boost;
        let colors = (256.0 - r * 2.0).round().max(32.0) as u16;

        Self {
            reduction,
            scale,
            lossy: lossy.min(200),
            colors: colors.min(profile.max_colors).max(32),
        }
    }

    /// Settings for a plain re-encode at an encoder quality (1-100), size kept
    pub fn for_quality(quality: u8, profile: &QualityProfile) -> Self {
        let quality = quality.clamp(1, 100) as u16;
        Self {
            reduction: 0,
            scale: 1.0,
            lossy: ((100 - quality) * 2 + profile.compression_boost).min(200),
            colors: profile.max_colors.clamp(32, 256),
        }
    }

    /// One-line summary shown next to the result
    pub fn describe(&self) -> String {
        format!(
            "Reduced by {}%: scale {:.0}%, {} colors, lossy level {}",
            self.reduction,
            self.scale * 100.0,
            self.colors,
            self.lossy
        )
    }
}

pub fn gifsicle_args(input: &Path, output: &Path, settings: &LossySettings) -> Vec<String> {
    let mut args = args![
        "-O3",
        format!("--lossy={}", settings.lossy),
        "--colors", settings.colors,
    ];
    if settings.scale < 1.0 {
        args.extend(args!["--scale", format!("{:.2}", settings.scale)]);
    }
    args.extend(args![input.display(), "-o", output.display()]);
    args
}

pub async fn recompress(
    runner: &ToolRunner,
    input: &Path,
    settings: &LossySettings,
    tracker: &mut TempTracker,
) -> ConvertResult<PathBuf> {
    let output = tracker.allocate("compressed", "gif");
    runner
        .run("gifsicle", &gifsicle_args(input, &output, settings))
        .await?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_reduction_keeps_size() {
        let settings = LossySettings::derive(0, &QualityProfile::standard());
        assert_eq!(settings.reduction, 0);
        assert_eq!(settings.scale, 1.0);
        assert_eq!(settings.colors, 256);
        assert!(!gifsicle_args(Path::new("a.gif"), Path::new("b.gif"), &settings)
            .contains(&"--scale".to_string()));
    }

    #[test]
    fn test_half_reduction() {
        let settings = LossySettings::derive(50, &QualityProfile::standard());
        assert_eq!(settings.scale, 0.75);
        assert_eq!(settings.colors, 156);
        assert_eq!(settings.lossy, 115);
    }

    #[test]
    fn test_optimized_floors_reduction_at_85() {
        let optimized = QualityProfile::optimized();
        for percentage in [0u8, 10, 50, 84, 85, 90, 100] {
            let settings = LossySettings::derive(percentage, &optimized);
            assert!(settings.reduction >= 85, "{} -> {}", percentage, settings.reduction);
            assert!(settings.colors <= optimized.max_colors);
            assert!(settings.lossy <= 200);
        }
        assert_eq!(LossySettings::derive(95, &optimized).reduction, 95);
    }

    #[test]
    fn test_out_of_range_percentage_clamped() {
        let settings = LossySettings::derive(250, &QualityProfile::standard());
        assert_eq!(settings.reduction, 100);
        assert_eq!(settings.scale, 0.5);
        assert_eq!(settings.colors, 56);
    }

    #[test]
    fn test_quality_settings_keep_dimensions() {
        let settings = LossySettings::for_quality(80, &QualityProfile::standard());
        assert_eq!(settings.scale, 1.0);
        assert_eq!(settings.lossy, 40);
        assert_eq!(settings.colors, 256);

        let optimized = LossySettings::for_quality(80, &QualityProfile::optimized());
        assert_eq!(optimized.lossy, 80);
        assert_eq!(optimized.colors, 128);
    }

    #[test]
    fn test_args_order() {
        let settings = LossySettings::derive(50, &QualityProfile::standard());
        let args = gifsicle_args(Path::new("in.gif"), Path::new("out.gif"), &settings);
        assert_eq!(args[0], "-O3");
        assert_eq!(args[1], "--lossy=115");
        assert_eq!(&args[args.len() - 3..], &["in.gif", "-o", "out.gif"]);
    }
}
