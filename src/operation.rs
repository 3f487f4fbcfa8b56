//! # Operations Module
//!
//! Tipi che descrivono cosa l'utente ha chiesto di fare.
//!
//! ## Responsabilità:
//! - `Operation`: il tipo di conversione selezionato
//! - `OperationParams`: parametri tipizzati, uno per operazione
//! - `StretchMode` / `TargetFormat`: valori ammessi per stretch e format-convert
//! - `QualityProfile`: profilo standard o ottimizzato passato alle strategie
//!
//! Un set di parametri che non corrisponde all'operazione viene rifiutato al
//! confine (`OperationParams::validate`), prima che venga creata una sessione.

use crate::error::{ConvertError, ConvertResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversion kinds a session can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AnimatedEncode,
    LossyRecompress,
    Crop,
    Stretch,
    FormatConvert,
    MultiStillAssemble,
    RemoteFetchConvert,
    PaletteExtract,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::AnimatedEncode,
        Operation::LossyRecompress,
        Operation::Crop,
        Operation::Stretch,
        Operation::FormatConvert,
        Operation::MultiStillAssemble,
        Operation::RemoteFetchConvert,
        Operation::PaletteExtract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::AnimatedEncode => "animated_encode",
            Operation::LossyRecompress => "lossy_recompress",
            Operation::Crop => "crop",
            Operation::Stretch => "stretch",
            Operation::FormatConvert => "format_convert",
            Operation::MultiStillAssemble => "multi_still_assemble",
            Operation::RemoteFetchConvert => "remote_fetch_convert",
            Operation::PaletteExtract => "palette_extract",
        }
    }

    /// Remote operations take a URL parameter instead of an uploaded file
    pub fn takes_url(&self) -> bool {
        matches!(self, Operation::RemoteFetchConvert)
    }

    /// External tools the operation shells out to
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Operation::AnimatedEncode => &["ffmpeg", "ffprobe"],
            Operation::MultiStillAssemble => &["ffmpeg"],
            Operation::LossyRecompress => &["gifsicle"],
            Operation::Crop | Operation::Stretch => &["gifsicle"],
            Operation::FormatConvert => &["gifsicle", "ffmpeg"],
            Operation::RemoteFetchConvert => &["ffmpeg", "yt-dlp"],
            Operation::PaletteExtract => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `Stretch` maps the source onto the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchMode {
    /// Force both dimensions, aspect ratio not preserved
    Stretch,
    /// Uniform scale to fit inside the box, never upscaling
    Fit,
    /// Uniform scale to cover the box, overflow cropped
    Fill,
}

impl std::str::FromStr for StretchMode {
    type Err = ConvertError;

    fn from_str(s: &str) -> ConvertResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stretch" => Ok(StretchMode::Stretch),
            "fit" => Ok(StretchMode::Fit),
            "fill" => Ok(StretchMode::Fill),
            other => Err(ConvertError::InvalidParameters(format!(
                "unknown stretch mode '{}', expected stretch, fit or fill",
                other
            ))),
        }
    }
}

/// Output formats for `FormatConvert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Tiff,
    Ico,
}

impl TargetFormat {
    /// Parse a user supplied format name.
    ///
    /// Aliases resolve to their canonical format; formats the raster stack cannot
    /// write are rebased onto the closest supported one (lossy ones onto WebP,
    /// lossless ones onto PNG). The second element names the requested format when
    /// a rebase happened.
    pub fn parse(name: &str) -> ConvertResult<(Self, Option<String>)> {
        let lower = name.trim().trim_start_matches('.').to_ascii_lowercase();
        let format = match lower.as_str() {
            "png" => TargetFormat::Png,
            "jpg" | "jpeg" | "jfif" => TargetFormat::Jpeg,
            "webp" => TargetFormat::Webp,
            "gif" => TargetFormat::Gif,
            "bmp" => TargetFormat::Bmp,
            "tif" | "tiff" => TargetFormat::Tiff,
            "ico" => TargetFormat::Ico,
            "avif" | "heic" | "heif" | "jxl" => return Ok((TargetFormat::Webp, Some(lower))),
            "qoi" | "tga" | "pnm" | "ppm" => return Ok((TargetFormat::Png, Some(lower))),
            other => {
                return Err(ConvertError::InvalidParameters(format!(
                    "unsupported target format '{}'",
                    other
                )))
            }
        };
        Ok((format, None))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Webp => "webp",
            TargetFormat::Gif => "gif",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Ico => "ico",
        }
    }

    /// Whether `quality` affects the encoding
    pub fn is_lossy(&self) -> bool {
        matches!(self, TargetFormat::Jpeg | TargetFormat::Webp | TargetFormat::Gif)
    }
}

/// Parameters of a conversion request, one shape per operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationParams {
    AnimatedEncode,
    LossyRecompress {
        /// Requested reduction, 0-100
        percentage: u8,
    },
    Crop,
    Stretch {
        width: u32,
        height: u32,
        mode: StretchMode,
    },
    FormatConvert {
        /// Requested format name, resolved through `TargetFormat::parse`
        target_format: String,
        /// Encoder quality for lossy targets, 1-100
        quality: u8,
    },
    MultiStillAssemble {
        /// Frames each still is held for
        frame_duration: u32,
    },
    RemoteFetchConvert {
        url: String,
        /// Seconds skipped from the start of the source
        start_offset: f64,
        /// Requested clip length in seconds, capped by configuration
        duration: f64,
    },
    PaletteExtract,
}

impl OperationParams {
    pub fn operation(&self) -> Operation {
        match self {
            OperationParams::AnimatedEncode => Operation::AnimatedEncode,
            OperationParams::LossyRecompress { .. } => Operation::LossyRecompress,
            OperationParams::Crop => Operation::Crop,
            OperationParams::Stretch { .. } => Operation::Stretch,
            OperationParams::FormatConvert { .. } => Operation::FormatConvert,
            OperationParams::MultiStillAssemble { .. } => Operation::MultiStillAssemble,
            OperationParams::RemoteFetchConvert { .. } => Operation::RemoteFetchConvert,
            OperationParams::PaletteExtract => Operation::PaletteExtract,
        }
    }

    /// Reject parameter values no strategy can honour
    pub fn validate(&self) -> ConvertResult<()> {
        match self {
            OperationParams::LossyRecompress { percentage } if *percentage > 100 => {
                Err(ConvertError::InvalidParameters(format!(
                    "percentage must be between 0 and 100, got {}",
                    percentage
                )))
            }
            OperationParams::Stretch { width, height, .. } => {
                if *width == 0 || *height == 0 || *width > 8192 || *height > 8192 {
                    return Err(ConvertError::InvalidParameters(format!(
                        "target size {}x{} must be within 1..=8192",
                        width, height
                    )));
                }
                Ok(())
            }
            OperationParams::FormatConvert { target_format, quality } => {
                TargetFormat::parse(target_format)?;
                if *quality == 0 || *quality > 100 {
                    return Err(ConvertError::InvalidParameters(format!(
                        "quality must be between 1 and 100, got {}",
                        quality
                    )));
                }
                Ok(())
            }
            OperationParams::MultiStillAssemble { frame_duration }
                if *frame_duration == 0 || *frame_duration > 100 =>
            {
                Err(ConvertError::InvalidParameters(format!(
                    "frame duration must be between 1 and 100, got {}",
                    frame_duration
                )))
            }
            OperationParams::RemoteFetchConvert {
                url,
                start_offset,
                duration,
            } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| ConvertError::InvalidParameters(format!("invalid url {}: {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConvertError::InvalidParameters(format!(
                        "only http(s) urls are supported, got {}",
                        parsed.scheme()
                    )));
                }
                if !start_offset.is_finite() || *start_offset < 0.0 {
                    return Err(ConvertError::InvalidParameters(
                        "start offset must be a non-negative number of seconds".to_string(),
                    ));
                }
                if !duration.is_finite() || *duration <= 0.0 {
                    return Err(ConvertError::InvalidParameters(
                        "duration must be a positive number of seconds".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Encoding knobs that distinguish a standard pass from the optimization retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub optimized: bool,
    /// Target width of animated output, height follows the aspect ratio
    pub scale_width: u32,
    /// Frame sampling rate
    pub fps: u32,
    /// Palette size, at most 256
    pub max_colors: u16,
    /// Longest clip encoded, in seconds
    pub max_duration_secs: u32,
    /// Ordered dithering strength, 0 (subtle) to 5 (strong)
    pub dither_strength: u8,
    /// Floor applied to a user requested reduction percentage
    pub min_reduction: u8,
    /// Extra lossy compression added on top of the derived level
    pub compression_boost: u16,
}

impl QualityProfile {
    pub fn standard() -> Self {
        Self {
            optimized: false,
            scale_width: 480,
            fps: 15,
            max_colors: 256,
            max_duration_secs: 10,
            dither_strength: 2,
            min_reduction: 0,
            compression_boost: 0,
        }
    }

    pub fn optimized() -> Self {
        Self {
            optimized: true,
            scale_width: 320,
            fps: 10,
            max_colors: 128,
            max_duration_secs: 8,
            dither_strength: 4,
            min_reduction: 85,
            compression_boost: 40,
        }
    }

    /// ffmpeg's bayer_scale runs the other way round: lower means a stronger pattern
    pub fn bayer_scale(&self) -> u8 {
        5u8.saturating_sub(self.dither_strength.min(5))
    }
}

impl Default for QualityProfile {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_map_to_operation() {
        let params = OperationParams::Stretch {
            width: 100,
            height: 50,
            mode: StretchMode::Fit,
        };
        assert_eq!(params.operation(), Operation::Stretch);
        assert_eq!(OperationParams::Crop.operation(), Operation::Crop);
        assert!(Operation::RemoteFetchConvert.takes_url());
        assert!(!Operation::Crop.takes_url());
        assert!(Operation::AnimatedEncode.required_tools().contains(&"ffprobe"));
    }

    #[test]
    fn test_params_validation() {
        assert!(OperationParams::LossyRecompress { percentage: 101 }.validate().is_err());
        assert!(OperationParams::LossyRecompress { percentage: 50 }.validate().is_ok());
        assert!(OperationParams::Stretch { width: 0, height: 10, mode: StretchMode::Fill }
            .validate()
            .is_err());
        let convert = |format: &str, quality: u8| OperationParams::FormatConvert {
            target_format: format.to_string(),
            quality,
        };
        assert!(convert("jpg", 0).validate().is_err());
        assert!(convert("docx", 80).validate().is_err());
        assert!(convert("avif", 80).validate().is_ok());
        assert!(OperationParams::MultiStillAssemble { frame_duration: 0 }.validate().is_err());

        let remote = |url: &str, offset: f64, duration: f64| OperationParams::RemoteFetchConvert {
            url: url.to_string(),
            start_offset: offset,
            duration,
        };
        assert!(remote("https://example.com/v", 0.0, 5.0).validate().is_ok());
        assert!(remote("ftp://example.com/v", 0.0, 5.0).validate().is_err());
        assert!(remote("https://example.com/v", -1.0, 5.0).validate().is_err());
        assert!(remote("https://example.com/v", 0.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_params_tagged_json() {
        let json = r#"{"operation":"stretch","width":640,"height":480,"mode":"fill"}"#;
        let params: OperationParams = serde_json::from_str(json).unwrap();
        assert_eq!(
            params,
            OperationParams::Stretch { width: 640, height: 480, mode: StretchMode::Fill }
        );

        // adapters can ask for formats that are only reachable through a rebase
        let json = r#"{"operation":"format_convert","target_format":"heic","quality":70}"#;
        let params: OperationParams = serde_json::from_str(json).unwrap();
        assert!(params.validate().is_ok());

        // A crop tag with stretch fields is not a stretch request
        let mismatched = r#"{"operation":"lossy_recompress","width":640}"#;
        assert!(serde_json::from_str::<OperationParams>(mismatched).is_err());
    }

    #[test]
    fn test_target_format_parse_and_rebase() {
        assert_eq!(TargetFormat::parse("JPG").unwrap(), (TargetFormat::Jpeg, None));
        assert_eq!(TargetFormat::parse(".tif").unwrap(), (TargetFormat::Tiff, None));
        assert_eq!(
            TargetFormat::parse("avif").unwrap(),
            (TargetFormat::Webp, Some("avif".to_string()))
        );
        assert_eq!(
            TargetFormat::parse("qoi").unwrap(),
            (TargetFormat::Png, Some("qoi".to_string()))
        );
        assert!(TargetFormat::parse("docx").is_err());
    }

    #[test]
    fn test_optimized_profile_is_cheaper() {
        let standard = QualityProfile::standard();
        let optimized = QualityProfile::optimized();
        assert!(optimized.scale_width < standard.scale_width);
        assert!(optimized.fps < standard.fps);
        assert!(optimized.max_colors <= 128);
        assert_eq!(standard.max_colors, 256);
        assert_eq!(standard.max_duration_secs, 10);
        assert_eq!(optimized.max_duration_secs, 8);
        assert!(optimized.dither_strength > standard.dither_strength);
        assert!(optimized.bayer_scale() < standard.bayer_scale());
        assert!(optimized.min_reduction >= 85);
    }
}
