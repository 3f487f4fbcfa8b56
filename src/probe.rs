//! # Media Probe Module
//!
//! Legge le proprietà di base dei sorgenti prima della trascodifica.
//!
//! ## Responsabilità:
//! - Analisi video con ffprobe (durata, risoluzione, codec)
//! - Dimensioni delle immagini leggendo solo l'header
//! - Distinzione tra GIF animate e GIF a frame singolo

use crate::command::ToolRunner;
use crate::error::{ConvertError, ConvertResult};
use image::AnimationDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Basic properties of a media source
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds, 0.0 for stills
    pub duration: f64,
    pub codec: String,
}

/// Probe a video file with ffprobe
pub async fn probe_video(runner: &ToolRunner, path: &Path) -> ConvertResult<MediaInfo> {
    let output = runner
        .run(
            "ffprobe",
            &crate::args![
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
                path.display(),
            ],
        )
        .await?;

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the first video stream of an ffprobe JSON report
pub fn parse_ffprobe_json(json: &str) -> ConvertResult<MediaInfo> {
    let info: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ConvertError::Transcode(format!("unreadable ffprobe output: {}", e)))?;

    let duration = info["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let empty_vec = vec![];
    let streams = info["streams"].as_array().unwrap_or(&empty_vec);
    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| ConvertError::Transcode("source has no video stream".to_string()))?;

    let width = video_stream["width"].as_u64().unwrap_or(0) as u32;
    let height = video_stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(ConvertError::Transcode("source reports no frame size".to_string()));
    }

    Ok(MediaInfo {
        width,
        height,
        duration,
        codec: video_stream["codec_name"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
    })
}

/// Read image dimensions from the file header
pub fn image_dimensions(path: &Path) -> ConvertResult<(u32, u32)> {
    let dimensions = image::io::Reader::open(path)?
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(dimensions)
}

/// Whether a GIF holds more than one frame
pub fn is_animated_gif(path: &Path) -> ConvertResult<bool> {
    let decoder = image::codecs::gif::GifDecoder::new(BufReader::new(File::open(path)?))?;
    Ok(decoder.into_frames().take(2).count() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Frame, Rgba, RgbaImage};
    use tempfile::TempDir;

    const FFPROBE_SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
        ],
        "format": {"duration": "12.480000", "bit_rate": "5000000"}
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let info = parse_ffprobe_json(FFPROBE_SAMPLE).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.codec, "h264");
        assert!((info.duration - 12.48).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ffprobe_without_video() {
        let json = r#"{"streams":[{"codec_type":"audio"}],"format":{}}"#;
        assert!(parse_ffprobe_json(json).is_err());
        assert!(parse_ffprobe_json("not json").is_err());
    }

    fn write_gif(path: &Path, frames: usize) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for i in 0..frames {
            let img = RgbaImage::from_pixel(8, 6, Rgba([(i * 60) as u8, 0, 0, 255]));
            encoder.encode_frame(Frame::new(img)).unwrap();
        }
    }

    #[test]
    fn test_animated_gif_detection() {
        let dir = TempDir::new().unwrap();
        let animated = dir.path().join("a.gif");
        let single = dir.path().join("s.gif");
        write_gif(&animated, 3);
        write_gif(&single, 1);

        assert!(is_animated_gif(&animated).unwrap());
        assert!(!is_animated_gif(&single).unwrap());
        assert_eq!(image_dimensions(&animated).unwrap(), (8, 6));
    }
}
