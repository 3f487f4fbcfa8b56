//! Dominant color extraction.
//!
//! Colors are bucketed on a coarse grid, near-black and near-white buckets are
//! dropped, then up to five mutually distinct buckets are picked by frequency.
//! The result is a swatch strip PNG plus a text listing (hex, RGB, HSL).

use crate::error::ConvertResult;
use crate::strategies::raster::decode_still;
use crate::strategies::{blocking, SourceFile, TranscodeOutput};
use image::{ImageOutputFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Cursor;

pub const MAX_COLORS: usize = 5;
const SAMPLE_SIDE: u32 = 150;
const BUCKET: u8 = 20;
const MIN_ALPHA: u8 = 128;
const MIN_LUMINANCE: f64 = 25.0;
const MAX_LUMINANCE: f64 = 235.0;
/// Sum of channel differences two picked colors must exceed
const MIN_DISTANCE: u32 = 60;

const SWATCH_SIDE: u32 = 140;
const LABEL_HEIGHT: u32 = 30;
const GLYPH_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColor {
    pub rgb: [u8; 3],
    /// Pixels that fell in this bucket
    pub count: u32,
}

impl PaletteColor {
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.rgb[0], self.rgb[1], self.rgb[2])
    }

    /// Hue in degrees, saturation and lightness in percent
    pub fn hsl(&self) -> (u16, u8, u8) {
        let [r, g, b] = self.rgb.map(|c| c as f64 / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let lightness = (max + min) / 2.0;
        let delta = max - min;

        if delta == 0.0 {
            return (0, 0, (lightness * 100.0).round() as u8);
        }

        let saturation = delta / (1.0 - (2.0 * lightness - 1.0).abs());
        let hue = if max == r {
            60.0 * (((g - b) / delta).rem_euclid(6.0))
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };

        (
            (hue.round() as u16) % 360,
            (saturation * 100.0).round() as u8,
            (lightness * 100.0).round() as u8,
        )
    }
}

fn bucket(channel: u8) -> u8 {
    ((channel / BUCKET) as u16 * BUCKET as u16 + BUCKET as u16 / 2).min(255) as u8
}

fn luminance(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}

fn distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs())
        .sum()
}

/// Bucketed histogram of the opaque pixels
pub fn histogram(pixels: impl Iterator<Item = [u8; 4]>) -> HashMap<[u8; 3], u32> {
    let mut counts = HashMap::new();
    for [r, g, b, a] in pixels {
        if a < MIN_ALPHA {
            continue;
        }
        *counts.entry([bucket(r), bucket(g), bucket(b)]).or_insert(0) += 1;
    }
    counts
}

/// Pick up to `MAX_COLORS` distinct dominant colors, most frequent first
pub fn dominant_colors(counts: &HashMap<[u8; 3], u32>) -> Vec<PaletteColor> {
    let mut candidates: Vec<PaletteColor> = counts
        .iter()
        .filter(|(rgb, _)| (MIN_LUMINANCE..=MAX_LUMINANCE).contains(&luminance(**rgb)))
        .map(|(rgb, count)| PaletteColor { rgb: *rgb, count: *count })
        .collect();
    if candidates.is_empty() {
        candidates = counts
            .iter()
            .map(|(rgb, count)| PaletteColor { rgb: *rgb, count: *count })
            .collect();
    }
    candidates.sort_by(|a, b| b.count.cmp(&a.count).then(a.rgb.cmp(&b.rgb)));

    let mut picked: Vec<PaletteColor> = Vec::with_capacity(MAX_COLORS);
    for candidate in candidates {
        if picked.len() == MAX_COLORS {
            break;
        }
        if picked.iter().all(|p| distance(p.rgb, candidate.rgb) > MIN_DISTANCE) {
            picked.push(candidate);
        }
    }
    picked
}

pub fn describe(colors: &[PaletteColor]) -> String {
    let mut text = String::from("Dominant colors:\n");
    for (i, color) in colors.iter().enumerate() {
        let (h, s, l) = color.hsl();
        let [r, g, b] = color.rgb;
        let _ = writeln!(
            text,
            "{}. {}  rgb({}, {}, {})  hsl({}, {}%, {}%)",
            i + 1,
            color.hex(),
            r,
            g,
            b,
            h,
            s,
            l
        );
    }
    text.trim_end().to_string()
}

/// 5x7 glyph rows, most significant of the low five bits is the leftmost pixel
fn glyph(c: char) -> Option<[u8; 7]> {
    Some(match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        _ => return None,
    })
}

fn draw_text(canvas: &mut RgbImage, text: &str, left: u32, top: u32, color: Rgb<u8>) {
    let advance = 6 * GLYPH_SCALE;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let origin_x = left + i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let x = origin_x + col * GLYPH_SCALE + dx;
                        let y = top + row as u32 * GLYPH_SCALE + dy;
                        if x < canvas.width() && y < canvas.height() {
                            canvas.put_pixel(x, y, color);
                        }
                    }
                }
            }
        }
    }
}

/// Swatch strip with the hex code under each color
pub fn render_strip(colors: &[PaletteColor]) -> RgbImage {
    let count = colors.len().max(1) as u32;
    let mut strip = RgbImage::from_pixel(SWATCH_SIDE * count, SWATCH_SIDE + LABEL_HEIGHT, Rgb([255, 255, 255]));

    for (i, color) in colors.iter().enumerate() {
        let left = i as u32 * SWATCH_SIDE;
        for y in 0..SWATCH_SIDE {
            for x in left..left + SWATCH_SIDE {
                strip.put_pixel(x, y, Rgb(color.rgb));
            }
        }
        let label = color.hex();
        let text_width = label.len() as u32 * 6 * GLYPH_SCALE - GLYPH_SCALE;
        let text_left = left + SWATCH_SIDE.saturating_sub(text_width) / 2;
        let text_top = SWATCH_SIDE + (LABEL_HEIGHT - 7 * GLYPH_SCALE) / 2;
        draw_text(&mut strip, &label, text_left, text_top, Rgb([30, 30, 30]));
    }
    strip
}

/// Extract the palette of a still image
pub async fn extract(source: &SourceFile) -> ConvertResult<TranscodeOutput> {
    let path = source.path.clone();
    let (bytes, text) = blocking(move || {
        let sample = decode_still(&path)?.thumbnail(SAMPLE_SIDE, SAMPLE_SIDE).to_rgba8();
        let counts = histogram(sample.pixels().map(|p| p.0));
        let colors = dominant_colors(&counts);

        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(render_strip(&colors)).write_to(&mut buffer, ImageOutputFormat::Png)?;
        Ok((buffer.into_inner(), describe(&colors)))
    })
    .await?;

    Ok(TranscodeOutput {
        bytes,
        filename: format!("{}_palette.png", source.stem()),
        side_text: Some(text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_gate::MediaKind;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_bucket_grid() {
        assert_eq!(bucket(0), 10);
        assert_eq!(bucket(19), 10);
        assert_eq!(bucket(20), 30);
        assert_eq!(bucket(255), 250);
    }

    #[test]
    fn test_hex_and_hsl() {
        let red = PaletteColor { rgb: [255, 0, 0], count: 1 };
        assert_eq!(red.hex(), "#FF0000");
        assert_eq!(red.hsl(), (0, 100, 50));

        let grey = PaletteColor { rgb: [128, 128, 128], count: 1 };
        assert_eq!(grey.hsl(), (0, 0, 50));

        let blue = PaletteColor { rgb: [0, 0, 255], count: 1 };
        assert_eq!(blue.hsl().0, 240);
    }

    #[test]
    fn test_transparent_pixels_ignored() {
        let pixels = vec![[200, 10, 10, 255], [10, 200, 10, 0], [200, 10, 10, 200]];
        let counts = histogram(pixels.into_iter());
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&[210, 10, 10]], 2);
    }

    #[test]
    fn test_extremes_dropped_unless_alone() {
        let mut counts = HashMap::new();
        counts.insert([10, 10, 10], 1000);
        counts.insert([250, 250, 250], 900);
        counts.insert([210, 50, 50], 10);
        let colors = dominant_colors(&counts);
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].rgb, [210, 50, 50]);

        let mut dark = HashMap::new();
        dark.insert([10, 10, 10], 5);
        assert_eq!(dominant_colors(&dark)[0].rgb, [10, 10, 10]);
    }

    #[test]
    fn test_similar_colors_merged_and_capped() {
        let mut counts = HashMap::new();
        counts.insert([210, 50, 50], 100);
        counts.insert([230, 50, 50], 90);
        for (i, rgb) in [[50, 210, 50], [50, 50, 210], [210, 210, 50], [50, 210, 210], [210, 50, 210]]
            .into_iter()
            .enumerate()
        {
            counts.insert(rgb, 50 - i as u32);
        }
        let colors = dominant_colors(&counts);
        assert_eq!(colors.len(), MAX_COLORS);
        assert_eq!(colors[0].rgb, [210, 50, 50]);
        assert!(colors.iter().all(|c| c.rgb != [230, 50, 50]));
        for (i, a) in colors.iter().enumerate() {
            for b in &colors[i + 1..] {
                assert!(distance(a.rgb, b.rgb) > MIN_DISTANCE);
            }
        }
    }

    #[test]
    fn test_strip_geometry() {
        let colors = [
            PaletteColor { rgb: [210, 50, 50], count: 3 },
            PaletteColor { rgb: [50, 50, 210], count: 2 },
        ];
        let strip = render_strip(&colors);
        assert_eq!(strip.dimensions(), (280, 170));
        assert_eq!(*strip.get_pixel(10, 10), Rgb([210, 50, 50]));
        assert_eq!(*strip.get_pixel(150, 10), Rgb([50, 50, 210]));
        assert!(strip
            .enumerate_pixels()
            .any(|(_, y, p)| y >= SWATCH_SIDE && *p == Rgb([30, 30, 30])));
    }

    #[tokio::test]
    async fn test_extract_two_tone_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flag.png");
        RgbaImage::from_fn(200, 100, |x, _| {
            if x < 150 { Rgba([0, 90, 200, 255]) } else { Rgba([240, 200, 0, 255]) }
        })
        .save(&path)
        .unwrap();
        let source = SourceFile {
            path,
            name: "flag.png".to_string(),
            kind: MediaKind::Still,
        };

        let output = extract(&source).await.unwrap();
        assert_eq!(output.filename, "flag_palette.png");
        let text = output.side_text.unwrap();
        assert!(text.contains("1. #0A5AD2"), "{}", text);
        assert!(text.contains("#FAD20A"), "{}", text);
        assert!(image::load_from_memory(&output.bytes).is_ok());
    }
}
