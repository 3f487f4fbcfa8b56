//! # Format Gate Module
//!
//! Questo modulo decide se un file caricato è accettabile per l'operazione selezionata.
//!
//! ## Responsabilità:
//! - Mantiene l'insieme di estensioni accettate per ogni operazione
//! - Verifica estensione e content-type dichiarato prima di qualsiasi download
//! - Classifica il file (immagine statica, GIF, video) per le strategie
//!
//! ## Formati per operazione:
//! - **animated_encode**: MP4, MOV, WebM, MKV, AVI, M4V
//! - **lossy_recompress**: GIF
//! - **crop / stretch / palette_extract**: PNG, JPG, JPEG, WebP, BMP, GIF
//! - **format_convert**: come sopra più TIF, TIFF, ICO
//! - **multi_still_assemble**: PNG, JPG, JPEG, WebP, BMP
//! - **remote_fetch_convert**: nessun file, solo URL
//!
//! Il gate non ha effetti collaterali: un rifiuto non alloca nulla.

use crate::error::{ConvertError, ConvertResult};
use crate::operation::Operation;
use std::path::Path;

/// Broad family of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Single raster image
    Still,
    /// GIF container, possibly animated
    Gif,
    Video,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];
const GIF_ONLY: &[&str] = &["gif"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];
const CONVERTIBLE_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff", "ico"];
const STILL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Validates uploads against the selected operation
pub struct FormatGate;

impl FormatGate {
    /// Extensions accepted for an operation (lowercase, no dot)
    pub fn accepted_extensions(operation: Operation) -> &'static [&'static str] {
        match operation {
            Operation::AnimatedEncode => VIDEO_EXTENSIONS,
            Operation::LossyRecompress => GIF_ONLY,
            Operation::Crop | Operation::Stretch | Operation::PaletteExtract => IMAGE_EXTENSIONS,
            Operation::FormatConvert => CONVERTIBLE_EXTENSIONS,
            Operation::MultiStillAssemble => STILL_EXTENSIONS,
            Operation::RemoteFetchConvert => &[],
        }
    }

    /// Check a file name and declared content type against the operation.
    ///
    /// Fails with `FormatMismatch` naming the accepted set when the extension is
    /// missing, unknown, not accepted, or contradicted by the content type.
    pub fn check(
        file_name: &str,
        content_type: Option<&str>,
        operation: Operation,
    ) -> ConvertResult<MediaKind> {
        let accepted = Self::accepted_extensions(operation);
        let extension = Self::extension_of(file_name);

        let mismatch = |ext: &str| ConvertError::FormatMismatch {
            extension: if ext.is_empty() { "(none)".to_string() } else { ext.to_string() },
            accepted: accepted.iter().map(|e| e.to_string()).collect(),
        };

        let ext = match extension {
            Some(ext) if accepted.contains(&ext.as_str()) => ext,
            Some(ext) => return Err(mismatch(&ext)),
            None => return Err(mismatch("")),
        };

        let kind = Self::media_kind(&ext).ok_or_else(|| mismatch(&ext))?;

        if let Some(declared) = content_type {
            if !Self::content_type_agrees(declared, kind) {
                return Err(mismatch(&format!("{} ({})", ext, declared)));
            }
        }

        Ok(kind)
    }

    /// Lowercase extension of a file name, if any
    pub fn extension_of(file_name: &str) -> Option<String> {
        Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Classify an extension
    pub fn media_kind(extension: &str) -> Option<MediaKind> {
        let ext = extension.to_ascii_lowercase();
        if ext == "gif" {
            Some(MediaKind::Gif)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if CONVERTIBLE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Still)
        } else {
            None
        }
    }

    // Generic binary types carry no information and are let through.
    fn content_type_agrees(declared: &str, kind: MediaKind) -> bool {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() || essence == "application/octet-stream" {
            return true;
        }
        match kind {
            MediaKind::Still | MediaKind::Gif => essence.starts_with("image/"),
            MediaKind::Video => essence.starts_with("video/"),
        }
    }
}
