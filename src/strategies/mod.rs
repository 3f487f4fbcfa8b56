//! # Transcoder Strategies
//!
//! Una strategia per operazione, tutte dietro al trait `Transcoder`:
//! - `animated`: video → GIF in due passate (palette + remap)
//! - `lossy`: ricompressione lossy di GIF esistenti
//! - `raster`: crop quadrato, stretch/fit/fill, conversione di formato
//! - `assemble`: più immagini statiche → GIF
//! - `remote`: risoluzione URL remoto, download della clip, poi `animated`
//! - `palette`: estrazione dei colori dominanti
//!
//! Ogni strategia alloca i propri file intermedi tramite `TempTracker` e non
//! li rimuove: la pulizia spetta a chi possiede il tracker.

pub mod animated;
pub mod assemble;
pub mod lossy;
pub mod palette;
pub mod raster;
pub mod remote;

use crate::command::ToolRunner;
use crate::error::{ConvertError, ConvertResult};
use crate::format_gate::MediaKind;
use crate::operation::{OperationParams, QualityProfile, TargetFormat};
use crate::probe;
use crate::temp::TempTracker;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A validated, locally available source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Original upload name, used to derive the output name
    pub name: String,
    pub kind: MediaKind,
}

impl SourceFile {
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "output".to_string())
    }

    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Everything a strategy needs for one attempt
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    pub params: &'a OperationParams,
    pub sources: &'a [SourceFile],
    pub profile: &'a QualityProfile,
}

/// Finished artifact of one attempt
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub side_text: Option<String>,
}

impl TranscodeOutput {
    pub async fn from_path(path: &Path, filename: String) -> ConvertResult<Self> {
        Ok(Self {
            bytes: tokio::fs::read(path).await?,
            filename,
            side_text: None,
        })
    }

    pub fn with_side_text(mut self, text: impl Into<String>) -> Self {
        self.side_text = Some(text.into());
        self
    }

    /// Append a paragraph to the side text
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.side_text = Some(match self.side_text.take() {
            Some(text) => format!("{}\n\n{}", text, note),
            None => note,
        });
        self
    }
}

/// Executes an operation over validated sources
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        tracker: &mut TempTracker,
    ) -> ConvertResult<TranscodeOutput>;
}

/// Production transcoder dispatching to the strategy modules
pub struct StrategyTranscoder {
    runner: ToolRunner,
    resolver: remote::RemoteResolver,
    max_clip_secs: u64,
    max_stills: usize,
}

impl StrategyTranscoder {
    pub fn new(
        runner: ToolRunner,
        resolver: remote::RemoteResolver,
        max_clip_secs: u64,
        max_stills: usize,
    ) -> Self {
        Self {
            runner,
            resolver,
            max_clip_secs,
            max_stills,
        }
    }

    fn single(sources: &[SourceFile]) -> ConvertResult<&SourceFile> {
        match sources {
            [one] => Ok(one),
            [] => Err(ConvertError::NoValidInput),
            more => Err(ConvertError::InvalidParameters(format!(
                "this operation takes one file, got {}",
                more.len()
            ))),
        }
    }
}

#[async_trait]
impl Transcoder for StrategyTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        tracker: &mut TempTracker,
    ) -> ConvertResult<TranscodeOutput> {
        let profile = request.profile;
        info!(
            job = %tracker.job(),
            operation = %request.params.operation(),
            optimized = profile.optimized,
            "Running strategy"
        );

        match request.params {
            OperationParams::AnimatedEncode => {
                let source = Self::single(request.sources)?;
                // Fails early on sources without a video stream
                let info = probe::probe_video(&self.runner, &source.path).await?;
                debug!(
                    "Source {}x{} {} ({:.1}s)",
                    info.width, info.height, info.codec, info.duration
                );
                let output = animated::encode(&self.runner, &source.path, profile, tracker).await?;
                let output = TranscodeOutput::from_path(&output, format!("{}.gif", source.stem())).await?;
                Ok(match animated::trim_note(info.duration, profile) {
                    Some(note) => output.with_side_text(note),
                    None => output,
                })
            }
            OperationParams::LossyRecompress { percentage } => {
                let source = Self::single(request.sources)?;
                let settings = lossy::LossySettings::derive(*percentage, profile);
                let output = lossy::recompress(&self.runner, &source.path, &settings, tracker).await?;
                Ok(TranscodeOutput::from_path(&output, format!("{}_compressed.gif", source.stem()))
                    .await?
                    .with_side_text(settings.describe()))
            }
            OperationParams::Crop => {
                let source = Self::single(request.sources)?;
                raster::crop_square(&self.runner, source, tracker).await
            }
            OperationParams::Stretch { width, height, mode } => {
                let source = Self::single(request.sources)?;
                raster::stretch(&self.runner, source, *width, *height, *mode, tracker).await
            }
            OperationParams::FormatConvert { target_format, quality } => {
                let source = Self::single(request.sources)?;
                let (format, rebased_from) = TargetFormat::parse(target_format)?;
                let output = raster::convert(&self.runner, source, format, *quality, profile, tracker).await?;
                Ok(match rebased_from {
                    Some(requested) => output.with_note(raster::rebase_note(&requested, format)),
                    None => output,
                })
            }
            OperationParams::MultiStillAssemble { frame_duration } => {
                if request.sources.len() > self.max_stills {
                    return Err(ConvertError::TooManyInputs {
                        count: request.sources.len(),
                        max: self.max_stills,
                    });
                }
                let output = assemble::assemble(
                    &self.runner,
                    request.sources,
                    *frame_duration,
                    profile,
                    tracker,
                )
                .await?;
                TranscodeOutput::from_path(&output, "slideshow.gif".to_string()).await
            }
            OperationParams::RemoteFetchConvert { url, start_offset, duration } => {
                let window = remote::ClipWindow::new(*start_offset, *duration, self.max_clip_secs, profile);
                let clip = remote::fetch_clip(&self.runner, &self.resolver, url, window, tracker).await?;
                let output = animated::encode(&self.runner, &clip, profile, tracker).await?;
                TranscodeOutput::from_path(&output, "clip.gif".to_string()).await
            }
            OperationParams::PaletteExtract => {
                let source = Self::single(request.sources)?;
                palette::extract(source).await
            }
        }
    }
}

/// Run blocking image work off the async dispatcher
pub(crate) async fn blocking<T, F>(work: F) -> ConvertResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ConvertResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConvertError::Transcode(format!("image worker failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/tmp/x"),
            name: name.to_string(),
            kind: MediaKind::Still,
        }
    }

    #[test]
    fn test_source_name_parts() {
        let s = source("Holiday Photo.JPG");
        assert_eq!(s.stem(), "Holiday Photo");
        assert_eq!(s.extension(), "jpg");
        assert_eq!(source("").stem(), "output");
    }

    #[test]
    fn test_notes_append_to_side_text() {
        let output = TranscodeOutput {
            bytes: Vec::new(),
            filename: "a.webp".to_string(),
            side_text: None,
        };
        let output = output.with_note("first");
        assert_eq!(output.side_text.as_deref(), Some("first"));
        let output = output.with_note("second");
        assert_eq!(output.side_text.as_deref(), Some("first\n\nsecond"));
    }

    #[test]
    fn test_single_source_required() {
        assert!(matches!(
            StrategyTranscoder::single(&[]),
            Err(ConvertError::NoValidInput)
        ));
        let two = [source("a.png"), source("b.png")];
        assert!(StrategyTranscoder::single(&two).is_err());
        assert!(StrategyTranscoder::single(&two[..1]).is_ok());
    }
}
