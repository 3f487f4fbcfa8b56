//! # Source Fetcher
//!
//! Porta gli allegati referenziati dalla piattaforma dentro la directory del Job.
//!
//! ## Responsabilità:
//! - Download in streaming per URL http(s), con limite di input applicato durante lo stream
//! - Copia per URL `file://` e percorsi locali
//! - Allocazione del percorso di destinazione tramite `TempTracker`

use crate::error::{ConvertError, ConvertResult};
use crate::format_gate::{FormatGate, MediaKind};
use crate::strategies::SourceFile;
use crate::temp::TempTracker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Attachment reference handed over by the platform adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    /// http(s) URL, `file://` URL or local path
    pub url: String,
    /// Declared size in bytes
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileRef {
    /// Reference a local file, reading its size from disk
    pub fn local(path: &Path) -> ConvertResult<Self> {
        let size = std::fs::metadata(path)?.len();
        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            url: path.display().to_string(),
            size,
            content_type: None,
        })
    }
}

/// Where a reference points to
#[derive(Debug, PartialEq)]
enum Location {
    Remote(Url),
    Local(PathBuf),
}

fn locate(reference: &str) -> ConvertResult<Location> {
    match Url::parse(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Location::Remote(url)),
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Location::Local)
            .map_err(|_| ConvertError::Fetch(format!("invalid file URL '{}'", reference))),
        Ok(url) if url.scheme().len() > 1 => Err(ConvertError::Fetch(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        ))),
        // relative paths and single-letter schemes (Windows drives) are local
        _ => Ok(Location::Local(PathBuf::from(reference))),
    }
}

#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    input_ceiling: u64,
}

impl SourceFetcher {
    pub fn new(input_ceiling: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            input_ceiling,
        }
    }

    /// Fetch `file` into a fresh path of `tracker`
    pub async fn fetch(
        &self,
        file: &FileRef,
        kind: MediaKind,
        tracker: &mut TempTracker,
    ) -> ConvertResult<SourceFile> {
        let extension = FormatGate::extension_of(&file.name).unwrap_or_else(|| "bin".to_string());
        let destination = tracker.allocate("source", &extension);

        let written = match locate(&file.url)? {
            Location::Remote(url) => self.download(url, &destination).await?,
            Location::Local(path) => self.copy(&path, &destination).await?,
        };
        debug!(
            job = %tracker.job(),
            "Fetched {} ({} bytes) into {}",
            file.name,
            written,
            destination.display()
        );

        Ok(SourceFile {
            path: destination,
            name: file.name.clone(),
            kind,
        })
    }

    async fn download(&self, url: Url, destination: &Path) -> ConvertResult<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        if let Some(length) = response.content_length() {
            self.check(length)?;
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            written += data.len() as u64;
            self.check(written)?;
            file.write_all(&data).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn copy(&self, source: &Path, destination: &Path) -> ConvertResult<u64> {
        let size = tokio::fs::metadata(source).await?.len();
        self.check(size)?;
        Ok(tokio::fs::copy(source, destination).await?)
    }

    fn check(&self, size: u64) -> ConvertResult<()> {
        if size > self.input_ceiling {
            return Err(ConvertError::InputTooLarge {
                size,
                ceiling: self.input_ceiling,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::JobId;
    use tempfile::TempDir;

    #[test]
    fn test_locate_references() {
        assert!(matches!(locate("https://cdn.example/a.gif").unwrap(), Location::Remote(_)));
        assert_eq!(
            locate("file:///tmp/a.png").unwrap(),
            Location::Local(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(locate("some/dir/a.png").unwrap(), Location::Local(PathBuf::from("some/dir/a.png")));
        assert!(locate("ftp://host/a.png").is_err());
    }

    #[tokio::test]
    async fn test_fetch_local_copy_is_tracked() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("photo.png");
        std::fs::write(&original, b"0123456789").unwrap();
        let reference = FileRef::local(&original).unwrap();
        assert_eq!(reference.size, 10);
        assert_eq!(reference.name, "photo.png");

        let mut tracker = TempTracker::create(&dir.path().join("jobs"), JobId(1)).unwrap();
        let fetcher = SourceFetcher::new(1024);
        let source = fetcher.fetch(&reference, MediaKind::Still, &mut tracker).await.unwrap();

        assert_eq!(std::fs::read(&source.path).unwrap(), b"0123456789");
        assert_eq!(source.name, "photo.png");
        assert_eq!(tracker.live_paths(), vec![source.path.clone()]);
    }

    #[tokio::test]
    async fn test_fetch_enforces_ceiling_on_actual_size() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("big.gif");
        std::fs::write(&original, vec![0u8; 64]).unwrap();
        let reference = FileRef {
            size: 1,
            ..FileRef::local(&original).unwrap()
        };

        let mut tracker = TempTracker::create(&dir.path().join("jobs"), JobId(2)).unwrap();
        let result = SourceFetcher::new(32)
            .fetch(&reference, MediaKind::Gif, &mut tracker)
            .await;
        assert!(matches!(result, Err(ConvertError::InputTooLarge { size: 64, ceiling: 32 })));
    }
}
