//! # Remote Source Strategy
//!
//! Trasforma un URL di una piattaforma video in una clip locale breve.
//!
//! ## Responsabilità:
//! - Risoluzione dell'URL in uno stream diretto (endpoint HTTP configurato, oppure yt-dlp)
//! - Finestra temporale della clip limitata dal profilo
//! - Download della sola finestra richiesta con ffmpeg

use crate::args;
use crate::command::ToolRunner;
use crate::error::{ConvertError, ConvertResult};
use crate::operation::QualityProfile;
use crate::temp::TempTracker;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Extensions that are already a direct media stream
const DIRECT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "gif", "m4v"];

const RESOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Response of the resolver endpoint
#[derive(Debug, Deserialize)]
struct ResolverResponse {
    url: Option<String>,
    error: Option<String>,
}

/// Turns a page URL into a directly streamable media URL
#[derive(Debug, Clone)]
pub struct RemoteResolver {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl RemoteResolver {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RESOLVER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Resolve `raw` to a stream URL
    pub async fn resolve(&self, runner: &ToolRunner, raw: &str) -> ConvertResult<String> {
        let parsed = parse_remote_url(raw)?;
        if is_direct_media(&parsed) {
            debug!("Direct media URL, no resolution needed");
            return Ok(parsed.to_string());
        }

        match &self.endpoint {
            Some(endpoint) => self.resolve_with_endpoint(endpoint, parsed.as_str()).await,
            None => resolve_with_ytdlp(runner, parsed.as_str()).await,
        }
    }

    async fn resolve_with_endpoint(&self, endpoint: &str, target: &str) -> ConvertResult<String> {
        let mut request_url = Url::parse(endpoint)
            .map_err(|e| ConvertError::Fetch(format!("invalid resolver endpoint: {}", e)))?;
        request_url.query_pairs_mut().append_pair("url", target);

        info!("🌐 Resolving through endpoint {}", endpoint);
        let response: ResolverResponse = self
            .client
            .get(request_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        stream_url_from(response)
    }
}

fn stream_url_from(response: ResolverResponse) -> ConvertResult<String> {
    match (response.url, response.error) {
        (Some(url), _) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        (_, Some(error)) => Err(ConvertError::Fetch(error)),
        _ => Err(ConvertError::Fetch("resolver returned no stream URL".to_string())),
    }
}

async fn resolve_with_ytdlp(runner: &ToolRunner, target: &str) -> ConvertResult<String> {
    info!("🌐 Resolving with yt-dlp");
    let output = runner
        .run("yt-dlp", &args!["-g", "-f", "best[ext=mp4]/best", "--no-playlist", target])
        .await?;
    first_stream_line(&String::from_utf8_lossy(&output.stdout))
}

/// yt-dlp prints one URL per selected stream
pub fn first_stream_line(stdout: &str) -> ConvertResult<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("http"))
        .map(str::to_string)
        .ok_or_else(|| ConvertError::Fetch("yt-dlp returned no stream URL".to_string()))
}

pub fn parse_remote_url(raw: &str) -> ConvertResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConvertError::InvalidParameters(format!("invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConvertError::InvalidParameters(format!(
            "unsupported URL scheme '{}'",
            other
        ))),
    }
}

pub fn is_direct_media(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| DIRECT_MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Portion of the remote video to fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub start: f64,
    pub duration: f64,
}

impl ClipWindow {
    /// Duration is capped by the configured clip ceiling and the profile
    pub fn new(start: f64, duration: f64, max_clip_secs: u64, profile: &QualityProfile) -> Self {
        let ceiling = (max_clip_secs as f64).min(profile.max_duration_secs as f64);
        let duration = if duration.is_finite() && duration > 0.0 {
            duration.min(ceiling)
        } else {
            ceiling
        };
        Self {
            start: if start.is_finite() { start.max(0.0) } else { 0.0 },
            duration,
        }
    }
}

pub fn clip_args(stream_url: &str, window: ClipWindow, output: &std::path::Path) -> Vec<String> {
    args![
        "-y",
        "-ss", format!("{:.2}", window.start),
        "-t", format!("{:.2}", window.duration),
        "-i", stream_url,
        "-an",
        "-c:v", "libx264",
        "-preset", "veryfast",
        "-pix_fmt", "yuv420p",
        "-loglevel", "error",
        output.display(),
    ]
}

/// Download the window of `url` into a local clip
pub async fn fetch_clip(
    runner: &ToolRunner,
    resolver: &RemoteResolver,
    url: &str,
    window: ClipWindow,
    tracker: &mut TempTracker,
) -> ConvertResult<PathBuf> {
    let stream = resolver.resolve(runner, url).await?;
    let clip = tracker.allocate("clip", "mp4");

    info!(
        "⬇️  Fetching {:.1}s from {:.1}s",
        window.duration, window.start
    );
    runner.run("ffmpeg", &clip_args(&stream, window, &clip)).await?;
    Ok(clip)
}
