//! # Progress Module
//!
//! Feedback visivo per la CLI con `indicatif`.
//!
//! ## Responsabilità:
//! - Spinner durante le fasi lunghe (download, trascodifica, retry)
//! - Messaggio finale con nome e dimensione del risultato
//! - Silenzioso in modalità JSON, dove stdout è riservato agli eventi
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:12] 🎬 Transcoding trip.mp4 (animated_encode)
//! ✅ trip.gif: 4.21 MB
//! ```

use crate::negotiator::format_size;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Stage of a CLI run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcoding,
    Retrying,
}

/// Spinner shown while a conversion runs
#[derive(Clone)]
pub struct ProgressManager {
    bar: Option<ProgressBar>,
}

impl ProgressManager {
    /// Create a spinner, or a silent manager when `enabled` is false
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { bar: None };
        }

        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self { bar: Some(spinner) }
    }

    pub fn stage(&self, stage: Stage, subject: &str) {
        self.set_message(&stage_message(stage, subject));
    }

    pub fn set_message(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.to_string());
        }
    }

    /// Stop the spinner with a delivery line
    pub fn finish_delivered(&self, filename: &str, size: u64) {
        self.finish(&format!("✅ {}: {}", filename, format_size(size)));
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    /// Stop the spinner without leaving a line behind
    pub fn clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub fn stage_message(stage: Stage, subject: &str) -> String {
    match stage {
        Stage::Transcoding => format!("🎬 Transcoding {}", subject),
        Stage::Retrying => format!("🔁 Retrying {} with the optimized profile", subject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_messages() {
        assert_eq!(stage_message(Stage::Transcoding, "a.mp4"), "🎬 Transcoding a.mp4");
        assert!(stage_message(Stage::Retrying, "a.mp4").contains("optimized"));
    }

    #[test]
    fn test_disabled_manager_is_silent() {
        let progress = ProgressManager::new(false);
        progress.stage(Stage::Transcoding, "a.mp4");
        progress.finish_delivered("a.gif", 10);
        progress.clear();
    }
}
