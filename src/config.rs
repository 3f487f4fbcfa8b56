//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione del motore di conversione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con soglie, timer e percorsi
//! - Fornisce validazione robusta dei parametri
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `input_ceiling_bytes`: Dimensione massima del sorgente (default: 100 MiB)
//! - `output_ceiling_bytes`: Dimensione massima del risultato (default: 25 MiB)
//! - `idle_warning_secs`: Inattività prima dell'avviso (default: 300)
//! - `idle_close_secs`: Attesa dopo l'avviso prima della chiusura (default: 60)
//! - `tool_timeout_secs`: Timeout per ogni invocazione di tool esterni (default: 600)
//! - `temp_root`: Directory dei file intermedi (default: None = cache utente)
//! - `stale_temp_secs`: Età oltre la quale i residui vengono rimossi (default: 3600)
//! - `resolver_endpoint`: Servizio di risoluzione URL remoti (default: None = yt-dlp)
//! - `max_still_images`: Numero massimo di immagini per l'assemblaggio (default: 10)
//! - `max_remote_clip_secs`: Durata massima di una clip remota (default: 10)
//!
//! ## Esempio:
//! ```rust
//! use media_converter::Config;
//!
//! let config = Config {
//!     output_ceiling_bytes: 8 * 1024 * 1024,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Configuration for the conversion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest accepted source, in bytes
    pub input_ceiling_bytes: u64,
    /// Largest deliverable artifact, in bytes
    pub output_ceiling_bytes: u64,
    /// Seconds of inactivity before a session is warned
    pub idle_warning_secs: u64,
    /// Seconds after the warning before the session is closed
    pub idle_close_secs: u64,
    /// Upper bound for a single external tool invocation
    pub tool_timeout_secs: u64,
    /// Root directory for per-job intermediate files (None = user cache dir)
    pub temp_root: Option<PathBuf>,
    /// Job directories older than this are swept at startup
    pub stale_temp_secs: u64,
    /// Optional HTTP service resolving page URLs to playable media URLs
    pub resolver_endpoint: Option<String>,
    /// Hard cap on stills accepted by multi-still assembly
    pub max_still_images: usize,
    /// Cap on the clip duration fetched from remote sources
    pub max_remote_clip_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_ceiling_bytes: 100 * MIB,
            output_ceiling_bytes: 25 * MIB,
            idle_warning_secs: 300,
            idle_close_secs: 60,
            tool_timeout_secs: 600,
            temp_root: None,
            stale_temp_secs: 3600,
            resolver_endpoint: None,
            max_still_images: 10,
            max_remote_clip_secs: 10,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.input_ceiling_bytes == 0 || self.output_ceiling_bytes == 0 {
            return Err(anyhow::anyhow!("Size ceilings must be greater than 0"));
        }

        if self.output_ceiling_bytes > self.input_ceiling_bytes {
            return Err(anyhow::anyhow!("Output ceiling cannot exceed the input ceiling"));
        }

        if self.idle_warning_secs == 0 || self.idle_close_secs == 0 {
            return Err(anyhow::anyhow!("Idle windows must be greater than 0"));
        }

        if self.idle_close_secs >= self.idle_warning_secs {
            return Err(anyhow::anyhow!(
                "Idle close window must be shorter than the warning window"
            ));
        }

        if self.tool_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Tool timeout must be greater than 0"));
        }

        if self.max_still_images == 0 || self.max_still_images > 10 {
            return Err(anyhow::anyhow!("Still image cap must be between 1 and 10"));
        }

        if self.max_remote_clip_secs == 0 || self.max_remote_clip_secs > 60 {
            return Err(anyhow::anyhow!("Remote clip cap must be between 1 and 60 seconds"));
        }

        if let Some(ref endpoint) = self.resolver_endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| anyhow::anyhow!("Invalid resolver endpoint {}: {}", endpoint, e))?;
        }

        Ok(())
    }

    /// Directory holding per-job temp directories
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("media-converter")
                .join("jobs")
        })
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn idle_warning(&self) -> Duration {
        Duration::from_secs(self.idle_warning_secs)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("media-converter").join("config.json"))
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.output_ceiling_bytes = 0;
        assert!(config.validate().is_err());

        config.output_ceiling_bytes = 200 * MIB;
        assert!(config.validate().is_err());

        config.output_ceiling_bytes = 25 * MIB;
        config.idle_close_secs = 300;
        assert!(config.validate().is_err());

        config.idle_close_secs = 60;
        config.max_still_images = 11;
        assert!(config.validate().is_err());

        config.max_still_images = 10;
        config.resolver_endpoint = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.input_ceiling_bytes, 100 * MIB);
        assert_eq!(config.output_ceiling_bytes, 25 * MIB);
        assert_eq!(config.idle_warning(), Duration::from_secs(300));
        assert_eq!(config.idle_close(), Duration::from_secs(60));
        assert_eq!(config.max_still_images, 10);
        assert!(config.resolver_endpoint.is_none());
    }

    #[test]
    fn test_temp_root_override() {
        let config = Config {
            temp_root: Some(PathBuf::from("/var/tmp/conv")),
            ..Default::default()
        };
        assert_eq!(config.temp_root(), PathBuf::from("/var/tmp/conv"));
        assert!(Config::default().temp_root().ends_with("media-converter/jobs"));
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let original_config = Config {
            output_ceiling_bytes: 8 * MIB,
            idle_warning_secs: 120,
            idle_close_secs: 30,
            resolver_endpoint: Some("https://resolver.example/api".to_string()),
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.output_ceiling_bytes, 8 * MIB);
        assert_eq!(loaded_config.idle_warning_secs, 120);
        assert_eq!(loaded_config.idle_close_secs, 30);
        assert_eq!(
            loaded_config.resolver_endpoint.as_deref(),
            Some("https://resolver.example/api")
        );
    }

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config.tool_timeout_secs, 600);
    }
}
