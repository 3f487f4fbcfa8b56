//! # Platform-specific utilities
//!
//! Questo modulo centralizza la gestione cross-platform dei comandi esterni
//! e il controllo delle dipendenze richieste da ogni operazione.

use crate::error::{ConvertError, ConvertResult};
use crate::operation::Operation;
use crate::tool_resolver::ToolPathResolver;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Platform-specific command manager with tool resolution
pub struct PlatformCommands {
    commands: HashMap<&'static str, &'static str>,
    tool_resolver: ToolPathResolver,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        let mut commands = HashMap::new();
        if cfg!(windows) {
            commands.insert("ffmpeg", "ffmpeg.exe");
            commands.insert("ffprobe", "ffprobe.exe");
            commands.insert("gifsicle", "gifsicle.exe");
            commands.insert("yt-dlp", "yt-dlp.exe");
        } else {
            commands.insert("ffmpeg", "ffmpeg");
            commands.insert("ffprobe", "ffprobe");
            commands.insert("gifsicle", "gifsicle");
            commands.insert("yt-dlp", "yt-dlp");
        }

        Self {
            commands,
            tool_resolver: ToolPathResolver::new(),
        }
    }

    /// Get the platform-specific command name
    pub fn get_command<'a>(&self, base_name: &'a str) -> &'a str {
        self.commands.get(base_name).copied().unwrap_or(base_name)
    }

    /// Get the resolved path to a tool (bundled or system)
    pub fn get_tool_path(&self, base_name: &str) -> Option<std::path::PathBuf> {
        self.tool_resolver.resolve_tool(base_name)
    }

    /// Get a report of all known tools
    pub fn get_tools_report(&self) -> String {
        format!("{}\n{}", Self::system_info(), self.tool_resolver.get_tools_report())
    }

    /// Fail with `MissingDependency` when a tool the operation needs is absent.
    ///
    /// Remote conversion only needs yt-dlp when no resolver endpoint is configured.
    pub fn check_dependencies(
        &self,
        operation: Operation,
        has_resolver_endpoint: bool,
    ) -> ConvertResult<()> {
        for tool in operation.required_tools() {
            if *tool == "yt-dlp" && has_resolver_endpoint {
                continue;
            }
            if let Err(message) = self.tool_resolver.check_tool_with_instructions(tool) {
                return Err(ConvertError::MissingDependency(message));
            }
        }
        Ok(())
    }

    /// Get system information for debugging
    pub fn system_info() -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
        }
    }
}

/// System information structure
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}
