//! # Tool Path Resolver
//!
//! Finds the external encoders the strategies shell out to:
//! - A tools directory given by `MEDIA_CONVERTER_TOOLS_DIR` or `TOOLS_DIR`
//! - The system `PATH`

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tools the engine knows how to drive, grouped for the availability report
pub const KNOWN_TOOLS: &[(&str, &[&str])] = &[
    ("Video", &["ffmpeg", "ffprobe"]),
    ("GIF", &["gifsicle"]),
    ("Remote", &["yt-dlp"]),
];

/// Tool path resolver for bundled and system installs
pub struct ToolPathResolver {
    /// Directory holding bundled binaries, checked before PATH
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    pub fn new() -> Self {
        Self {
            tools_dir: Self::detect_tools_dir(),
        }
    }

    /// Resolver rooted at an explicit directory
    pub fn with_tools_dir(tools_dir: Option<PathBuf>) -> Self {
        Self { tools_dir }
    }

    fn detect_tools_dir() -> Option<PathBuf> {
        ["MEDIA_CONVERTER_TOOLS_DIR", "TOOLS_DIR"]
            .iter()
            .filter_map(|var| env::var_os(var))
            .map(PathBuf::from)
            .find(|path| {
                debug!("Checking tools directory: {:?}", path);
                path.is_dir()
            })
    }

    /// Resolve the path to a specific tool
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            let bundled = Self::bundled_tool_path(tools_dir, tool_name);
            if bundled.is_file() {
                debug!("Using bundled tool: {} -> {:?}", tool_name, bundled);
                return Some(bundled);
            }
        }

        let found = Self::find_in_system_path(tool_name);
        if found.is_none() {
            debug!("Tool not found: {}", tool_name);
        }
        found
    }

    fn bundled_tool_path(tools_dir: &Path, tool_name: &str) -> PathBuf {
        tools_dir.join(format!("{}{}", tool_name, env::consts::EXE_SUFFIX))
    }

    fn find_in_system_path(tool_name: &str) -> Option<PathBuf> {
        let tool_with_ext = format!("{}{}", tool_name, env::consts::EXE_SUFFIX);
        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var)
            .map(|dir| dir.join(&tool_with_ext))
            .find(|path| path.is_file())
    }

    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Installation hint shown when a tool is missing
    pub fn install_hint(tool_name: &str) -> String {
        match tool_name {
            "ffmpeg" | "ffprobe" => "sudo apt-get install ffmpeg".to_string(),
            "gifsicle" => "sudo apt-get install gifsicle".to_string(),
            "yt-dlp" => "pip install yt-dlp  # or download from https://github.com/yt-dlp/yt-dlp/releases".to_string(),
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        self.resolve_tool(tool_name).ok_or_else(|| {
            format!(
                "Tool '{}' not found. To install it, run:\n  {}",
                tool_name,
                Self::install_hint(tool_name)
            )
        })
    }

    /// Get a report of tool availability
    pub fn get_tools_report(&self) -> String {
        let mut report = String::from("Tool availability\n");
        report.push_str(&format!("Bundled tools dir: {:?}\n", self.tools_dir));

        for (category, tool_list) in KNOWN_TOOLS {
            report.push_str(&format!("\n{}:\n", category));
            for tool in tool_list.iter() {
                match self.resolve_tool(tool) {
                    Some(path) => report.push_str(&format!("  ✅ {} -> {:?}\n", tool, path)),
                    None => report.push_str(&format!(
                        "  ❌ {} (install with: {})\n",
                        tool,
                        Self::install_hint(tool)
                    )),
                }
            }
        }

        report
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_tool_wins() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join(format!("gifsicle{}", env::consts::EXE_SUFFIX));
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();

        let resolver = ToolPathResolver::with_tools_dir(Some(dir.path().to_path_buf()));
        assert_eq!(resolver.resolve_tool("gifsicle"), Some(fake));
    }

    #[test]
    fn test_unknown_tool_reports_hint() {
        let resolver = ToolPathResolver::with_tools_dir(None);
        let err = resolver
            .check_tool_with_instructions("no-such-encoder-abc")
            .unwrap_err();
        assert!(err.contains("no-such-encoder-abc"));
        assert!(err.contains("apt-get install no-such-encoder-abc"));
    }

    #[test]
    fn test_report_lists_known_tools() {
        let report = ToolPathResolver::with_tools_dir(None).get_tools_report();
        for (_, tools) in KNOWN_TOOLS {
            for tool in tools.iter() {
                assert!(report.contains(tool));
            }
        }
    }
}
