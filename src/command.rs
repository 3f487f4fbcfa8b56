//! # External Tool Invocation
//!
//! Helpers for building argument lists and running ffmpeg, gifsicle and
//! friends without blocking the dispatcher.
//!
//! Every invocation is bounded by the configured timeout and a non-zero exit
//! status is turned into `ConvertError::Transcode` carrying the tool's stderr.

use crate::error::{ConvertError, ConvertResult};
use crate::platform::PlatformCommands;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Converts a vector of string-like items to Vec<String>.
///
/// # Example
/// ```rust
/// use media_converter::command::to_string_vec;
///
/// let width = 480;
/// let args = to_string_vec(["-vf", &format!("scale={}:-1", width)]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from mixed displayable values.
///
/// ```rust
/// use media_converter::args;
///
/// let colors = 128;
/// let args = args!["--colors", colors, "-O3"];
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::command::to_string_vec([$($item.to_string()),*])
    };
}

/// Captured result of a successful tool run
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs a named external tool with a timeout
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `tool` with `args`, failing on spawn errors, timeouts and non-zero exit
    pub async fn run(&self, tool: &str, args: &[String]) -> ConvertResult<ToolOutput> {
        let platform = PlatformCommands::instance();
        let program = platform
            .get_tool_path(tool)
            .unwrap_or_else(|| platform.get_command(tool).into());

        debug!("Command: {:?} {:?}", program, args);
        let start_time = Instant::now();

        let mut cmd = Command::new(&program);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ConvertError::Timeout {
                tool: tool.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::MissingDependency(format!("{} is not installed", tool))
                } else {
                    ConvertError::Transcode(format!("failed to execute {}: {}", tool, e))
                }
            })?;

        let elapsed = start_time.elapsed();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            debug!("{} failed after {:.1}s", tool, elapsed.as_secs_f64());
            return Err(ConvertError::Transcode(format!(
                "{} exited with {}: {}",
                tool,
                output.status,
                last_lines(&stderr, 6)
            )));
        }

        debug!("{} completed in {:.1}s", tool, elapsed.as_secs_f64());
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
            elapsed,
        })
    }
}

// ffmpeg prints its banner first; the useful diagnostic is at the end.
fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join(" | ")
}
