//! Toolchain process execution for nupush.
//!
//! This crate runs external build-toolchain commands with output capture.
//! Processes inherit the parent environment; stdout and stderr are always
//! captured in full so the pipeline can record them regardless of the
//! exit code.
//!
//! # Example
//!
//! ```ignore
//! use nupush_process::{run_dotnet, CommandResult};
//! use std::path::Path;
//!
//! let result = run_dotnet(&["--version"], Path::new(".")).expect("run");
//! assert!(result.success);
//! ```

use std::env;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the toolchain binary (test seam).
pub const DOTNET_BIN_ENV: &str = "NUPUSH_DOTNET_BIN";

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// Exit code (if available)
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Duration of execution
    pub duration_ms: u64,
}

impl CommandResult {
    /// Create a result from a process output
    pub fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Check that the command succeeded
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {:?} after {}: {}",
                self.exit_code,
                humantime::format_duration(Duration::from_millis(self.duration_ms)),
                self.failure_output()
            ))
        }
    }

    /// The output most useful for a failure message: stderr when it has
    /// anything to say, stdout otherwise.
    pub fn failure_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Run a command in a specific directory, capturing its output.
pub fn run_command_in_dir(program: &str, args: &[&str], dir: &Path) -> Result<CommandResult> {
    let start = std::time::Instant::now();

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| {
            format!(
                "failed to run command: {} {:?} in {}",
                program,
                args,
                dir.display()
            )
        })?;

    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command in the current directory, capturing its output.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandResult> {
    let start = std::time::Instant::now();

    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run command: {} {:?}", program, args))?;

    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command
pub fn which(program: &str) -> Option<std::path::PathBuf> {
    which::which(program).ok()
}

/// The toolchain binary, overridable via [`DOTNET_BIN_ENV`].
pub fn dotnet_program() -> String {
    env::var(DOTNET_BIN_ENV).unwrap_or_else(|_| "dotnet".to_string())
}

/// Run the toolchain in a specific directory.
pub fn run_dotnet(args: &[&str], dir: &Path) -> Result<CommandResult> {
    run_command_in_dir(&dotnet_program(), args, dir)
}
