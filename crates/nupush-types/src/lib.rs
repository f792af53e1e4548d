//! Core domain types for nupush.
//!
//! This crate provides the fundamental types used across the nupush
//! workspace: the publish request model, registry endpoint derivation,
//! the error taxonomy, and cooperative cancellation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GitHub-hosted registry base, scoped per organization.
pub const GITHUB_NUGET_SERVER: &str = "https://nuget.pkg.github.com";

/// Default public registry base.
pub const NUGET_ORG_SERVER: &str = "https://api.nuget.org";

/// Build configuration passed to the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildConfiguration {
    /// Debug build configuration
    Debug,
    /// Release build configuration
    #[default]
    Release,
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildConfiguration::Debug => write!(f, "Debug"),
            BuildConfiguration::Release => write!(f, "Release"),
        }
    }
}

impl FromStr for BuildConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(BuildConfiguration::Debug),
            "release" => Ok(BuildConfiguration::Release),
            other => Err(format!("unknown build configuration: {other}")),
        }
    }
}

/// Target platform passed to the toolchain as `-property:Platform=<value>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPlatform {
    /// Platform-neutral build
    #[default]
    AnyCpu,
    /// ARM64
    Arm64,
    /// x64
    X64,
    /// x86
    X86,
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPlatform::AnyCpu => write!(f, "AnyCpu"),
            TargetPlatform::Arm64 => write!(f, "Arm64"),
            TargetPlatform::X64 => write!(f, "X64"),
            TargetPlatform::X86 => write!(f, "X86"),
        }
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anycpu" | "any-cpu" => Ok(TargetPlatform::AnyCpu),
            "arm64" => Ok(TargetPlatform::Arm64),
            "x64" => Ok(TargetPlatform::X64),
            "x86" => Ok(TargetPlatform::X86),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Verbosity forwarded to the build toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildVerbosity {
    /// Quiet output
    Quiet,
    /// Minimal output
    #[default]
    Minimal,
    /// Normal output
    Normal,
    /// Detailed output
    Detailed,
    /// Diagnostic output
    Diagnostic,
}

impl fmt::Display for BuildVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildVerbosity::Quiet => write!(f, "quiet"),
            BuildVerbosity::Minimal => write!(f, "minimal"),
            BuildVerbosity::Normal => write!(f, "normal"),
            BuildVerbosity::Detailed => write!(f, "detailed"),
            BuildVerbosity::Diagnostic => write!(f, "diagnostic"),
        }
    }
}

impl FromStr for BuildVerbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "q" => Ok(BuildVerbosity::Quiet),
            "minimal" | "m" => Ok(BuildVerbosity::Minimal),
            "normal" | "n" => Ok(BuildVerbosity::Normal),
            "detailed" | "d" => Ok(BuildVerbosity::Detailed),
            "diagnostic" | "diag" => Ok(BuildVerbosity::Diagnostic),
            other => Err(format!("unknown verbosity: {other}")),
        }
    }
}

/// Console report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// `KEY=value` lines
    #[default]
    Plain,
    /// No console report
    Silent,
    /// XML document
    Xml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Silent => write!(f, "silent"),
            OutputFormat::Xml => write!(f, "xml"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "plain" => Ok(OutputFormat::Plain),
            "silent" => Ok(OutputFormat::Silent),
            "xml" => Ok(OutputFormat::Xml),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// A resolved username/password pair for registry authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Username presented to the registry
    pub username: String,
    /// Clear-text password or token presented to the registry
    pub password: String,
}

/// Immutable input for one publish run, built once from the CLI plus
/// derived defaults. Optional fields are resolved exactly once by the
/// engine; resolved values never change for the remainder of the run.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    /// GitHub organization; presence selects the GitHub-hosted registry
    pub github_organization: Option<String>,
    /// API key used for pushes (and as a password fallback)
    pub api_key: Option<String>,
    /// Username for registry authentication
    pub username: Option<String>,
    /// Password for registry authentication
    pub password: Option<String>,
    /// Working directory for all toolchain invocations
    pub working_directory: Option<PathBuf>,
    /// Path, relative to the repository root, to the project or solution file
    pub project: Option<String>,
    /// Explicit package name (derived from project metadata when absent)
    pub package_name: Option<String>,
    /// Explicit package version (derived from project metadata when absent)
    pub version: Option<String>,
    /// Path to the nuspec file forwarded to the pack stage
    pub nuspec_file: Option<String>,
    /// Build configuration
    pub configuration: BuildConfiguration,
    /// Target platform
    pub platform: TargetPlatform,
    /// Toolchain verbosity
    pub verbosity: BuildVerbosity,
    /// Scan project metadata for the package name instead of using the file stem
    pub scan_for_package_name: bool,
    /// Write registry credentials into the local configuration before restore
    pub auth_for_build: bool,
    /// Console report format
    pub output: OutputFormat,
    /// Report file path (Bash-style `KEY="value"` lines)
    pub output_file: Option<PathBuf>,
    /// Registry base URL override; when unset the base is derived from
    /// the organization's presence
    pub registry_base: Option<String>,
}

/// A registry endpoint derived from the request. Never persisted;
/// always recomputed as a pure function of the organization (plus an
/// optional explicit base override).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Registry base URL
    pub base_url: String,
    /// Server-wide service index URL (push target)
    pub server_index_url: String,
    /// Source name usable as a configuration key: the base URL with the
    /// scheme stripped and `/` replaced by `.`
    pub source_name: String,
    /// Whether the endpoint is the GitHub-hosted registry
    pub is_github_hosted: bool,
}

impl RegistryEndpoint {
    /// Derive the endpoint from the organization (GitHub-hosted when
    /// present and non-blank, nuget.org otherwise). `base_override`
    /// replaces the derived base URL without changing the hosting flag.
    pub fn derive(organization: Option<&str>, base_override: Option<&str>) -> Self {
        let organization = organization.map(str::trim).filter(|o| !o.is_empty());
        let is_github_hosted = organization.is_some();

        let base_url = match base_override.map(str::trim).filter(|b| !b.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => match organization {
                Some(org) => format!("{GITHUB_NUGET_SERVER}/{org}"),
                None => NUGET_ORG_SERVER.to_string(),
            },
        };

        let server_index_url = if is_github_hosted {
            format!("{base_url}/index.json")
        } else {
            format!("{base_url}/v3/index.json")
        };

        let source_name = base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_ascii_lowercase()
            .replace('/', ".")
            .trim()
            .to_string();

        Self {
            base_url,
            server_index_url,
            source_name,
            is_github_hosted,
        }
    }

    /// URL of the per-package version index document.
    pub fn package_index_url(&self, package_name: &str) -> String {
        format!(
            "{}/{}/index.json",
            self.base_url,
            package_name.trim().to_ascii_lowercase()
        )
    }
}

/// Whether a version is present in the registry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPresence {
    /// The version is already listed in the index
    Found,
    /// The version (or the whole package) is not listed
    NotFound,
}

/// Terminal status of a publish run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// The package was built and pushed
    Published,
    /// The version was already present; nothing was built or pushed
    AlreadyPublished,
    /// The run failed
    Failed,
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStatus::Published => write!(f, "published"),
            PublishStatus::AlreadyPublished => write!(f, "already-published"),
            PublishStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error taxonomy for the publish pipeline. Every variant is terminal:
/// the driver reports the outcome and exits non-zero.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The existing configuration document could not be parsed.
    #[error("configuration document is not valid XML: {detail}")]
    ConfigParse { detail: String },

    /// The registry rejected both the anonymous and the authenticated probe.
    #[error("unable to authenticate with the registry at {url}")]
    Authentication { url: String },

    /// The registry answered with something other than 200/401/404.
    #[error("registry index at {url} is unreachable: {detail}")]
    RegistryUnreachable { url: String, detail: String },

    /// No version was given and none was found in project metadata.
    #[error("unable to find a version")]
    MissingVersion,

    /// No package name was given and every fallback came up empty.
    #[error("unable to find a package name")]
    MissingName,

    /// No project file was given, or the given one does not exist.
    #[error("unable to find project file: {path}")]
    MissingProject { path: String },

    /// The project file could not be read or parsed.
    #[error("unable to parse project file {path}: {detail}")]
    ProjectParse { path: String, detail: String },

    /// A pipeline stage subprocess failed or could not be started.
    #[error("{stage} failed: {message}")]
    Subprocess { stage: String, message: String },

    /// The pack stage produced no artifact in the working directory.
    #[error("unable to find a package to publish in {dir}")]
    NoArtifactProduced { dir: String },

    /// No working directory could be resolved from flag, environment,
    /// or the project path.
    #[error("unable to find a working directory")]
    MissingWorkingDirectory,

    /// The push stage requires an API key and none was given.
    #[error("registry API key not given")]
    MissingApiKey,

    /// Cancellation was requested before the run completed.
    #[error("cancelled before completion")]
    Cancelled,

    /// A filesystem operation failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Cooperative cancellation flag threaded through every pipeline stage.
/// Raising it prevents further stages from launching; reporting still runs.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if cancellation has been requested.
    pub fn ensure_live(&self) -> Result<(), PublishError> {
        if self.is_cancelled() {
            Err(PublishError::Cancelled)
        } else {
            Ok(())
        }
    }
}
