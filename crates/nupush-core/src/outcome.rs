use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nupush_config::{Element, render_element};
use nupush_types::{OutputFormat, PublishError, PublishStatus};

/// Accumulated results of one publish run. Fields are written once as
/// each stage completes and the whole model is serialized exactly once
/// at process end, on every exit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    /// Rendered registry configuration, when build authentication ran
    pub nuget_config: Option<String>,
    /// File name of the packed artifact
    pub package_name: Option<String>,
    /// Absolute path of the packed artifact
    pub package_path: Option<String>,
    /// Standard error of the build stage
    pub process_build_error: Option<String>,
    /// Standard output of the build stage
    pub process_build_output: Option<String>,
    /// Standard error of the clean stage
    pub process_clean_error: Option<String>,
    /// Standard output of the clean stage
    pub process_clean_output: Option<String>,
    /// Standard error of the pack stage
    pub process_pack_error: Option<String>,
    /// Standard output of the pack stage
    pub process_pack_output: Option<String>,
    /// Standard error of the push stage
    pub process_push_error: Option<String>,
    /// Standard output of the push stage
    pub process_push_output: Option<String>,
    /// Standard error of the restore stage
    pub process_restore_error: Option<String>,
    /// Standard output of the restore stage
    pub process_restore_output: Option<String>,
    /// Terminal status of the run
    pub status: Option<PublishStatus>,
    /// Resolved package version, `v`-prefixed
    pub version: Option<String>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished (reporting time)
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for PublishOutcome {
    fn default() -> Self {
        Self::new()
    }
}

/// A captured pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Restore,
    Clean,
    Build,
    Pack,
    Push,
}

impl PipelineStage {
    /// Stage name as it appears in errors and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Restore => "restore",
            PipelineStage::Clean => "clean",
            PipelineStage::Build => "build",
            PipelineStage::Pack => "pack",
            PipelineStage::Push => "push",
        }
    }
}

impl PublishOutcome {
    /// Create an empty outcome stamped with the start time.
    pub fn new() -> Self {
        Self {
            nuget_config: None,
            package_name: None,
            package_path: None,
            process_build_error: None,
            process_build_output: None,
            process_clean_error: None,
            process_clean_output: None,
            process_pack_error: None,
            process_pack_output: None,
            process_push_error: None,
            process_push_output: None,
            process_restore_error: None,
            process_restore_output: None,
            status: None,
            version: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a stage's captured output, regardless of its exit code.
    pub fn record_stage(&mut self, stage: PipelineStage, stdout: &str, stderr: &str) {
        let (out_slot, err_slot) = match stage {
            PipelineStage::Restore => {
                (&mut self.process_restore_output, &mut self.process_restore_error)
            }
            PipelineStage::Clean => {
                (&mut self.process_clean_output, &mut self.process_clean_error)
            }
            PipelineStage::Build => {
                (&mut self.process_build_output, &mut self.process_build_error)
            }
            PipelineStage::Pack => {
                (&mut self.process_pack_output, &mut self.process_pack_error)
            }
            PipelineStage::Push => {
                (&mut self.process_push_output, &mut self.process_push_error)
            }
        };
        *out_slot = Some(stdout.to_string());
        *err_slot = Some(stderr.to_string());
    }

    /// The explicit field → output-key table, in key order. This is the
    /// single source of truth for the plain and file report formats.
    pub fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("NUGET_CONFIG", self.nuget_config.clone()),
            ("PACKAGE_NAME", self.package_name.clone()),
            ("PACKAGE_PATH", self.package_path.clone()),
            ("PROCESS_BUILD_ERROR", self.process_build_error.clone()),
            ("PROCESS_BUILD_OUTPUT", self.process_build_output.clone()),
            ("PROCESS_CLEAN_ERROR", self.process_clean_error.clone()),
            ("PROCESS_CLEAN_OUTPUT", self.process_clean_output.clone()),
            ("PROCESS_PACK_ERROR", self.process_pack_error.clone()),
            ("PROCESS_PACK_OUTPUT", self.process_pack_output.clone()),
            ("PROCESS_PUSH_ERROR", self.process_push_error.clone()),
            ("PROCESS_PUSH_OUTPUT", self.process_push_output.clone()),
            ("PROCESS_RESTORE_ERROR", self.process_restore_error.clone()),
            ("PROCESS_RESTORE_OUTPUT", self.process_restore_output.clone()),
            ("STATUS", self.status.map(|s| s.to_string())),
            ("VERSION", self.version.clone()),
        ]
    }

    /// Render the console report; `Silent` renders nothing.
    pub fn render(&self, format: OutputFormat) -> Result<Option<String>, PublishError> {
        match format {
            OutputFormat::Silent => Ok(None),
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| PublishError::Io(std::io::Error::other(e)))?;
                Ok(Some(json))
            }
            OutputFormat::Plain => {
                let mut lines = String::new();
                for (key, value) in self.fields() {
                    let value = value.unwrap_or_default();
                    lines.push_str(&format!("{key}={}\n\n", value.trim()));
                }
                Ok(Some(lines))
            }
            OutputFormat::Xml => {
                let mut root = Element::new("output");
                let mut push = |name: &str, value: &Option<String>| {
                    if let Some(value) = value {
                        root.children
                            .push(nupush_config::Node::Element(Element::with_text(name, value)));
                    }
                };
                push("nugetConfig", &self.nuget_config);
                push("packageName", &self.package_name);
                push("packagePath", &self.package_path);
                push("processBuildError", &self.process_build_error);
                push("processBuildOutput", &self.process_build_output);
                push("processCleanError", &self.process_clean_error);
                push("processCleanOutput", &self.process_clean_output);
                push("processPackError", &self.process_pack_error);
                push("processPackOutput", &self.process_pack_output);
                push("processPushError", &self.process_push_error);
                push("processPushOutput", &self.process_push_output);
                push("processRestoreError", &self.process_restore_error);
                push("processRestoreOutput", &self.process_restore_output);
                push("status", &self.status.map(|s| s.to_string()));
                push("version", &self.version);
                Ok(Some(render_element(&root)?))
            }
        }
    }

    /// Append the outcome to a Bash-style output file (`KEY="value"`
    /// lines, embedded newlines encoded). Writes only when the file
    /// already exists — in CI the collector creates it — and is
    /// independent of the console format.
    pub fn write_output_file(&self, path: &Path) -> Result<(), PublishError> {
        if !path.exists() {
            return Ok(());
        }

        let mut lines = String::new();
        for (key, value) in self.fields() {
            let value = value.unwrap_or_default();
            lines.push_str(&format!("{key}={}\n", encode_file_value(&value)));
        }

        let mut existing = std::fs::read_to_string(path)?;
        existing.push_str(&lines);
        std::fs::write(path, existing)?;
        Ok(())
    }
}

/// Quote a value for the Bash-style output file. Embedded newlines are
/// spliced out of the quotes as `$'\n'` so multi-line process output
/// survives a `source`.
pub fn encode_file_value(raw: &str) -> String {
    format!("\"{}\"", raw.trim().replace('\n', "\"$'\\n'\""))
}
