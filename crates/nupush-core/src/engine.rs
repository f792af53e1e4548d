use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use nupush_process::CommandResult;
use nupush_project::ProjectMetadata;
use nupush_registry::RegistryClient;
use nupush_types::{
    CancelFlag, Credentials, PublishError, PublishRequest, PublishStatus, RegistryEndpoint,
    VersionPresence,
};

use crate::outcome::{PipelineStage, PublishOutcome};

/// CI workspace directory fallback for the working directory.
pub const WORKSPACE_ENV: &str = "GITHUB_WORKSPACE";

/// CI actor fallbacks for the registry username, in precedence order.
pub const ACTOR_ENVS: [&str; 2] = ["GITHUB_ACTOR", "GITHUB_TRIGGERING_ACTOR"];

/// CI token fallback for the registry password.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Progress sink threaded through every stage. The CLI renders these as
/// severity-prefixed stderr lines; stdout stays reserved for the report.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Working directory and project file, resolved once per run.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    /// Directory every toolchain invocation runs in
    pub working_directory: PathBuf,
    /// Project path as given (relative to the working directory)
    pub project: String,
    /// Absolute project file path
    pub project_file: PathBuf,
}

fn env_non_blank(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve the working directory: explicit flag, then the CI workspace
/// variable, then the directory containing the project file.
pub fn resolve_working_directory(request: &PublishRequest) -> Result<PathBuf, PublishError> {
    if let Some(dir) = &request.working_directory {
        let trimmed = dir.as_os_str().to_string_lossy();
        let trimmed = trimmed.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Some(workspace) = env_non_blank(WORKSPACE_ENV) {
        return Ok(PathBuf::from(workspace));
    }

    if let Some(parent) = request
        .project
        .as_deref()
        .map(Path::new)
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Ok(parent.to_path_buf());
    }

    Err(PublishError::MissingWorkingDirectory)
}

/// Resolve the working directory and locate the project file inside it.
pub fn resolve_context(request: &PublishRequest) -> Result<ResolvedContext, PublishError> {
    let working_directory = resolve_working_directory(request)?;

    let project = non_blank(request.project.as_deref()).ok_or_else(|| {
        PublishError::MissingProject {
            path: "<none>".to_string(),
        }
    })?;

    let project_file = working_directory.join(&project);
    if !project_file.is_file() {
        return Err(PublishError::MissingProject {
            path: project_file.display().to_string(),
        });
    }

    Ok(ResolvedContext {
        working_directory,
        project,
        project_file,
    })
}

/// Resolve the package name: explicit flag, then (when scanning is
/// enabled) `PackageId` and `AssemblyName` from project metadata, then
/// the project file's base name.
pub fn resolve_package_name(
    request: &PublishRequest,
    metadata: &ProjectMetadata,
    project_file: &Path,
) -> Result<String, PublishError> {
    if let Some(name) = non_blank(request.package_name.as_deref()) {
        return Ok(name);
    }

    if request.scan_for_package_name
        && let Some(name) = non_blank(metadata.package_id.as_deref())
            .or_else(|| non_blank(metadata.assembly_name.as_deref()))
    {
        return Ok(name);
    }

    project_file
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(PublishError::MissingName)
}

/// Resolve the package version: explicit flag, then the project
/// metadata's `Version` element. Absence is fatal.
pub fn resolve_version(
    request: &PublishRequest,
    metadata: &ProjectMetadata,
) -> Result<String, PublishError> {
    non_blank(request.version.as_deref())
        .or_else(|| non_blank(metadata.version.as_deref()))
        .ok_or(PublishError::MissingVersion)
}

/// Resolve registry credentials: explicit flags first, CI identity and
/// token variables as fallbacks. Returns `None` unless both halves are
/// present — Basic auth needs the pair.
pub fn resolve_credentials(request: &PublishRequest) -> Option<Credentials> {
    let username = non_blank(request.username.as_deref())
        .or_else(|| ACTOR_ENVS.iter().find_map(|name| env_non_blank(name)))?;

    let password = non_blank(request.password.as_deref())
        .or_else(|| non_blank(request.api_key.as_deref()))
        .or_else(|| env_non_blank(TOKEN_ENV))?;

    Some(Credentials { username, password })
}

/// Run the full publish flow. The outcome is returned on every exit
/// path — success, skip, failure, or cancellation — so the caller can
/// always write the report before deciding the exit code.
pub fn run_publish(
    request: &PublishRequest,
    cancel: &CancelFlag,
    reporter: &mut dyn Reporter,
) -> (PublishOutcome, Result<PublishStatus, PublishError>) {
    let mut outcome = PublishOutcome::new();
    let result = drive_publish(request, cancel, reporter, &mut outcome);

    outcome.finished_at = Some(Utc::now());
    outcome.status = Some(match &result {
        Ok(status) => *status,
        Err(_) => PublishStatus::Failed,
    });

    (outcome, result)
}

fn drive_publish(
    request: &PublishRequest,
    cancel: &CancelFlag,
    reporter: &mut dyn Reporter,
    outcome: &mut PublishOutcome,
) -> Result<PublishStatus, PublishError> {
    cancel.ensure_live()?;

    let ctx = resolve_context(request)?;
    reporter.info(&format!(
        "using working directory: {}",
        ctx.working_directory.display()
    ));
    reporter.info(&format!("using project file: {}", ctx.project_file.display()));

    let metadata = nupush_project::load_project(&ctx.project_file)?;

    let version = resolve_version(request, &metadata)?;
    outcome.version = Some(format!("v{version}"));
    reporter.info(&format!("using version: {version}"));

    let package_name = resolve_package_name(request, &metadata, &ctx.project_file)?;
    reporter.info(&format!("using package name: {package_name}"));

    let credentials = resolve_credentials(request);
    let endpoint = RegistryEndpoint::derive(
        request.github_organization.as_deref(),
        request.registry_base.as_deref(),
    );

    cancel.ensure_live()?;
    let index_url = endpoint.package_index_url(&package_name);
    reporter.info(&format!(
        "checking for updates to {package_name} v{version} at {index_url}"
    ));

    let presence =
        RegistryClient::new().check_version_exists(&index_url, &version, credentials.as_ref())?;
    if presence == VersionPresence::Found {
        reporter.info(&format!(
            "existing package found for {package_name} v{version}; nothing to publish"
        ));
        return Ok(PublishStatus::AlreadyPublished);
    }
    reporter.info(&format!(
        "no existing package found for {package_name} v{version}"
    ));

    run_pipeline(
        request,
        &ctx,
        &endpoint,
        credentials.as_ref(),
        &package_name,
        &version,
        cancel,
        reporter,
        outcome,
    )?;

    Ok(PublishStatus::Published)
}

fn stage_failure(stage: PipelineStage, result: &CommandResult) -> PublishError {
    PublishError::Subprocess {
        stage: stage.name().to_string(),
        message: format!(
            "process exited with code {:?}: {}",
            result.exit_code,
            result.failure_output().trim()
        ),
    }
}

fn run_stage(
    stage: PipelineStage,
    args: &[String],
    working_directory: &Path,
    outcome: &mut PublishOutcome,
) -> Result<CommandResult, PublishError> {
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let result = nupush_process::run_dotnet(&arg_refs, working_directory).map_err(|e| {
        PublishError::Subprocess {
            stage: stage.name().to_string(),
            message: e.to_string(),
        }
    })?;
    // Captured regardless of exit code; the fatal check comes after.
    outcome.record_stage(stage, &result.stdout, &result.stderr);
    Ok(result)
}

fn artifacts_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, PublishError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    Ok(files)
}

fn write_build_auth_config(
    ctx: &ResolvedContext,
    endpoint: &RegistryEndpoint,
    credentials: &Credentials,
    outcome: &mut PublishOutcome,
    reporter: &mut dyn Reporter,
) -> Result<PathBuf, PublishError> {
    let path = nupush_config::config_path(&ctx.working_directory);
    let existing = nupush_config::read_existing(&path)?;

    reporter.info(&if existing.is_some() {
        format!("existing registry configuration found at {}", path.display())
    } else {
        format!("generating new registry configuration at {}", path.display())
    });

    let merged = nupush_config::merge(existing.as_deref(), endpoint, credentials)?;
    std::fs::write(&path, &merged)?;
    outcome.nuget_config = Some(merged);
    Ok(path)
}

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)error.*").expect("static pattern"))
}

/// A failing push whose output talks about an existing package is a lost
/// race, not a failure: the version check already confirmed absence, so
/// another writer beat this run to it.
fn push_output_indicates_duplicate(result: &CommandResult) -> bool {
    let haystack = format!("{}\n{}", result.stdout, result.stderr).to_ascii_lowercase();
    ["already exists", "409", "conflict", "duplicate"]
        .iter()
        .any(|needle| haystack.contains(needle))
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    request: &PublishRequest,
    ctx: &ResolvedContext,
    endpoint: &RegistryEndpoint,
    credentials: Option<&Credentials>,
    package_name: &str,
    version: &str,
    cancel: &CancelFlag,
    reporter: &mut dyn Reporter,
    outcome: &mut PublishOutcome,
) -> Result<(), PublishError> {
    let api_key = non_blank(request.api_key.as_deref()).ok_or(PublishError::MissingApiKey)?;

    reporter.info(&format!("found new version (v{version}) of {package_name}"));
    reporter.info(&format!("using registry: {}", endpoint.base_url));

    let config_file = if request.auth_for_build {
        match credentials {
            Some(creds) => Some(write_build_auth_config(ctx, endpoint, creds, outcome, reporter)?),
            None => {
                reporter.warn(
                    "no registry authentication information provided; skipping build \
                     authentication (this may break the restore stage)",
                );
                None
            }
        }
    } else {
        reporter.info("skipping registry build authentication");
        None
    };

    let workdir = &ctx.working_directory;
    let platform_prop = format!("-property:Platform={}", request.platform);
    let configuration = request.configuration.to_string();
    let verbosity = request.verbosity.to_string();

    // restore
    cancel.ensure_live()?;
    reporter.info(&format!("restoring {package_name} v{version}"));
    let mut restore_args = vec!["restore".to_string(), ctx.project.clone()];
    if let Some(config_file) = &config_file {
        restore_args.push("--configfile".to_string());
        restore_args.push(config_file.display().to_string());
    }
    restore_args.extend(["--no-cache".to_string(), "--verbosity".to_string(), verbosity.clone()]);
    let result = run_stage(PipelineStage::Restore, &restore_args, workdir, outcome)?;
    if !result.success {
        return Err(stage_failure(PipelineStage::Restore, &result));
    }

    // clean
    cancel.ensure_live()?;
    reporter.info(&format!("cleaning {package_name} v{version}"));
    let clean_args = vec![
        "clean".to_string(),
        ctx.project.clone(),
        platform_prop.clone(),
        "--configuration".to_string(),
        configuration.clone(),
    ];
    let result = run_stage(PipelineStage::Clean, &clean_args, workdir, outcome)?;
    if !result.success {
        return Err(stage_failure(PipelineStage::Clean, &result));
    }

    // stale artifacts from previous packs would shadow the fresh one
    cancel.ensure_live()?;
    reporter.info(&format!(
        "cleaning old package artifacts for {package_name} v{version}"
    ));
    for ext in ["nupkg", "snupkg"] {
        for file in artifacts_with_ext(workdir, ext)? {
            reporter.info(&format!("deleting old package artifact: {}", file.display()));
            std::fs::remove_file(&file)?;
        }
    }

    // build
    cancel.ensure_live()?;
    reporter.info(&format!("building {package_name} v{version}"));
    let build_args = vec![
        "build".to_string(),
        ctx.project.clone(),
        platform_prop.clone(),
        "--configuration".to_string(),
        configuration.clone(),
        "--no-restore".to_string(),
    ];
    let result = run_stage(PipelineStage::Build, &build_args, workdir, outcome)?;
    if !result.success {
        return Err(stage_failure(PipelineStage::Build, &result));
    }

    // pack
    cancel.ensure_live()?;
    reporter.info(&format!("packing {package_name} v{version}"));
    let mut pack_args = vec!["pack".to_string(), ctx.project.clone()];
    if let Some(nuspec) = non_blank(request.nuspec_file.as_deref()) {
        pack_args.push(format!("-property:NuspecFile={nuspec}"));
    }
    pack_args.extend([
        platform_prop,
        "--configuration".to_string(),
        configuration,
        "--nologo".to_string(),
        "--no-build".to_string(),
        "--no-restore".to_string(),
        "--output".to_string(),
        workdir.display().to_string(),
        "--verbosity".to_string(),
        verbosity,
    ]);
    let result = run_stage(PipelineStage::Pack, &pack_args, workdir, outcome)?;
    if !result.success {
        return Err(stage_failure(PipelineStage::Pack, &result));
    }

    let artifact = artifacts_with_ext(workdir, "nupkg")?
        .into_iter()
        .next()
        .ok_or_else(|| PublishError::NoArtifactProduced {
            dir: workdir.display().to_string(),
        })?;
    reporter.info(&format!("generated: {}", artifact.display()));

    let artifact_name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| PublishError::NoArtifactProduced {
            dir: workdir.display().to_string(),
        })?;
    outcome.package_name = Some(artifact_name.clone());
    outcome.package_path = Some(
        artifact
            .canonicalize()
            .unwrap_or_else(|_| artifact.clone())
            .display()
            .to_string(),
    );

    // push
    cancel.ensure_live()?;
    reporter.info(&format!("pushing {package_name} v{version}"));
    let push_args = vec![
        "nuget".to_string(),
        "push".to_string(),
        artifact_name,
        "--source".to_string(),
        endpoint.server_index_url.clone(),
        "--api-key".to_string(),
        api_key,
        "--skip-duplicate".to_string(),
        "--no-symbols".to_string(),
    ];
    let result = run_stage(PipelineStage::Push, &push_args, workdir, outcome)?;

    if !result.success {
        if push_output_indicates_duplicate(&result) {
            reporter.warn("push reported an existing package; treating as already published");
            return Ok(());
        }
        return Err(stage_failure(PipelineStage::Push, &result));
    }

    // The push tool reports some failures with a zero exit code; surface
    // any error-looking line after the outputs are recorded.
    if let Some(m) = error_line_regex().find(&result.stdout) {
        return Err(PublishError::Subprocess {
            stage: PipelineStage::Push.name().to_string(),
            message: m.as_str().trim().to_string(),
        });
    }

    Ok(())
}

/// Generate the registry configuration document for the resolved
/// working directory without writing it: the existing file (if any) is
/// merged with the endpoint's source and the resolved credentials.
pub fn generate_configuration(request: &PublishRequest) -> Result<String, PublishError> {
    let working_directory = resolve_working_directory(request)?;
    let path = nupush_config::config_path(&working_directory);
    let existing = nupush_config::read_existing(&path)?;

    let credentials = resolve_credentials(request).unwrap_or(Credentials {
        username: String::new(),
        password: String::new(),
    });
    let endpoint = RegistryEndpoint::derive(
        request.github_organization.as_deref(),
        request.registry_base.as_deref(),
    );

    nupush_config::merge(existing.as_deref(), &endpoint, &credentials)
}

/// Derive the package name from the project file (scan honored).
pub fn generate_package_name(request: &PublishRequest) -> Result<String, PublishError> {
    let ctx = resolve_context(request)?;
    let metadata = nupush_project::load_project(&ctx.project_file)?;
    resolve_package_name(request, &metadata, &ctx.project_file)
}

/// Derive the bare (un-prefixed) package version from the project file.
pub fn generate_version(request: &PublishRequest) -> Result<String, PublishError> {
    let ctx = resolve_context(request)?;
    let metadata = nupush_project::load_project(&ctx.project_file)?;
    resolve_version(request, &metadata)
}
