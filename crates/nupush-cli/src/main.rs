use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use nupush_core::engine::{self, Reporter};
use nupush_core::outcome::PublishOutcome;
use nupush_types::{
    BuildConfiguration, BuildVerbosity, CancelFlag, OutputFormat, PublishRequest, TargetPlatform,
};

#[derive(Parser, Debug)]
#[command(name = "nupush")]
#[command(about = "Idempotent NuGet package publishing for CI pipelines")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    // Bare invocation defaults to `publish`.
    #[command(flatten)]
    publish: PublishArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, pack, and push <project> to the registry (default).
    #[command(visible_alias = "p")]
    Publish(PublishArgs),

    /// Generate a registry configuration file with embedded credentials.
    #[command(name = "generate-configuration", visible_aliases = ["get-config", "gc"])]
    GenerateConfiguration(GenerateConfigurationArgs),

    /// Print the package name derived from the project file.
    #[command(name = "generate-package-name")]
    GeneratePackageName(GeneratePackageNameArgs),

    /// Print the package version derived from the project file.
    #[command(name = "generate-version")]
    GenerateVersion(GenerateVersionArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct PublishArgs {
    /// Path, relative to the repository root, to the project or solution file to package.
    #[arg(long)]
    project: Option<String>,

    /// API key used to authenticate pushes to the registry.
    #[arg(long = "nuget-api-key")]
    nuget_api_key: Option<String>,

    /// GitHub organization to publish to; forces the GitHub-hosted registry.
    #[arg(long = "github-organization")]
    github_organization: Option<String>,

    /// Username for registry authentication (falls back to the CI actor).
    #[arg(long = "nuget-username")]
    nuget_username: Option<String>,

    /// Password for registry authentication (falls back to the API key, then the CI token).
    #[arg(long = "nuget-password")]
    nuget_password: Option<String>,

    /// Working directory for the build (defaults to the CI workspace or the project's directory).
    #[arg(long = "working-directory")]
    working_directory: Option<PathBuf>,

    /// Name of the package to publish (derived from project metadata when omitted).
    #[arg(long = "package-name")]
    package_name: Option<String>,

    /// Static version for the package (derived from project metadata when omitted).
    #[arg(long)]
    version: Option<String>,

    /// Path, relative to the repository root, to the nuspec file.
    #[arg(long = "nuspec-file")]
    nuspec_file: Option<String>,

    /// Build configuration (debug|release).
    #[arg(long, default_value = "release")]
    configuration: BuildConfiguration,

    /// Target platform (any-cpu|arm64|x64|x86).
    #[arg(long, default_value = "any-cpu")]
    platform: TargetPlatform,

    /// Output level for the build toolchain.
    #[arg(long, default_value = "minimal")]
    verbosity: BuildVerbosity,

    /// Scan the project file for the package name, preferring PackageId
    /// over AssemblyName over the project file's base name.
    #[arg(long = "scan-for-package-name")]
    scan_for_package_name: bool,

    /// Write registry credentials into the local configuration before the restore stage.
    #[arg(long = "nuget-auth-for-build")]
    nuget_auth_for_build: bool,

    /// Console report format (json|plain|silent|xml).
    #[arg(long, default_value = "plain")]
    output: OutputFormat,

    /// Report file for Bash-style `KEY="value"` lines (defaults to $GITHUB_OUTPUT).
    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,

    /// Registry base URL override (defaults follow --github-organization).
    #[arg(long = "registry-base")]
    registry_base: Option<String>,
}

impl PublishArgs {
    fn to_request(&self) -> PublishRequest {
        PublishRequest {
            github_organization: self.github_organization.clone(),
            api_key: self.nuget_api_key.clone(),
            username: self.nuget_username.clone(),
            password: self.nuget_password.clone(),
            working_directory: self.working_directory.clone(),
            project: self.project.clone(),
            package_name: self.package_name.clone(),
            version: self.version.clone(),
            nuspec_file: self.nuspec_file.clone(),
            configuration: self.configuration,
            platform: self.platform,
            verbosity: self.verbosity,
            scan_for_package_name: self.scan_for_package_name,
            auth_for_build: self.nuget_auth_for_build,
            output: self.output,
            output_file: self.output_file.clone().or_else(default_output_file),
            registry_base: self.registry_base.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct GenerateConfigurationArgs {
    /// GitHub organization to publish to; forces the GitHub-hosted registry.
    #[arg(long = "github-organization")]
    github_organization: Option<String>,

    /// API key; used as a password source when no password is given.
    #[arg(long = "nuget-api-key")]
    nuget_api_key: Option<String>,

    /// Username for registry authentication (falls back to the CI actor).
    #[arg(long = "nuget-username")]
    nuget_username: Option<String>,

    /// Password for registry authentication (falls back to the API key, then the CI token).
    #[arg(long = "nuget-password")]
    nuget_password: Option<String>,

    /// Working directory holding the configuration file (defaults to the CI workspace).
    #[arg(long = "working-directory")]
    working_directory: Option<PathBuf>,

    /// Registry base URL override (defaults follow --github-organization).
    #[arg(long = "registry-base")]
    registry_base: Option<String>,
}

impl GenerateConfigurationArgs {
    fn to_request(&self) -> PublishRequest {
        PublishRequest {
            github_organization: self.github_organization.clone(),
            api_key: self.nuget_api_key.clone(),
            username: self.nuget_username.clone(),
            password: self.nuget_password.clone(),
            working_directory: self.working_directory.clone(),
            registry_base: self.registry_base.clone(),
            output: OutputFormat::Silent,
            ..PublishRequest::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
struct GeneratePackageNameArgs {
    /// Path, relative to the repository root, to the project or solution file.
    #[arg(long)]
    project: String,

    /// Scan the project file, preferring PackageId over AssemblyName.
    #[arg(long = "scan-for-package-name")]
    scan_for_package_name: bool,

    /// Working directory (defaults to the CI workspace or the project's directory).
    #[arg(long = "working-directory")]
    working_directory: Option<PathBuf>,
}

impl GeneratePackageNameArgs {
    fn to_request(&self) -> PublishRequest {
        PublishRequest {
            project: Some(self.project.clone()),
            scan_for_package_name: self.scan_for_package_name,
            working_directory: self.working_directory.clone(),
            output: OutputFormat::Silent,
            ..PublishRequest::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
struct GenerateVersionArgs {
    /// Path, relative to the repository root, to the project or solution file.
    #[arg(long)]
    project: String,

    /// Working directory (defaults to the CI workspace or the project's directory).
    #[arg(long = "working-directory")]
    working_directory: Option<PathBuf>,
}

impl GenerateVersionArgs {
    fn to_request(&self) -> PublishRequest {
        PublishRequest {
            project: Some(self.project.clone()),
            working_directory: self.working_directory.clone(),
            output: OutputFormat::Silent,
            ..PublishRequest::default()
        }
    }
}

fn default_output_file() -> Option<PathBuf> {
    std::env::var("GITHUB_OUTPUT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match run(cli, &mut reporter) {
        Ok(code) => code,
        Err(err) => {
            reporter.error(&format!("unable to continue: {err}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, reporter: &mut CliReporter) -> Result<ExitCode> {
    let command = cli.command.unwrap_or(Commands::Publish(cli.publish));

    match command {
        Commands::Publish(args) => run_publish(&args, reporter),
        Commands::GenerateConfiguration(args) => {
            let rendered = engine::generate_configuration(&args.to_request())?;
            print_document(&rendered);
            Ok(ExitCode::SUCCESS)
        }
        Commands::GeneratePackageName(args) => {
            let name = engine::generate_package_name(&args.to_request())?;
            println!("{name}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::GenerateVersion(args) => {
            let version = engine::generate_version(&args.to_request())?;
            println!("{version}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_publish(args: &PublishArgs, reporter: &mut CliReporter) -> Result<ExitCode> {
    let request = args.to_request();
    let cancel = CancelFlag::new();

    let (outcome, result) = engine::run_publish(&request, &cancel, reporter);

    // The report is written on every exit path, before the exit code is
    // decided; a report failure downgrades to a warning so it can never
    // mask the publish result.
    write_report(&outcome, &request, reporter);

    match result {
        Ok(status) => {
            reporter.info(&format!("action complete: {status}"));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            reporter.error(&err.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn write_report(outcome: &PublishOutcome, request: &PublishRequest, reporter: &mut CliReporter) {
    reporter.info("writing outputs");

    if let Some(path) = &request.output_file
        && let Err(err) = outcome.write_output_file(path)
    {
        reporter.warn(&format!(
            "unable to write output file {}: {err}",
            path.display()
        ));
    }

    match outcome.render(request.output) {
        Ok(Some(rendered)) => print_document(&rendered),
        Ok(None) => {}
        Err(err) => reporter.warn(&format!("unable to render report: {err}")),
    }
}

fn print_document(rendered: &str) {
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
}
