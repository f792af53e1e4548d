use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;
use tiny_http::{Header, Response, Server, StatusCode};

const CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <PackageId>Acme.Widgets</PackageId>
    <AssemblyName>Acme.Assembly</AssemblyName>
    <Version>2.3.0</Version>
  </PropertyGroup>
</Project>"#;

fn write_project(dir: &Path) {
    fs::write(dir.join("demo.csproj"), CSPROJ).expect("write project");
}

#[cfg(unix)]
fn install_fake_dotnet(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-dotnet");
    fs::write(
        &path,
        r#"#!/usr/bin/env sh
[ -n "$NUPUSH_TEST_LOG" ] && printf '%s\n' "$*" >> "$NUPUSH_TEST_LOG"
case "$1" in
  restore) exit "${FAKE_RESTORE_EXIT:-0}" ;;
  pack)
    out="."
    prev=""
    for a in "$@"; do
      [ "$prev" = "--output" ] && out="$a"
      prev="$a"
    done
    : > "$out/acme.widgets.2.3.0.nupkg"
    ;;
  nuget)
    printf '%s\n' "${FAKE_PUSH_STDOUT:-Your package was pushed.}"
    exit "${FAKE_PUSH_EXIT:-0}" ;;
esac
exit 0
"#,
    )
    .expect("write fake dotnet");
    let mut perms = fs::metadata(&path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

struct TestRegistry {
    base_url: String,
    handle: thread::JoinHandle<()>,
}

impl TestRegistry {
    fn join(self) {
        self.handle.join().expect("join server");
    }
}

fn spawn_registry(responses: Vec<(u16, &'static str)>) -> TestRegistry {
    let server = Server::http("127.0.0.1:0").expect("server");
    let base_url = format!("http://{}", server.server_addr());
    let handle = thread::spawn(move || {
        for (status, body) in responses {
            let req = server.recv().expect("request");
            assert_eq!(req.url(), "/acme.widgets/index.json");
            let resp = Response::from_string(body)
                .with_status_code(StatusCode(status))
                .with_header(
                    Header::from_bytes("Content-Type", "application/json").expect("header"),
                );
            req.respond(resp).expect("respond");
        }
    });
    TestRegistry { base_url, handle }
}

/// A command with the CI environment scrubbed so host variables can't
/// leak into resolution.
fn nupush_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("nupush"));
    for var in [
        "GITHUB_WORKSPACE",
        "GITHUB_ACTOR",
        "GITHUB_TRIGGERING_ACTOR",
        "GITHUB_TOKEN",
        "GITHUB_OUTPUT",
        "NUPUSH_DOTNET_BIN",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn generate_version_prints_bare_version() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());

    nupush_cmd()
        .arg("generate-version")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--working-directory")
        .arg(td.path())
        .assert()
        .success()
        .stdout("2.3.0\n");
}

#[test]
fn generate_package_name_scans_for_package_id() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());

    nupush_cmd()
        .arg("generate-package-name")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--scan-for-package-name")
        .assert()
        .success()
        .stdout("Acme.Widgets\n");
}

#[test]
fn generate_package_name_defaults_to_file_stem() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());

    nupush_cmd()
        .arg("generate-package-name")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--working-directory")
        .arg(td.path())
        .assert()
        .success()
        .stdout("demo\n");
}

#[test]
fn generate_version_without_version_element_fails() {
    let td = tempdir().expect("tempdir");
    fs::write(
        td.path().join("demo.csproj"),
        "<Project><PropertyGroup><AssemblyName>Acme</AssemblyName></PropertyGroup></Project>",
    )
    .expect("write project");

    nupush_cmd()
        .arg("generate-version")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--working-directory")
        .arg(td.path())
        .assert()
        .failure()
        .stderr(contains("unable to find a version"));
}

#[test]
fn generate_configuration_embeds_credentials() {
    let td = tempdir().expect("tempdir");

    nupush_cmd()
        .arg("generate-configuration")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-username")
        .arg("octocat")
        .arg("--nuget-password")
        .arg("s3cret")
        .assert()
        .success()
        .stdout(contains("<packageSourceCredentials>"))
        .stdout(contains("https://api.nuget.org/v3/index.json"))
        .stdout(contains("octocat"));
}

#[test]
fn generate_configuration_alias_gc_works() {
    let td = tempdir().expect("tempdir");

    nupush_cmd()
        .arg("gc")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-username")
        .arg("octocat")
        .arg("--nuget-password")
        .arg("s3cret")
        .arg("--github-organization")
        .arg("acme")
        .assert()
        .success()
        .stdout(contains("nuget.pkg.github.com.acme"))
        .stdout(contains("https://nuget.pkg.github.com/acme/index.json"));
}

#[test]
fn publish_skips_when_version_already_listed() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let registry = spawn_registry(vec![(200, r#"{"versions":["2.2.0","2.3.0"]}"#)]);

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .assert()
        .success()
        .stdout(contains("VERSION=v2.3.0"))
        .stdout(contains("STATUS=already-published"))
        .stderr(contains("existing package found"));

    registry.join();
}

#[test]
fn default_verb_is_publish() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let registry = spawn_registry(vec![(200, r#"{"versions":["2.3.0"]}"#)]);

    // No subcommand: the bare flags drive a publish run.
    nupush_cmd()
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .assert()
        .success()
        .stdout(contains("STATUS=already-published"));

    registry.join();
}

#[cfg(unix)]
#[test]
fn publish_new_version_runs_the_pipeline() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let fake = install_fake_dotnet(td.path());
    let registry = spawn_registry(vec![(200, r#"{"versions":["2.2.0"]}"#)]);

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .env("NUPUSH_DOTNET_BIN", &fake)
        .assert()
        .success()
        .stdout(contains("STATUS=published"))
        .stdout(contains("PACKAGE_NAME=acme.widgets.2.3.0.nupkg"))
        .stderr(contains("pushing"));

    registry.join();
}

#[cfg(unix)]
#[test]
fn publish_with_json_output() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let fake = install_fake_dotnet(td.path());
    let registry = spawn_registry(vec![(404, "")]);

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .arg("--output")
        .arg("json")
        .env("NUPUSH_DOTNET_BIN", &fake)
        .assert()
        .success()
        .stdout(contains("\"version\": \"v2.3.0\""))
        .stdout(contains("\"status\": \"published\""));

    registry.join();
}

#[cfg(unix)]
#[test]
fn publish_failure_still_writes_the_report() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let fake = install_fake_dotnet(td.path());
    let registry = spawn_registry(vec![(404, "")]);

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .env("NUPUSH_DOTNET_BIN", &fake)
        .env("FAKE_RESTORE_EXIT", "1")
        .assert()
        .failure()
        .code(1)
        // The fields resolved before the failure still make the report.
        .stdout(contains("VERSION=v2.3.0"))
        .stdout(contains("STATUS=failed"))
        .stderr(contains("restore failed"));

    registry.join();
}

#[cfg(unix)]
#[test]
fn publish_appends_to_the_output_file() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let fake = install_fake_dotnet(td.path());
    let registry = spawn_registry(vec![(404, "")]);

    let output_file = td.path().join("gha-output");
    fs::write(&output_file, "PRIOR=1\n").expect("seed output file");

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .arg("--registry-base")
        .arg(&registry.base_url)
        .arg("--output")
        .arg("silent")
        .arg("--output-file")
        .arg(&output_file)
        .env("NUPUSH_DOTNET_BIN", &fake)
        .assert()
        .success()
        .stdout("");

    let content = fs::read_to_string(&output_file).expect("read output file");
    assert!(content.starts_with("PRIOR=1\n"));
    assert!(content.contains("VERSION=\"v2.3.0\"\n"));
    assert!(content.contains("STATUS=\"published\"\n"));

    registry.join();
}

#[test]
fn publish_without_api_key_fails_before_the_pipeline() {
    let td = tempdir().expect("tempdir");
    write_project(td.path());
    let registry = spawn_registry(vec![(404, "")]);

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--registry-base")
        .arg(&registry.base_url)
        .assert()
        .failure()
        .stderr(contains("API key not given"));

    registry.join();
}

#[test]
fn publish_with_missing_project_file_fails() {
    let td = tempdir().expect("tempdir");

    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--working-directory")
        .arg(td.path())
        .arg("--nuget-api-key")
        .arg("test-key")
        .assert()
        .failure()
        .stderr(contains("unable to find project file"));
}

#[test]
fn invalid_configuration_value_is_a_usage_error() {
    nupush_cmd()
        .arg("publish")
        .arg("--project")
        .arg("demo.csproj")
        .arg("--scan-for-package-name")
        .arg("--configuration")
        .arg("bogus")
        .assert()
        .failure()
        .stderr(contains("unknown build configuration"));
}
