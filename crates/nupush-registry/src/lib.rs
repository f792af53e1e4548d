//! Package index client for nupush.
//!
//! This crate answers one question: is a given version of a package
//! already listed in the registry's version index? The probe starts
//! anonymously and escalates to Basic authentication exactly once on a
//! 401 — credentials are never sent to a registry that did not ask for
//! them, and a second 401 is terminal.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use nupush_types::{Credentials, PublishError, VersionPresence};

/// Default timeout for index requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for index requests
pub const USER_AGENT: &str = concat!("nupush/", env!("CARGO_PKG_VERSION"));

/// The per-package version index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageIndex {
    /// Known versions of the package
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Blocking client for per-package version index lookups.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    /// Create a client with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self { client, timeout }
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check whether `version` is listed in the index at `index_url`.
    ///
    /// - First attempt is anonymous.
    /// - A 401 triggers a single retry with Basic authentication built
    ///   from `credentials`; a 401 with no credentials (or on the
    ///   authorized retry) is a terminal [`PublishError::Authentication`].
    /// - 200 parses the version list; membership decides.
    /// - 404 means the package has no index yet and reads as not-found.
    /// - Anything else is [`PublishError::RegistryUnreachable`].
    pub fn check_version_exists(
        &self,
        index_url: &str,
        version: &str,
        credentials: Option<&Credentials>,
    ) -> Result<VersionPresence, PublishError> {
        self.probe(index_url, version, credentials, false)
    }

    fn probe(
        &self,
        index_url: &str,
        version: &str,
        credentials: Option<&Credentials>,
        authorized: bool,
    ) -> Result<VersionPresence, PublishError> {
        let mut request = self.client.get(index_url);
        if authorized {
            // The registry asked for credentials on the anonymous probe;
            // only now do they go on the wire.
            let creds = credentials.ok_or_else(|| PublishError::Authentication {
                url: index_url.to_string(),
            })?;
            let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
            request = request.header("Authorization", format!("Basic {token}"));
        }

        let response = request.send().map_err(|e| PublishError::RegistryUnreachable {
            url: index_url.to_string(),
            detail: e.to_string(),
        })?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED if !authorized && credentials.is_some() => {
                self.probe(index_url, version, credentials, true)
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(PublishError::Authentication {
                url: index_url.to_string(),
            }),
            reqwest::StatusCode::OK => {
                let index: PackageIndex =
                    response
                        .json()
                        .map_err(|e| PublishError::RegistryUnreachable {
                            url: index_url.to_string(),
                            detail: format!("invalid index document: {e}"),
                        })?;
                if index.versions.iter().any(|v| v == version) {
                    Ok(VersionPresence::Found)
                } else {
                    Ok(VersionPresence::NotFound)
                }
            }
            // No index yet: a brand-new package reads as not-found.
            reqwest::StatusCode::NOT_FOUND => Ok(VersionPresence::NotFound),
            status => Err(PublishError::RegistryUnreachable {
                url: index_url.to_string(),
                detail: format!("unexpected status code: {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tiny_http::{Header, Response, Server, StatusCode};

    use super::*;

    struct StubIndex {
        base_url: String,
        handle: thread::JoinHandle<Vec<bool>>,
    }

    impl StubIndex {
        /// Returns, per request served, whether an Authorization header
        /// was present.
        fn join(self) -> Vec<bool> {
            self.handle.join().expect("join server")
        }
    }

    fn spawn_index(responses: Vec<(u16, &'static str)>) -> StubIndex {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let mut auth_seen = Vec::new();
            for (status, body) in responses {
                let req = server.recv().expect("request");
                auth_seen.push(
                    req.headers()
                        .iter()
                        .any(|h| h.field.equiv("Authorization")),
                );
                let resp = Response::from_string(body)
                    .with_status_code(StatusCode(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
            auth_seen
        });
        StubIndex { base_url, handle }
    }

    fn creds() -> Credentials {
        Credentials {
            username: "octocat".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn index_url(stub: &StubIndex) -> String {
        format!("{}/acme.widgets/index.json", stub.base_url)
    }

    #[test]
    fn listed_version_is_found() {
        let stub = spawn_index(vec![(200, r#"{"versions":["2.2.0","2.3.0"]}"#)]);
        let client = RegistryClient::new();

        let presence = client
            .check_version_exists(&index_url(&stub), "2.3.0", None)
            .expect("probe");
        assert_eq!(presence, VersionPresence::Found);
        assert_eq!(stub.join(), vec![false]);
    }

    #[test]
    fn unlisted_version_is_not_found() {
        let stub = spawn_index(vec![(200, r#"{"versions":["2.2.0"]}"#)]);
        let client = RegistryClient::new();

        let presence = client
            .check_version_exists(&index_url(&stub), "2.3.0", None)
            .expect("probe");
        assert_eq!(presence, VersionPresence::NotFound);
        stub.join();
    }

    #[test]
    fn missing_index_reads_as_not_found() {
        let stub = spawn_index(vec![(404, "")]);
        let client = RegistryClient::new();

        let presence = client
            .check_version_exists(&index_url(&stub), "1.0.0", Some(&creds()))
            .expect("probe");
        assert_eq!(presence, VersionPresence::NotFound);
        // 404 is an answer, not a challenge: no credentials were sent.
        assert_eq!(stub.join(), vec![false]);
    }

    #[test]
    fn challenge_escalates_to_basic_auth_once() {
        let stub = spawn_index(vec![(401, ""), (200, r#"{"versions":["1.0.0"]}"#)]);
        let client = RegistryClient::new();

        let presence = client
            .check_version_exists(&index_url(&stub), "1.0.0", Some(&creds()))
            .expect("probe");
        assert_eq!(presence, VersionPresence::Found);
        // Anonymous first, Basic on the retry.
        assert_eq!(stub.join(), vec![false, true]);
    }

    #[test]
    fn second_challenge_is_terminal() {
        let stub = spawn_index(vec![(401, ""), (401, "")]);
        let client = RegistryClient::new();

        let err = client
            .check_version_exists(&index_url(&stub), "1.0.0", Some(&creds()))
            .expect_err("must fail");
        assert!(matches!(err, PublishError::Authentication { .. }));
        // Exactly two requests — never a third attempt.
        assert_eq!(stub.join(), vec![false, true]);
    }

    #[test]
    fn challenge_without_credentials_is_terminal() {
        let stub = spawn_index(vec![(401, "")]);
        let client = RegistryClient::new();

        let err = client
            .check_version_exists(&index_url(&stub), "1.0.0", None)
            .expect_err("must fail");
        assert!(matches!(err, PublishError::Authentication { .. }));
        assert_eq!(stub.join(), vec![false]);
    }

    #[test]
    fn server_error_is_unreachable() {
        let stub = spawn_index(vec![(500, "")]);
        let client = RegistryClient::new();

        let err = client
            .check_version_exists(&index_url(&stub), "1.0.0", None)
            .expect_err("must fail");
        assert!(matches!(err, PublishError::RegistryUnreachable { .. }));
        stub.join();
    }

    #[test]
    fn malformed_index_is_unreachable() {
        let stub = spawn_index(vec![(200, "not json")]);
        let client = RegistryClient::new();

        let err = client
            .check_version_exists(&index_url(&stub), "1.0.0", None)
            .expect_err("must fail");
        assert!(matches!(err, PublishError::RegistryUnreachable { .. }));
        stub.join();
    }

    #[test]
    fn index_document_tolerates_missing_versions_field() {
        let index: PackageIndex = serde_json::from_str("{}").expect("parse");
        assert!(index.versions.is_empty());
    }

    #[test]
    fn user_agent_includes_version() {
        assert!(USER_AGENT.starts_with("nupush/"));
        assert!(USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
