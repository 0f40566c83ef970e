use std::io::Read;
use std::time::Duration;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use crate::cache::EntryKind;
use crate::error::{Result, SyncError};

/// Repository used when neither the command line nor the project config names one.
pub const DEFAULT_REPOSITORY: &str = "guidekit-dev/guides";

/// The network boundary: release metadata and archive download.
///
/// Implementations perform exactly one attempt per call; retry policy is the caller's.
pub trait RemoteSource {
    /// Human-readable name of the remote, used in errors and logs.
    fn describe(&self) -> String;

    /// Tag of the most recent published release, or `None` if the repository has none.
    fn latest_release(&self) -> Result<Option<String>>;

    /// Name of the repository's default branch.
    fn default_branch(&self) -> Result<String>;

    /// Opens a gzip tarball of the tree at `label`.
    fn open_archive(&self, label: &str, kind: EntryKind) -> Result<Box<dyn Read>>;
}

#[derive(Deserialize)]
struct GitHubRelease {
    tag_name: String,
}

#[derive(Deserialize)]
struct GitHubRepo {
    default_branch: String,
}

/// A GitHub repository reached over HTTPS.
pub struct GitHubSource {
    client: Client,
    repo: String,
    api_base: String,
    web_base: String,
}

impl GitHubSource {
    /// `repo` is `owner/name`. Every request, including reading the body, is
    /// bounded by `timeout`.
    pub fn new(repo: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("guidekit/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|cause| SyncError::Network {
                remote: repo.to_string(),
                action: "building the HTTP client".to_string(),
                cause,
            })?;
        Ok(Self {
            client,
            repo: repo.trim_matches('/').to_string(),
            api_base: "https://api.github.com".to_string(),
            web_base: "https://github.com".to_string(),
        })
    }

    /// Points the source at a GitHub Enterprise style host.
    pub fn with_hosts(mut self, api_base: &str, web_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.web_base = web_base.trim_end_matches('/').to_string();
        self
    }

    pub fn archive_url(&self, label: &str, kind: EntryKind) -> String {
        let refs = match kind {
            EntryKind::Tag => "tags",
            EntryKind::Branch => "heads",
        };
        format!(
            "{}/{}/archive/refs/{}/{}.tar.gz",
            self.web_base, self.repo, refs, label
        )
    }

    fn get(&self, url: &str, action: &str) -> Result<reqwest::blocking::Response> {
        debug!(url, "GET");
        self.client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|cause| SyncError::Network {
                remote: self.describe(),
                action: action.to_string(),
                cause,
            })
    }
}

fn expect_success(url: &str, response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    if !response.status().is_success() {
        return Err(SyncError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

impl RemoteSource for GitHubSource {
    fn describe(&self) -> String {
        format!("github.com/{}", self.repo)
    }

    fn latest_release(&self) -> Result<Option<String>> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, self.repo);
        let response = self.get(&url, "querying the latest release")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let release: GitHubRelease = expect_success(&url, response)?
            .json()
            .map_err(|cause| SyncError::Network {
                remote: self.describe(),
                action: "decoding release metadata".to_string(),
                cause,
            })?;
        Ok(Some(release.tag_name))
    }

    fn default_branch(&self) -> Result<String> {
        let url = format!("{}/repos/{}", self.api_base, self.repo);
        let response = self.get(&url, "querying repository metadata")?;
        let repo: GitHubRepo = expect_success(&url, response)?
            .json()
            .map_err(|cause| SyncError::Network {
                remote: self.describe(),
                action: "decoding repository metadata".to_string(),
                cause,
            })?;
        Ok(repo.default_branch)
    }

    fn open_archive(&self, label: &str, kind: EntryKind) -> Result<Box<dyn Read>> {
        let url = self.archive_url(label, kind);
        let response = self.get(&url, "downloading the archive")?;
        Ok(Box::new(expect_success(&url, response)?))
    }
}
