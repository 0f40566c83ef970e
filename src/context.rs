use std::path::{Path, PathBuf};
use std::time::Duration;
use directories::ProjectDirs;
use crate::config::CONFIG_FILE;
use crate::error::{Result, SyncError};
use crate::remote::DEFAULT_REPOSITORY;

/// Default bound on a single archive download.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the core needs to know about where it runs. Built once per
/// invocation and handed to the downloader, extractor and tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub project_root: PathBuf,
    pub cache_root: PathBuf,
    pub config_path: PathBuf,
    pub repository: String,
    pub timeout: Duration,
}

impl Context {
    /// A context for `project_root` with an explicit cache directory.
    pub fn new(project_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            config_path: project_root.join(CONFIG_FILE),
            project_root,
            cache_root: cache_root.into(),
            repository: DEFAULT_REPOSITORY.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A context using the user-scoped cache directory of this platform.
    pub fn with_user_cache(project_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(project_root, user_cache_dir()?))
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves a project-relative path.
    pub fn project_path(&self, rel: &Path) -> PathBuf {
        self.project_root.join(rel)
    }
}

/// `~/.cache/guidekit` on Linux, the platform equivalent elsewhere.
pub fn user_cache_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "guidekit", "guidekit").ok_or_else(|| {
        SyncError::io(
            "~",
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine the home directory",
            ),
        )
    })?;
    Ok(dirs.cache_dir().to_path_buf())
}
