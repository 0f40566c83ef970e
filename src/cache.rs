//! Version-labelled snapshots of the upstream tree.
//!
//! ```text
//! <cache_root>/
//! ├── v1.6.0/
//! │   ├── entry.toml   ← completeness marker (label, kind, fetch time)
//! │   └── tree/        ← unpacked files
//! ├── main/            ← branch entries are replaced on every access
//! └── .staging-XXXX/   ← in-flight fetch, renamed into place on success
//! ```
//!
//! An entry becomes visible only through the final rename, so a reader sees a
//! complete snapshot, the previous snapshot, or nothing.

use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};
use crate::error::{Cause, Result, SyncError};
use crate::remote::RemoteSource;
use crate::util::{is_tag_like, normalize_relative, sanitize_label};

const MARKER_FILE: &str = "entry.toml";
const TREE_DIR: &str = "tree";
const STAGING_PREFIX: &str = ".staging-";
const DISPLACED_PREFIX: &str = ".displaced-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Immutable release tag: cached forever.
    Tag,
    /// Mutable branch head: re-fetched on every access.
    Branch,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Tag => f.write_str("tag"),
            EntryKind::Branch => f.write_str("branch"),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Latest,
    Tag(String),
    Branch(String),
}

impl VersionSpec {
    /// `latest`, `tag:<x>`, `branch:<x>`, or a bare label: semver-looking
    /// labels are tags, anything else a branch.
    pub fn parse(input: &str) -> VersionSpec {
        let input = input.trim();
        if input.eq_ignore_ascii_case("latest") || input.is_empty() {
            VersionSpec::Latest
        } else if let Some(tag) = input.strip_prefix("tag:") {
            VersionSpec::Tag(tag.to_string())
        } else if let Some(branch) = input.strip_prefix("branch:") {
            VersionSpec::Branch(branch.to_string())
        } else if is_tag_like(input) {
            VersionSpec::Tag(input.to_string())
        } else {
            VersionSpec::Branch(input.to_string())
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => f.write_str("latest"),
            VersionSpec::Tag(label) | VersionSpec::Branch(label) => f.write_str(label),
        }
    }
}

/// A version specifier pinned to a concrete label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub label: String,
    pub kind: EntryKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMarker {
    label: String,
    kind: EntryKind,
    fetched_at: u64,
}

/// A materialized snapshot of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub label: String,
    pub kind: EntryKind,
    /// Directory holding the entry; the file tree is [`CacheEntry::tree`].
    pub root: PathBuf,
    pub complete: bool,
    /// Seconds since the Unix epoch at which the entry was committed.
    pub fetched_at: u64,
}

impl CacheEntry {
    pub fn tree(&self) -> PathBuf {
        self.root.join(TREE_DIR)
    }

    pub fn resolved(&self) -> ResolvedVersion {
        ResolvedVersion {
            label: self.label.clone(),
            kind: self.kind,
        }
    }
}

/// Resolves versions against a remote and keeps the on-disk cache consistent.
pub struct Downloader<'a> {
    remote: &'a dyn RemoteSource,
    cache_root: PathBuf,
}

impl<'a> Downloader<'a> {
    pub fn new(remote: &'a dyn RemoteSource, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Pins `latest` to the newest release tag, or to the default branch when
    /// the remote has no releases.
    pub fn resolve(&self, spec: &VersionSpec) -> Result<ResolvedVersion> {
        match spec {
            VersionSpec::Tag(label) => Ok(ResolvedVersion {
                label: label.clone(),
                kind: EntryKind::Tag,
            }),
            VersionSpec::Branch(label) => Ok(ResolvedVersion {
                label: label.clone(),
                kind: EntryKind::Branch,
            }),
            VersionSpec::Latest => match self.remote.latest_release()? {
                Some(tag) => {
                    debug!(tag = %tag, "latest resolved to release");
                    Ok(ResolvedVersion {
                        label: tag,
                        kind: EntryKind::Tag,
                    })
                }
                None => {
                    let branch = self.remote.default_branch()?;
                    info!(
                        branch = %branch,
                        "{} has no releases, using its default branch",
                        self.remote.describe()
                    );
                    Ok(ResolvedVersion {
                        label: branch,
                        kind: EntryKind::Branch,
                    })
                }
            },
        }
    }

    /// Returns a usable snapshot for `spec`, fetching when needed.
    ///
    /// Complete tag entries are returned as-is. Branch entries are always
    /// re-fetched. A corrupt entry is treated as a miss.
    pub fn materialize(&self, spec: &VersionSpec) -> Result<CacheEntry> {
        let resolved = self.resolve(spec)?;
        if resolved.kind == EntryKind::Tag {
            match self.lookup(&resolved) {
                Ok(Some(entry)) => {
                    debug!(label = %entry.label, "cache hit");
                    return Ok(entry);
                }
                Ok(None) => {}
                Err(e) => warn!("{e}; fetching again"),
            }
        }
        self.fetch(&resolved)
    }

    /// The complete entry for `resolved`, if one is committed.
    pub fn lookup(&self, resolved: &ResolvedVersion) -> Result<Option<CacheEntry>> {
        let root = self.entry_path(&resolved.label);
        if !root.exists() {
            return Ok(None);
        }
        let entry = self.read_entry(&root)?;
        if entry.label != resolved.label || entry.kind != resolved.kind {
            return Err(SyncError::CacheCorruption {
                label: resolved.label.clone(),
                path: root,
                reason: format!("marker describes {} '{}'", entry.kind, entry.label),
            });
        }
        Ok(Some(entry))
    }

    /// Every complete entry in the cache, sorted by label. Unreadable
    /// directories are logged and skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        if !self.cache_root.exists() {
            return Ok(Vec::new());
        }
        let dir = std::fs::read_dir(&self.cache_root)
            .map_err(|e| SyncError::io(&self.cache_root, e))?;
        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|e| SyncError::io(&self.cache_root, e))?;
            let name = item.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !item.path().is_dir() {
                continue;
            }
            match self.read_entry(&item.path()) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("{e}"),
            }
        }
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(entries)
    }

    /// Deletes the entry for `label`. Returns whether anything was removed.
    pub fn remove(&self, label: &str) -> Result<bool> {
        let root = self.entry_path(label);
        if !root.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&root).map_err(|e| SyncError::io(&root, e))?;
        info!(label, "removed cache entry");
        Ok(true)
    }

    /// Empties the cache root, including abandoned staging directories.
    pub fn clean(&self) -> Result<()> {
        if self.cache_root.exists() {
            std::fs::remove_dir_all(&self.cache_root)
                .map_err(|e| SyncError::io(&self.cache_root, e))?;
        }
        std::fs::create_dir_all(&self.cache_root).map_err(|e| SyncError::io(&self.cache_root, e))
    }

    fn entry_path(&self, label: &str) -> PathBuf {
        self.cache_root.join(sanitize_label(label))
    }

    fn read_entry(&self, root: &Path) -> Result<CacheEntry> {
        let corrupt = |reason: String| SyncError::CacheCorruption {
            label: root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: root.to_path_buf(),
            reason,
        };
        let marker_path = root.join(MARKER_FILE);
        let content = std::fs::read_to_string(&marker_path)
            .map_err(|e| corrupt(format!("missing marker: {e}")))?;
        let marker: EntryMarker =
            toml::from_str(&content).map_err(|e| corrupt(format!("unreadable marker: {e}")))?;
        if !root.join(TREE_DIR).is_dir() {
            return Err(corrupt("tree directory is missing".to_string()));
        }
        Ok(CacheEntry {
            label: marker.label,
            kind: marker.kind,
            root: root.to_path_buf(),
            complete: true,
            fetched_at: marker.fetched_at,
        })
    }

    /// One fetch attempt: download, unpack into staging, commit by rename.
    /// On failure the staging directory is dropped and any prior entry for
    /// the label is left untouched.
    fn fetch(&self, resolved: &ResolvedVersion) -> Result<CacheEntry> {
        let fail = |cause: Cause| SyncError::Fetch {
            version: resolved.label.clone(),
            remote: self.remote.describe(),
            cause,
        };

        std::fs::create_dir_all(&self.cache_root).map_err(|e| fail(e.into()))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.cache_root)
            .map_err(|e| fail(e.into()))?;

        info!(
            label = %resolved.label,
            kind = %resolved.kind,
            "fetching from {}",
            self.remote.describe()
        );
        let mut reader = self
            .remote
            .open_archive(&resolved.label, resolved.kind)
            .map_err(|e| fail(e.into()))?;
        let mut archive = tempfile::tempfile_in(staging.path()).map_err(|e| fail(e.into()))?;
        let bytes = io::copy(&mut reader, &mut archive).map_err(|e| fail(e.into()))?;
        debug!(bytes, "archive downloaded");
        archive.seek(SeekFrom::Start(0)).map_err(|e| fail(e.into()))?;

        let tree = staging.path().join(TREE_DIR);
        let files = unpack_archive(archive, &tree).map_err(fail)?;
        if files == 0 {
            return Err(fail("archive contains no files".into()));
        }

        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let marker = EntryMarker {
            label: resolved.label.clone(),
            kind: resolved.kind,
            fetched_at,
        };
        let marker = toml::to_string(&marker).map_err(|e| fail(e.into()))?;
        std::fs::write(staging.path().join(MARKER_FILE), marker).map_err(|e| fail(e.into()))?;

        let root = self.entry_path(&resolved.label);
        self.commit(staging.path(), &root).map_err(|e| fail(e.into()))?;
        info!(label = %resolved.label, files, "cache entry committed");

        Ok(CacheEntry {
            label: resolved.label.clone(),
            kind: resolved.kind,
            root,
            complete: true,
            fetched_at,
        })
    }

    /// Renames `staging` to `root`. A prior entry at `root` is moved aside
    /// first and put back if the final rename fails.
    fn commit(&self, staging: &Path, root: &Path) -> io::Result<()> {
        if !root.exists() {
            return std::fs::rename(staging, root);
        }
        let displaced = tempfile::Builder::new()
            .prefix(DISPLACED_PREFIX)
            .tempdir_in(&self.cache_root)?;
        let aside = displaced.path().join("entry");
        std::fs::rename(root, &aside)?;
        if let Err(e) = std::fs::rename(staging, root) {
            std::fs::rename(&aside, root)?;
            return Err(e);
        }
        // `displaced` removes the old entry when dropped.
        Ok(())
    }
}

/// Unpacks a gzip tarball into `dest`, stripping the single wrapper directory
/// every archive carries. Returns the number of files written.
fn unpack_archive(archive: File, dest: &Path) -> std::result::Result<usize, Cause> {
    std::fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(archive));
    let mut files = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if !matches!(kind, EntryType::Regular | EntryType::Directory) {
            continue;
        }
        let path = entry.path()?.into_owned();
        let Some(stripped) = strip_wrapper(&path)? else {
            continue;
        };
        let target = dest.join(&stripped);
        if kind == EntryType::Directory {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        files += 1;
    }
    Ok(files)
}

/// Drops the first path component. `Ok(None)` for the wrapper itself.
fn strip_wrapper(path: &Path) -> std::result::Result<Option<PathBuf>, Cause> {
    let mut components = path.components();
    components.next();
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        return Ok(None);
    }
    match normalize_relative(rest) {
        Some(p) => Ok(Some(p)),
        None => Err(format!("archive entry escapes its root: {}", path.display()).into()),
    }
}
