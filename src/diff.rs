//! Content-hash drift classification between two file sets.
//!
//! `diff(a, b)` and `diff(b, a)` are mirror images: Added and Removed swap,
//! Modified and Unchanged stay put. Only bytes are compared.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use serde::Serialize;
use crate::error::{Result, SyncError};
use crate::installer::{ExtractionPlan, is_backup_path};
use crate::registry::ComponentId;
use crate::util::content_digest;
use crate::vfs::FileSystem;

/// Relative path → content digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<PathBuf, String>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.files.insert(path.into(), content_digest(contents));
    }

    /// Every file below `root`, keyed by its path relative to `root`.
    /// Backup siblings are left out.
    pub fn from_tree(fs: &dyn FileSystem, root: &Path) -> Result<FileSet> {
        let mut set = FileSet::new();
        if fs.stat(root).map_err(|e| SyncError::io(root, e))?.is_none() {
            return Ok(set);
        }
        for rel in fs.walk_files(root).map_err(|e| SyncError::io(root, e))? {
            if is_backup_path(&rel) {
                continue;
            }
            let path = root.join(&rel);
            let bytes = fs.read(&path).map_err(|e| SyncError::io(&path, e))?;
            set.insert(rel, &bytes);
        }
        Ok(set)
    }

    /// The upstream side of a plan: each destination with its source's digest.
    pub fn from_plan(fs: &dyn FileSystem, plan: &ExtractionPlan) -> Result<FileSet> {
        let mut set = FileSet::new();
        for file in plan.files() {
            let bytes = fs.read(&file.source).map_err(|e| SyncError::io(&file.source, e))?;
            set.insert(file.dest.clone(), &bytes);
        }
        Ok(set)
    }

    pub fn digest(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// Only in the target.
    Added,
    /// Only in the base.
    Removed,
    Modified,
    Unchanged,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Change::Added => "added",
            Change::Removed => "removed",
            Change::Modified => "modified",
            Change::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: PathBuf,
    pub change: Change,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

impl ComponentSummary {
    fn bump(&mut self, change: Change) {
        match change {
            Change::Added => self.added += 1,
            Change::Removed => self.removed += 1,
            Change::Modified => self.modified += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

/// Entries sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    /// Fills in each entry's owning component using `owner`.
    pub fn attach_owners<F>(mut self, owner: F) -> DiffReport
    where
        F: Fn(&Path) -> Option<ComponentId>,
    {
        for entry in &mut self.entries {
            entry.component = owner(&entry.path);
        }
        self
    }

    pub fn paths(&self, change: Change) -> BTreeSet<PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.change == change)
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn changed(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(|e| e.change != Change::Unchanged)
    }

    pub fn has_changes(&self) -> bool {
        self.changed().next().is_some()
    }

    /// Counts per owning component; unowned paths group under `None`.
    pub fn by_component(&self) -> BTreeMap<Option<ComponentId>, ComponentSummary> {
        let mut out: BTreeMap<Option<ComponentId>, ComponentSummary> = BTreeMap::new();
        for entry in &self.entries {
            out.entry(entry.component.clone())
                .or_default()
                .bump(entry.change);
        }
        out
    }
}

/// Classifies every path in `base ∪ target`.
pub fn diff(base: &FileSet, target: &FileSet) -> DiffReport {
    let paths: BTreeSet<&PathBuf> = base.paths().chain(target.paths()).collect();
    let entries = paths
        .into_iter()
        .map(|path| {
            let change = match (base.digest(path), target.digest(path)) {
                (Some(a), Some(b)) if a == b => Change::Unchanged,
                (Some(_), Some(_)) => Change::Modified,
                (Some(_), None) => Change::Removed,
                (None, _) => Change::Added,
            };
            DiffEntry {
                path: path.clone(),
                change,
                component: None,
            }
        })
        .collect();
    DiffReport { entries }
}
