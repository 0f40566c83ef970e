//! Applies component files from a cache entry to the project directory.
//!
//! Every planned file is decided on its own:
//!
//! | destination             | default   | `force`                    |
//! |-------------------------|-----------|----------------------------|
//! | absent                  | Created   | Created                    |
//! | same bytes as source    | Unchanged | Unchanged                  |
//! | different bytes         | Skipped   | BackedUp (or Overwritten)  |
//!
//! A failing file never stops the rest of the plan.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};
use crate::error::{Result, SyncError};
use crate::registry::{Component, ComponentId};
use crate::vfs::FileSystem;

/// Suffix appended to a file's name to form its backup sibling.
pub const BACKUP_SUFFIX: &str = ".guidekit-backup";

/// Path of the first backup kept for `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    numbered_backup_path(path, 1)
}

/// Path of the `n`th backup of `path`. Later backups carry a `.N` suffix,
/// so an unrestored backup is never overwritten.
pub fn numbered_backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(BACKUP_SUFFIX);
    if n > 1 {
        name.push(format!(".{n}"));
    }
    path.with_file_name(name)
}

pub fn is_backup_path(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy();
    if name.ends_with(BACKUP_SUFFIX) {
        return true;
    }
    match name.rsplit_once('.') {
        Some((stem, n)) => {
            stem.ends_with(BACKUP_SUFFIX) && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// One file to copy: absolute `source` in a cache tree, project-relative `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub component: ComponentId,
}

/// Ordered copies with unique destinations.
#[derive(Debug, Clone, Default)]
pub struct ExtractionPlan {
    files: Vec<PlannedFile>,
}

impl ExtractionPlan {
    /// Expands each component against the tree at `tree_root`: a file source
    /// yields one copy, a directory source one copy per contained file.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingSource`] when the tree lacks a component's source.
    pub fn build(
        fs: &dyn FileSystem,
        tree_root: &Path,
        version: &str,
        components: &[&Component],
    ) -> Result<ExtractionPlan> {
        let mut plan = ExtractionPlan::default();
        for component in components {
            let source = tree_root.join(&component.source);
            let stat = fs
                .stat(&source)
                .map_err(|e| SyncError::io(&source, e))?
                .ok_or_else(|| SyncError::MissingSource {
                    component: component.to_string(),
                    version: version.to_string(),
                    path: component.source.clone(),
                })?;
            if !stat.is_dir {
                plan.push(source, component.dest.clone(), component.id());
                continue;
            }
            let files = fs.walk_files(&source).map_err(|e| SyncError::io(&source, e))?;
            for rel in files {
                plan.push(source.join(&rel), component.dest.join(&rel), component.id());
            }
        }
        Ok(plan)
    }

    /// Appends a copy unless its destination is already planned.
    pub fn push(&mut self, source: PathBuf, dest: PathBuf, component: ComponentId) -> bool {
        if self.files.iter().any(|f| f.dest == dest) {
            debug!(dest = %dest.display(), "destination already planned, skipping");
            return false;
        }
        self.files.push(PlannedFile {
            source,
            dest,
            component,
        });
        true
    }

    pub fn files(&self) -> &[PlannedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Created,
    /// Destination already held the source bytes; nothing was written.
    Unchanged,
    /// Destination differs and `force` was off.
    Skipped,
    /// Forced overwrite with backups disabled.
    Overwritten,
    /// Forced overwrite; the previous content is at `backup`.
    BackedUp { backup: PathBuf },
    Failed { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Unchanged => "unchanged",
            Outcome::Skipped => "skipped",
            Outcome::Overwritten => "overwritten",
            Outcome::BackedUp { .. } => "backed up",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// True when the destination's bytes changed.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            Outcome::Created | Outcome::Overwritten | Outcome::BackedUp { .. }
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::BackedUp { backup } => write!(f, "backed up to {}", backup.display()),
            Outcome::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub dest: PathBuf,
    pub component: ComponentId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// One outcome per planned file, in plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionResult {
    pub outcomes: Vec<FileOutcome>,
    pub had_failures: bool,
}

impl ExtractionResult {
    fn record(&mut self, file: &PlannedFile, outcome: Outcome) {
        self.had_failures |= outcome.is_failure();
        self.outcomes.push(FileOutcome {
            dest: file.dest.clone(),
            component: file.component.clone(),
            outcome,
        });
    }

    /// Number of outcomes whose label equals `label` (see [`Outcome::label`]).
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.label() == label)
            .count()
    }

    /// Components with at least one failed file.
    pub fn failed_components(&self) -> BTreeSet<ComponentId> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_failure())
            .map(|o| o.component.clone())
            .collect()
    }

    pub fn failed_for(&self, component: &ComponentId) -> bool {
        self.outcomes
            .iter()
            .any(|o| &o.component == component && o.outcome.is_failure())
    }

    /// True when no destination was written.
    pub fn is_noop(&self) -> bool {
        self.outcomes.iter().all(|o| !o.outcome.wrote())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing existed at the path.
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct RemovalReport {
    pub paths: Vec<(PathBuf, Removal)>,
}

impl RemovalReport {
    pub fn all_succeeded(&self) -> bool {
        !self
            .paths
            .iter()
            .any(|(_, r)| matches!(r, Removal::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.paths.iter().filter_map(|(p, r)| match r {
            Removal::Failed(reason) => Some((p, reason.as_str())),
            _ => None,
        })
    }
}

/// Copies planned files into a project under the conflict policy.
pub struct Extractor<'a> {
    fs: &'a dyn FileSystem,
    project_root: PathBuf,
    force: bool,
    backups: bool,
}

impl<'a> Extractor<'a> {
    /// A non-forcing extractor with backups enabled.
    pub fn new(fs: &'a dyn FileSystem, project_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            project_root: project_root.into(),
            force: false,
            backups: true,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn backups(mut self, enabled: bool) -> Self {
        self.backups = enabled;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn apply(&self, plan: &ExtractionPlan) -> ExtractionResult {
        let mut result = ExtractionResult::default();
        for file in plan.files() {
            let outcome = match self.apply_file(file) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(dest = %file.dest.display(), "{e}");
                    Outcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            debug!(dest = %file.dest.display(), outcome = outcome.label());
            result.record(file, outcome);
        }
        info!(
            files = plan.len(),
            created = result.count("created"),
            skipped = result.count("skipped"),
            failed = result.count("failed"),
            "extraction finished"
        );
        result
    }

    fn apply_file(&self, file: &PlannedFile) -> io::Result<Outcome> {
        let source = self.fs.read(&file.source)?;
        let source_mode = self.fs.stat(&file.source)?.map(|s| s.mode);
        let dest = self.project_root.join(&file.dest);

        let existing = self.fs.stat(&dest)?;
        let outcome = match existing {
            None => Outcome::Created,
            Some(stat) if stat.is_dir => {
                return Err(io::Error::other(format!(
                    "{} is a directory",
                    dest.display()
                )));
            }
            Some(_) => {
                let current = self.fs.read(&dest)?;
                if current == source {
                    return Ok(Outcome::Unchanged);
                }
                if !self.force {
                    return Ok(Outcome::Skipped);
                }
                if self.backups {
                    let backup = self.backup(&dest, &current)?;
                    Outcome::BackedUp {
                        backup: backup
                            .strip_prefix(&self.project_root)
                            .map(Path::to_path_buf)
                            .unwrap_or(backup),
                    }
                } else {
                    Outcome::Overwritten
                }
            }
        };

        if let Some(parent) = dest.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.write(&dest, &source)?;
        if let Some(mode) = source_mode {
            self.fs.set_mode(&dest, mode)?;
        }
        Ok(outcome)
    }

    /// Existing backups of `dest`, oldest first.
    fn backups_of(&self, dest: &Path) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        loop {
            let candidate = numbered_backup_path(dest, found.len() + 1);
            if self.fs.stat(&candidate)?.is_none() {
                return Ok(found);
            }
            found.push(candidate);
        }
    }

    /// Saves `current` with the destination's permission bits before it is
    /// overwritten. Older backups are kept; identical content reuses the newest.
    fn backup(&self, dest: &Path, current: &[u8]) -> io::Result<PathBuf> {
        let existing = self.backups_of(dest)?;
        if let Some(newest) = existing.last() {
            if self.fs.read(newest)? == current {
                debug!(backup = %newest.display(), "content already backed up");
                return Ok(newest.clone());
            }
        }
        let backup = numbered_backup_path(dest, existing.len() + 1);
        let mode = self.fs.stat(dest)?.map(|s| s.mode);
        self.fs.write(&backup, current)?;
        if let Some(mode) = mode {
            self.fs.set_mode(&backup, mode)?;
        }
        debug!(backup = %backup.display(), "backed up");
        Ok(backup)
    }

    /// Puts the newest backup of `dest` (project-relative) back in place and
    /// removes it. Older backups stay for a later restore.
    pub fn restore(&self, dest: &Path) -> Result<()> {
        let dest = self.project_root.join(dest);
        let backup = self
            .backups_of(&dest)
            .map_err(|e| SyncError::io(&dest, e))?
            .pop()
            .ok_or_else(|| SyncError::NoBackup(dest.clone()))?;
        let stat = self
            .fs
            .stat(&backup)
            .map_err(|e| SyncError::io(&backup, e))?
            .ok_or_else(|| SyncError::NoBackup(dest.clone()))?;
        let bytes = self.fs.read(&backup).map_err(|e| SyncError::io(&backup, e))?;
        if let Some(parent) = dest.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| SyncError::io(parent, e))?;
        }
        self.fs.write(&dest, &bytes).map_err(|e| SyncError::io(&dest, e))?;
        self.fs
            .set_mode(&dest, stat.mode)
            .map_err(|e| SyncError::io(&dest, e))?;
        self.fs
            .remove_file(&backup)
            .map_err(|e| SyncError::io(&backup, e))?;
        info!(path = %dest.display(), backup = %backup.display(), "restored from backup");
        Ok(())
    }

    /// Deletes project-relative paths: files directly, directories with
    /// everything beneath them. Backups are never deleted, so a directory
    /// holding backups stays with only those inside. Keeps going after a failure.
    pub fn remove(&self, paths: &[PathBuf]) -> RemovalReport {
        let mut report = RemovalReport::default();
        for rel in paths {
            let path = self.project_root.join(rel);
            let removal = match self.fs.stat(&path) {
                Ok(None) => Removal::Absent,
                Ok(Some(stat)) => {
                    let removed = if stat.is_dir {
                        self.remove_tree(&path)
                    } else {
                        self.fs.remove_file(&path)
                    };
                    match removed {
                        Ok(()) => Removal::Removed,
                        Err(e) => Removal::Failed(e.to_string()),
                    }
                }
                Err(e) => Removal::Failed(e.to_string()),
            };
            if let Removal::Failed(reason) = &removal {
                warn!(path = %path.display(), "could not remove: {reason}");
            }
            report.paths.push((rel.clone(), removal));
        }
        report
    }

    fn remove_tree(&self, root: &Path) -> io::Result<()> {
        let files = self.fs.walk_files(root)?;
        if !files.iter().any(|rel| is_backup_path(rel)) {
            return self.fs.remove_dir_all(root);
        }
        let mut dirs = BTreeSet::new();
        for rel in files.iter().filter(|rel| !is_backup_path(rel)) {
            self.fs.remove_file(&root.join(rel))?;
            dirs.extend(rel.ancestors().skip(1).map(|d| root.join(d)));
        }
        // Deepest first; directories still holding backups stay.
        for dir in dirs.iter().rev() {
            if let Err(e) = self.fs.remove_dir(dir) {
                debug!(dir = %dir.display(), "kept: {e}");
            }
        }
        info!(path = %root.display(), "backups kept after removal");
        Ok(())
    }
}
