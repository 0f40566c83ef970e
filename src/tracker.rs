//! Keeps `.guidekit.toml` in step with the files actually on disk.
//!
//! A component moves `NotInstalled → Installed` only after its files were
//! extracted without failure, and back only after all of its destinations
//! were deleted. Anything in between leaves the recorded state alone.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use crate::cache::CacheEntry;
use crate::config::ProjectConfig;
use crate::context::Context;
use crate::diff::{DiffReport, FileSet, diff};
use crate::error::{Result, SyncError};
use crate::installer::{ExtractionPlan, ExtractionResult, Extractor, RemovalReport, is_backup_path};
use crate::registry::{Component, ComponentId, Registry};
use crate::util::display_path;
use crate::vfs::FileSystem;

/// A mismatch between the config and the project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// Recorded as installed, but nothing is at its destination.
    Missing { component: ComponentId, path: PathBuf },
    /// Recorded, but the registry does not know it.
    Unknown(ComponentId),
    /// Present on disk but not recorded.
    Untracked { component: ComponentId, path: PathBuf },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Missing { component, path } => write!(
                f,
                "{component} is recorded as installed but {} is missing",
                display_path(path)
            ),
            Divergence::Unknown(component) => {
                write!(f, "{component} is recorded but not a known component")
            }
            Divergence::Untracked { component, path } => write!(
                f,
                "{} exists but {component} is not recorded as installed",
                display_path(path)
            ),
        }
    }
}

pub struct Tracker<'a> {
    fs: &'a dyn FileSystem,
    project_root: PathBuf,
    config_path: PathBuf,
    config: ProjectConfig,
    initialized: bool,
}

impl<'a> Tracker<'a> {
    /// Loads the project config (an absent file is an empty config).
    ///
    /// # Errors
    /// [`SyncError::ConfigParse`] for a malformed config; callers should stop.
    pub fn open(ctx: &Context, fs: &'a dyn FileSystem) -> Result<Self> {
        let loaded = ProjectConfig::load(&ctx.config_path)?;
        Ok(Self {
            fs,
            project_root: ctx.project_root.clone(),
            config_path: ctx.config_path.clone(),
            initialized: loaded.is_some(),
            config: loaded.unwrap_or_default(),
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Whether a config file existed when the tracker was opened.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn installed_version(&self) -> Option<&str> {
        self.config.installed_version.as_deref()
    }

    pub fn is_installed(&self, id: &ComponentId) -> bool {
        self.config.is_installed(id)
    }

    /// Installed components the registry knows, in config order.
    pub fn installed<'r>(&self, registry: &'r Registry) -> Vec<&'r Component> {
        self.config
            .installed_components
            .iter()
            .filter_map(|id| registry.resolve_id(id))
            .collect()
    }

    /// Records the repository the project follows. Persisted with the next save.
    pub fn set_repository(&mut self, repository: &str) {
        self.config.repository = Some(repository.to_string());
    }

    /// Records one component after extraction. Returns whether it was recorded.
    pub fn record_install(
        &mut self,
        component: &Component,
        version: &str,
        result: &ExtractionResult,
    ) -> Result<bool> {
        let recorded = self.record_installs(&[component], version, result)?;
        Ok(recorded.contains(&component.id()))
    }

    /// Records every component of `selection` whose files all extracted.
    /// The installed version moves to `version` only if nothing failed.
    /// Template components are never recorded.
    pub fn record_installs(
        &mut self,
        selection: &[&Component],
        version: &str,
        result: &ExtractionResult,
    ) -> Result<Vec<ComponentId>> {
        let mut recorded = Vec::new();
        for component in selection {
            let id = component.id();
            if result.failed_for(&id) {
                warn!(component = %id, "not recorded: extraction failed");
                continue;
            }
            if !component.kind.is_tracked() {
                continue;
            }
            if self.config.add(id.clone()) {
                debug!(component = %id, "recorded");
            }
            recorded.push(id);
        }
        if !result.had_failures {
            self.config.installed_version = Some(version.to_string());
        }
        self.save()?;
        Ok(recorded)
    }

    /// Deletes a component's destinations, then forgets it. If any deletion
    /// fails the record stays, so [`Tracker::check`] can report the divergence.
    ///
    /// # Errors
    /// [`SyncError::NotInstalled`] without touching any file when the
    /// component is not recorded.
    pub fn record_remove(
        &mut self,
        component: &Component,
        registry: &Registry,
        extractor: &Extractor<'_>,
    ) -> Result<RemovalReport> {
        let id = component.id();
        if !self.config.is_installed(&id) {
            return Err(SyncError::NotInstalled {
                kind: id.kind.to_string(),
                name: id.name,
            });
        }
        let report = extractor.remove(&registry.destinations_for(&[component]));
        if report.all_succeeded() {
            self.config.remove(&id);
            self.save()?;
            info!(component = %id, "removed");
        } else {
            warn!(component = %id, "removal incomplete, keeping the record");
        }
        Ok(report)
    }

    /// Current project content of the given components, keyed by
    /// project-relative path. Backup files are left out.
    pub fn live_files(&self, components: &[&Component]) -> Result<FileSet> {
        let mut set = FileSet::new();
        for component in components {
            let path = self.project_root.join(&component.dest);
            let stat = self.fs.stat(&path).map_err(|e| SyncError::io(&path, e))?;
            match stat {
                None => {}
                Some(stat) if stat.is_dir => {
                    let files = self.fs.walk_files(&path).map_err(|e| SyncError::io(&path, e))?;
                    for rel in files.into_iter().filter(|r| !is_backup_path(r)) {
                        let file = path.join(&rel);
                        let bytes = self.fs.read(&file).map_err(|e| SyncError::io(&file, e))?;
                        set.insert(component.dest.join(&rel), &bytes);
                    }
                }
                Some(_) => {
                    let bytes = self.fs.read(&path).map_err(|e| SyncError::io(&path, e))?;
                    set.insert(component.dest.clone(), &bytes);
                }
            }
        }
        Ok(set)
    }

    /// Compares the installed components on disk with `entry`.
    ///
    /// Added: upstream files missing locally. Removed: local files upstream
    /// does not have (including every file of a component the version dropped).
    pub fn diff_against(&self, registry: &Registry, entry: &CacheEntry) -> Result<DiffReport> {
        let installed = self.installed(registry);
        let tree = entry.tree();
        let mut upstream = ExtractionPlan::default();
        for component in &installed {
            match ExtractionPlan::build(self.fs, &tree, &entry.label, &[*component]) {
                Ok(plan) => {
                    for file in plan.files() {
                        upstream.push(file.source.clone(), file.dest.clone(), file.component.clone());
                    }
                }
                Err(SyncError::MissingSource { .. }) => {
                    debug!(component = %component.id(), version = %entry.label, "absent upstream");
                }
                Err(e) => return Err(e),
            }
        }
        let target = FileSet::from_plan(self.fs, &upstream)?;
        let local = self.live_files(&installed)?;
        Ok(diff(&local, &target).attach_owners(|p| registry.owner_of(p).map(Component::id)))
    }

    /// Lists every divergence between the record and the project directory.
    /// Nothing is repaired.
    pub fn check(&self, registry: &Registry) -> Result<Vec<Divergence>> {
        let mut found = Vec::new();
        for id in &self.config.installed_components {
            let Some(component) = registry.resolve_id(id) else {
                found.push(Divergence::Unknown(id.clone()));
                continue;
            };
            if !self.has_files(&component.dest)? {
                found.push(Divergence::Missing {
                    component: id.clone(),
                    path: component.dest.clone(),
                });
            }
        }
        for component in registry.list(None) {
            let id = component.id();
            if !component.kind.is_tracked() || self.config.is_installed(&id) {
                continue;
            }
            if self.has_files(&component.dest)? {
                found.push(Divergence::Untracked {
                    component: id,
                    path: component.dest.clone(),
                });
            }
        }
        Ok(found)
    }

    fn has_files(&self, dest: &Path) -> Result<bool> {
        let path = self.project_root.join(dest);
        match self.fs.stat(&path).map_err(|e| SyncError::io(&path, e))? {
            None => Ok(false),
            Some(stat) if stat.is_dir => Ok(self
                .fs
                .walk_files(&path)
                .map_err(|e| SyncError::io(&path, e))?
                .iter()
                .any(|rel| !is_backup_path(rel))),
            Some(_) => Ok(true),
        }
    }

    fn save(&self) -> Result<()> {
        self.config.save(&self.config_path)
    }
}
