//! Command flows built from the core pieces.
//!
//! Every flow follows the same order: pick components from the registry,
//! materialize a version, optionally preview a diff, apply the plan, and only
//! then update the project record.

use std::path::Path;
use tracing::{info, warn};
use crate::cache::{CacheEntry, Downloader, EntryKind, VersionSpec};
use crate::context::Context;
use crate::diff::DiffReport;
use crate::error::{Result, SyncError};
use crate::installer::{ExtractionPlan, ExtractionResult, Extractor, RemovalReport};
use crate::registry::{Component, ComponentId, ComponentKind, Registry};
use crate::remote::RemoteSource;
use crate::tracker::{Divergence, Tracker};
use crate::util::normalize_relative;
use crate::vfs::FileSystem;

/// Template written by every `init`.
pub const INIT_TEMPLATE: &str = "claude-md";

/// How conflicting destinations are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    pub force: bool,
    pub backups: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            force: false,
            backups: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub version: String,
    pub kind: EntryKind,
    pub result: ExtractionResult,
    /// Components now in the project record.
    pub recorded: Vec<ComponentId>,
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Version recorded before the update.
    pub from: Option<String>,
    pub version: String,
    pub kind: EntryKind,
    pub preview: DiffReport,
    /// `None` for a dry run.
    pub result: Option<ExtractionResult>,
}

impl UpdateReport {
    pub fn had_failures(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.had_failures)
    }
}

pub struct Session<'a> {
    ctx: &'a Context,
    registry: &'a Registry,
    fs: &'a dyn FileSystem,
    remote: &'a dyn RemoteSource,
}

impl<'a> Session<'a> {
    pub fn new(
        ctx: &'a Context,
        registry: &'a Registry,
        fs: &'a dyn FileSystem,
        remote: &'a dyn RemoteSource,
    ) -> Self {
        Self {
            ctx,
            registry,
            fs,
            remote,
        }
    }

    pub fn downloader(&self) -> Downloader<'a> {
        Downloader::new(self.remote, &self.ctx.cache_root)
    }

    pub fn extractor(&self, options: ApplyOptions) -> Extractor<'a> {
        Extractor::new(self.fs, &self.ctx.project_root)
            .force(options.force)
            .backups(options.backups)
    }

    pub fn tracker(&self) -> Result<Tracker<'a>> {
        Tracker::open(self.ctx, self.fs)
    }

    /// Writes the project template plus every `type:name` selector.
    /// All selectors are resolved before anything is fetched.
    pub fn init(
        &self,
        selectors: &[String],
        spec: &VersionSpec,
        options: ApplyOptions,
    ) -> Result<InstallReport> {
        let template = self
            .registry
            .find(ComponentKind::Template, INIT_TEMPLATE)
            .ok_or_else(|| SyncError::UnknownComponent {
                kind: ComponentKind::Template.to_string(),
                name: INIT_TEMPLATE.to_string(),
            })?;
        let mut selection = vec![template];
        for selector in selectors {
            let component = self.registry.select(selector)?;
            if !selection.contains(&component) {
                selection.push(component);
            }
        }
        self.install(&selection, spec, options)
    }

    /// Installs components of one kind, pinned to the recorded version when
    /// the project has one.
    pub fn add(&self, kind: &str, names: &[String], options: ApplyOptions) -> Result<InstallReport> {
        let selection = names
            .iter()
            .map(|name| self.registry.require(kind, name))
            .collect::<Result<Vec<_>>>()?;
        let spec = self
            .tracker()?
            .installed_version()
            .map(VersionSpec::parse)
            .unwrap_or(VersionSpec::Latest);
        self.install(&selection, &spec, options)
    }

    fn install(
        &self,
        selection: &[&Component],
        spec: &VersionSpec,
        options: ApplyOptions,
    ) -> Result<InstallReport> {
        // Opened first: a malformed config stops the command before any fetch.
        let mut tracker = self.tracker()?;
        let entry = self.downloader().materialize(spec)?;
        let plan = ExtractionPlan::build(self.fs, &entry.tree(), &entry.label, selection)?;
        let result = self.extractor(options).apply(&plan);
        tracker.set_repository(&self.ctx.repository);
        let recorded = tracker.record_installs(selection, &entry.label, &result)?;
        Ok(InstallReport {
            version: entry.label,
            kind: entry.kind,
            result,
            recorded,
        })
    }

    /// Deletes a recorded component's files and forgets it.
    pub fn remove(&self, kind: &str, name: &str) -> Result<RemovalReport> {
        let mut removed = self.remove_many(kind, &[name.to_string()])?;
        Ok(removed.pop().map(|(_, report)| report).unwrap_or_default())
    }

    /// Removes several components of one kind. Every name must be known and
    /// recorded before the first file is deleted. Stops at the first
    /// component that was only partly removed.
    pub fn remove_many(&self, kind: &str, names: &[String]) -> Result<Vec<(ComponentId, RemovalReport)>> {
        let mut selection: Vec<&Component> = Vec::new();
        for name in names {
            let component = self.registry.require(kind, name)?;
            if !selection.contains(&component) {
                selection.push(component);
            }
        }
        let mut tracker = self.tracker()?;
        if let Some(missing) = selection.iter().find(|c| !tracker.is_installed(&c.id())) {
            return Err(SyncError::NotInstalled {
                kind: missing.kind.to_string(),
                name: missing.name.clone(),
            });
        }
        let extractor = self.extractor(ApplyOptions::default());
        let mut removed = Vec::new();
        for component in selection {
            let report = tracker.record_remove(component, self.registry, &extractor)?;
            let complete = report.all_succeeded();
            removed.push((component.id(), report));
            if !complete {
                break;
            }
        }
        Ok(removed)
    }

    /// Moves every recorded component to `spec`. Templates are left alone.
    ///
    /// # Errors
    /// [`SyncError::NotInitialized`] before any fetch when the project has no config.
    pub fn update(
        &self,
        spec: &VersionSpec,
        options: ApplyOptions,
        dry_run: bool,
    ) -> Result<UpdateReport> {
        let mut tracker = self.tracker()?;
        if !tracker.is_initialized() {
            return Err(SyncError::NotInitialized(self.ctx.config_path.clone()));
        }
        let from = tracker.installed_version().map(str::to_string);
        let installed = tracker.installed(self.registry);
        let entry = self.downloader().materialize(spec)?;
        let preview = tracker.diff_against(self.registry, &entry)?;

        let mut report = UpdateReport {
            from,
            version: entry.label.clone(),
            kind: entry.kind,
            preview,
            result: None,
        };
        if dry_run {
            info!(version = %entry.label, "dry run, nothing applied");
            return Ok(report);
        }

        let plan = ExtractionPlan::build(self.fs, &entry.tree(), &entry.label, &installed)?;
        let result = self.extractor(options).apply(&plan);
        tracker.record_installs(&installed, &entry.label, &result)?;
        if result.had_failures {
            warn!(version = %entry.label, "update incomplete, installed version unchanged");
        }
        report.result = Some(result);
        Ok(report)
    }

    /// Compares the recorded components on disk with `spec`.
    pub fn diff(&self, spec: &VersionSpec) -> Result<(CacheEntry, DiffReport)> {
        let tracker = self.tracker()?;
        let entry = self.downloader().materialize(spec)?;
        let report = tracker.diff_against(self.registry, &entry)?;
        Ok((entry, report))
    }

    /// Restores the backup of `path`, given relative to the project root or
    /// as an absolute path inside it.
    pub fn restore(&self, path: &Path) -> Result<()> {
        let relative = path.strip_prefix(&self.ctx.project_root).unwrap_or(path);
        let relative = normalize_relative(relative).ok_or_else(|| {
            SyncError::NoBackup(path.to_path_buf())
        })?;
        self.extractor(ApplyOptions::default()).restore(&relative)
    }

    pub fn check(&self) -> Result<Vec<Divergence>> {
        self.tracker()?.check(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FakeRemote;
    use crate::diff::Change;
    use crate::installer::Outcome;
    use crate::vfs::DiskFs;
    use tempfile::TempDir;

    struct Fixture {
        _project: TempDir,
        _cache: TempDir,
        ctx: Context,
        registry: Registry,
        remote: FakeRemote,
    }

    impl Fixture {
        fn new() -> Self {
            let project = TempDir::new().unwrap();
            let cache = TempDir::new().unwrap();
            let remote = FakeRemote::new(Some("v1.6.0"));
            remote.publish(
                "v1.6.0",
                &[
                    ("templates/CLAUDE.md", "# Project"),
                    ("language-guides/go.md", "# Go"),
                    ("workflows/code-review.md", "# Review"),
                ],
            );
            Self {
                ctx: Context::new(project.path(), cache.path()),
                _project: project,
                _cache: cache,
                registry: Registry::builtin(),
                remote,
            }
        }

        fn session(&self) -> Session<'_> {
            Session::new(&self.ctx, &self.registry, &DiskFs, &self.remote)
        }

        fn read(&self, rel: &str) -> String {
            std::fs::read_to_string(self.ctx.project_path(Path::new(rel))).unwrap()
        }
    }

    #[test]
    fn test_init_writes_template_and_selection() {
        let f = Fixture::new();
        let report = f
            .session()
            .init(&["lang:go".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        assert_eq!(report.version, "v1.6.0");
        assert_eq!(report.result.count("created"), 2);
        assert_eq!(report.recorded, vec![ComponentId::new(ComponentKind::Language, "go")]);
        assert_eq!(f.read("CLAUDE.md"), "# Project");
    }

    #[test]
    fn test_unknown_selector_fetches_nothing() {
        let f = Fixture::new();
        let err = f
            .session()
            .init(&["lang:cobol".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.remote.fetches.get(), 0);
        assert!(!f.ctx.config_path.exists());
    }

    #[test]
    fn test_add_pins_to_installed_version() {
        let f = Fixture::new();
        let session = f.session();
        session.init(&[], &VersionSpec::Latest, ApplyOptions::default()).unwrap();
        f.remote.publish("v2.0.0", &[("language-guides/go.md", "# Go 2")]);

        let report = session
            .add("lang", &["go".to_string()], ApplyOptions::default())
            .unwrap();
        assert_eq!(report.version, "v1.6.0");
        assert_eq!(f.read(".claude/language-guides/go.md"), "# Go");
    }

    #[test]
    fn test_update_dry_run_applies_nothing() {
        let f = Fixture::new();
        let session = f.session();
        session
            .init(&["wf:code-review".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        f.remote.publish("v1.7.0", &[("workflows/code-review.md", "# Review v2")]);

        let report = session
            .update(&VersionSpec::parse("v1.7.0"), ApplyOptions::default(), true)
            .unwrap();
        assert!(report.result.is_none());
        assert_eq!(report.preview.paths(Change::Modified).len(), 1);
        assert_eq!(f.read(".claude/workflows/code-review.md"), "# Review");
        assert_eq!(session.tracker().unwrap().installed_version(), Some("v1.6.0"));
    }

    #[test]
    fn test_update_without_force_skips_local_edits() {
        let f = Fixture::new();
        let session = f.session();
        session
            .init(&["wf:code-review".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        std::fs::write(f.ctx.project_path(Path::new(".claude/workflows/code-review.md")), "mine").unwrap();
        f.remote.publish("v1.7.0", &[("workflows/code-review.md", "# Review v2")]);

        let report = session
            .update(&VersionSpec::parse("v1.7.0"), ApplyOptions::default(), false)
            .unwrap();
        let result = report.result.unwrap();
        assert_eq!(result.outcomes[0].outcome, Outcome::Skipped);
        assert_eq!(f.read(".claude/workflows/code-review.md"), "mine");
    }

    #[test]
    fn test_update_requires_a_project_config() {
        let f = Fixture::new();
        let err = f
            .session()
            .update(&VersionSpec::Latest, ApplyOptions::default(), false)
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized(_)));
        assert!(!f.ctx.config_path.exists());
        assert_eq!(f.remote.fetches.get(), 0);
    }

    #[test]
    fn test_remove_many_checks_every_name_first() {
        let f = Fixture::new();
        let session = f.session();
        session
            .init(&["lang:go".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();

        let err = session
            .remove_many("lang", &["go".to_string(), "python".to_string()])
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInstalled { ref name, .. } if name == "python"));
        assert_eq!(f.read(".claude/language-guides/go.md"), "# Go");
        let go = ComponentId::new(ComponentKind::Language, "go");
        assert!(session.tracker().unwrap().is_installed(&go));

        let removed = session
            .remove_many("lang", &["go".to_string(), "golang".to_string()])
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, go);
        assert!(!session.tracker().unwrap().is_installed(&go));
    }

    #[test]
    fn test_restore_accepts_absolute_paths() {
        let f = Fixture::new();
        let session = f.session();
        session
            .init(&["lang:go".to_string()], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        let dest = f.ctx.project_path(Path::new(".claude/language-guides/go.md"));
        std::fs::write(&dest, "mine").unwrap();
        session
            .init(
                &["lang:go".to_string()],
                &VersionSpec::Latest,
                ApplyOptions { force: true, backups: true },
            )
            .unwrap();
        assert_eq!(f.read(".claude/language-guides/go.md"), "# Go");

        session.restore(&dest).unwrap();
        assert_eq!(f.read(".claude/language-guides/go.md"), "mine");
    }
}
