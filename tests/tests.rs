use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use guidekit::*;

/// A remote serving canned tarballs, shaped like GitHub's archive downloads.
struct StubRemote {
    release: Option<String>,
    archives: RefCell<BTreeMap<String, Vec<u8>>>,
    fetches: Cell<usize>,
    broken: Cell<bool>,
}

impl StubRemote {
    fn new(release: Option<&str>) -> Self {
        Self {
            release: release.map(str::to_string),
            archives: RefCell::new(BTreeMap::new()),
            fetches: Cell::new(0),
            broken: Cell::new(false),
        }
    }

    fn publish(&self, label: &str, files: &[(&str, &str)]) {
        let mut bytes = Vec::new();
        {
            let encoder = GzEncoder::new(&mut bytes, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            for (path, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, format!("guides-{label}/{path}"), content.as_bytes())
                    .unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }
        self.archives.borrow_mut().insert(label.to_string(), bytes);
    }
}

impl RemoteSource for StubRemote {
    fn describe(&self) -> String {
        "stub/guides".to_string()
    }

    fn latest_release(&self) -> guidekit::Result<Option<String>> {
        Ok(self.release.clone())
    }

    fn default_branch(&self) -> guidekit::Result<String> {
        Ok("main".to_string())
    }

    fn open_archive(&self, label: &str, _kind: EntryKind) -> guidekit::Result<Box<dyn Read>> {
        self.fetches.set(self.fetches.get() + 1);
        if self.broken.get() {
            return Ok(Box::new(Cursor::new(b"not a tarball".to_vec())));
        }
        let bytes = self.archives.borrow().get(label).cloned().ok_or_else(|| SyncError::HttpStatus {
            url: format!("stub://{label}"),
            status: 404,
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

struct Project {
    _project: TempDir,
    _cache: TempDir,
    ctx: Context,
    registry: Registry,
    remote: StubRemote,
}

fn setup_tests(release: Option<&str>) -> Project {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let remote = StubRemote::new(release);
    remote.publish(
        "v1.6.0",
        &[
            ("templates/CLAUDE.md", "# Project"),
            ("templates/settings.json", "{}"),
            ("language-guides/go.md", "# Go"),
            ("language-guides/python.md", "# Python"),
            ("workflows/code-review.md", "# Review"),
            ("workflows/hooks/pre-commit.sh", "#!/bin/sh\nexit 0\n"),
            ("workflows/hooks/post-edit.sh", "#!/bin/sh\n"),
        ],
    );
    Project {
        ctx: Context::new(project.path(), cache.path()),
        _project: project,
        _cache: cache,
        registry: Registry::builtin(),
        remote,
    }
}

impl Project {
    fn session(&self) -> Session<'_> {
        Session::new(&self.ctx, &self.registry, &DiskFs, &self.remote)
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.ctx.project_root.join(rel)
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    fn config(&self) -> ProjectConfig {
        ProjectConfig::load(&self.ctx.config_path).unwrap().unwrap()
    }
}


#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use guidekit::*;
    use crate::setup_tests;

    fn selectors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fresh_init_with_template_only() {
        let p = setup_tests(Some("v1.6.0"));
        let report = p
            .session()
            .init(&[], &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();

        assert_eq!(report.result.outcomes.len(), 1);
        assert_eq!(report.result.count("created"), 1);
        assert_eq!(p.read("CLAUDE.md"), "# Project");

        let config = p.config();
        assert_eq!(config.installed_version.as_deref(), Some("v1.6.0"));
        assert!(config.installed_components.is_empty());
    }

    #[test]
    fn test_add_already_installed_is_unchanged() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["lang:go"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();

        let report = session
            .add("language", &selectors(&["go"]), ApplyOptions::default())
            .unwrap();
        assert_eq!(report.result.outcomes.len(), 1);
        assert_eq!(report.result.outcomes[0].dest, PathBuf::from(".claude/language-guides/go.md"));
        assert_eq!(report.result.outcomes[0].outcome, Outcome::Unchanged);
        assert_eq!(p.config().installed_components.len(), 1);
    }

    #[test]
    fn test_forced_update_backs_up_local_edits() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["wf:code-review"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        let edited = "# Review\n\nOur team also checks migrations.\n";
        std::fs::write(p.path(".claude/workflows/code-review.md"), edited).unwrap();
        p.remote.publish("v1.7.0", &[("workflows/code-review.md", "# Review, revised")]);

        let report = session
            .update(
                &VersionSpec::parse("v1.7.0"),
                ApplyOptions { force: true, backups: true },
                false,
            )
            .unwrap();

        assert_eq!(
            report.preview.paths(Change::Modified),
            [PathBuf::from(".claude/workflows/code-review.md")].into_iter().collect()
        );
        let result = report.result.unwrap();
        assert!(matches!(result.outcomes[0].outcome, Outcome::BackedUp { .. }));
        assert_eq!(p.read(".claude/workflows/code-review.md"), "# Review, revised");
        assert_eq!(
            std::fs::read(p.path(".claude/workflows/code-review.md.guidekit-backup")).unwrap(),
            edited.as_bytes()
        );
        assert_eq!(p.config().installed_version.as_deref(), Some("v1.7.0"));
    }

    #[test]
    fn test_second_forced_update_keeps_earlier_backup() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["wf:code-review"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        std::fs::write(p.path(".claude/workflows/code-review.md"), "our checklist").unwrap();
        p.remote.publish("v1.7.0", &[("workflows/code-review.md", "# Review v2")]);
        p.remote.publish("v1.8.0", &[("workflows/code-review.md", "# Review v3")]);

        let forced = ApplyOptions { force: true, backups: true };
        session.update(&VersionSpec::parse("v1.7.0"), forced, false).unwrap();
        let report = session.update(&VersionSpec::parse("v1.8.0"), forced, false).unwrap();

        assert!(!report.had_failures());
        assert_eq!(p.read(".claude/workflows/code-review.md"), "# Review v3");
        assert_eq!(p.read(".claude/workflows/code-review.md.guidekit-backup"), "our checklist");
        assert_eq!(p.read(".claude/workflows/code-review.md.guidekit-backup.2"), "# Review v2");

        let file = Path::new(".claude/workflows/code-review.md");
        session.restore(file).unwrap();
        session.restore(file).unwrap();
        assert_eq!(p.read(".claude/workflows/code-review.md"), "our checklist");
        assert!(session.check().unwrap().is_empty());
    }

    #[test]
    fn test_latest_without_releases_uses_main_branch() {
        let p = setup_tests(None);
        p.remote.publish("main", &[("templates/CLAUDE.md", "# From main")]);
        let downloader = p.session().downloader();

        let entry = downloader.materialize(&VersionSpec::Latest).unwrap();
        assert_eq!(entry.label, "main");
        assert_eq!(entry.kind, EntryKind::Branch);

        downloader.materialize(&VersionSpec::Latest).unwrap();
        assert_eq!(p.remote.fetches.get(), 2);
    }

    #[test]
    fn test_remove_never_installed_component() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["lang:go"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        std::fs::write(p.path(".claude/language-guides/python.md"), "hand written").unwrap();
        let before = p.config();

        let err = session.remove("language", "python").unwrap_err();
        assert!(matches!(err, SyncError::NotInstalled { .. }));
        assert!(err.is_not_found());
        assert_eq!(p.read(".claude/language-guides/python.md"), "hand written");
        assert_eq!(p.config(), before);
    }

    #[test]
    fn test_remove_several_names_checks_all_first() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["lang:go"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        let before = p.config();

        let err = session
            .remove_many("language", &selectors(&["go", "python"]))
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInstalled { .. }));
        assert_eq!(p.read(".claude/language-guides/go.md"), "# Go");
        assert_eq!(p.config(), before);
    }

    #[test]
    fn test_remove_leaves_other_components_alone() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(
                &selectors(&["lang:go", "lang:python", "wf:hooks"]),
                &VersionSpec::Latest,
                ApplyOptions::default(),
            )
            .unwrap();

        let report = session.remove("wf", "hooks").unwrap();
        assert!(report.all_succeeded());
        let hooks = p.registry.resolve("workflow", "hooks").unwrap();
        for dest in p.registry.destinations_for(&[hooks]) {
            assert!(!p.ctx.project_root.join(dest).exists());
        }
        assert_eq!(p.read(".claude/language-guides/go.md"), "# Go");
        assert_eq!(p.read(".claude/language-guides/python.md"), "# Python");
        assert_eq!(p.read("CLAUDE.md"), "# Project");
        assert_eq!(p.config().installed_components.len(), 2);
    }

    #[test]
    fn test_init_twice_writes_nothing() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        let picks = selectors(&["lang:go", "wf:hooks", "template:settings"]);
        session.init(&picks, &VersionSpec::Latest, ApplyOptions::default()).unwrap();

        let second = session.init(&picks, &VersionSpec::Latest, ApplyOptions::default()).unwrap();
        assert!(second.result.is_noop());
        assert!(second.result.outcomes.iter().all(|o| o.outcome == Outcome::Unchanged));
        assert_eq!(p.remote.fetches.get(), 1);
    }

    #[test]
    fn test_failed_fetch_keeps_other_versions_usable() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["lang:go"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();

        p.remote.broken.set(true);
        let err = session
            .update(&VersionSpec::parse("main"), ApplyOptions::default(), false)
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));
        p.remote.broken.set(false);

        let entries = session.downloader().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "v1.6.0");
        assert_eq!(p.config().installed_version.as_deref(), Some("v1.6.0"));

        let (_, report) = session.diff(&VersionSpec::parse("v1.6.0")).unwrap();
        assert!(!report.has_changes());
    }

    #[test]
    fn test_diff_reports_each_change_kind() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(
                &selectors(&["lang:go", "wf:code-review", "wf:hooks"]),
                &VersionSpec::Latest,
                ApplyOptions::default(),
            )
            .unwrap();
        p.remote.publish(
            "v2.0.0",
            &[
                ("language-guides/go.md", "# Go"),
                ("workflows/code-review.md", "# Review v2"),
                ("workflows/hooks/pre-commit.sh", "#!/bin/sh\nexit 0\n"),
                ("workflows/hooks/format.sh", "#!/bin/sh\n"),
            ],
        );

        let (entry, report) = session.diff(&VersionSpec::parse("v2.0.0")).unwrap();
        assert_eq!(entry.label, "v2.0.0");
        assert_eq!(report.paths(Change::Added), [PathBuf::from(".claude/hooks/format.sh")].into_iter().collect());
        assert_eq!(report.paths(Change::Removed), [PathBuf::from(".claude/hooks/post-edit.sh")].into_iter().collect());
        assert_eq!(
            report.paths(Change::Modified),
            [PathBuf::from(".claude/workflows/code-review.md")].into_iter().collect()
        );

        let summary = report.by_component();
        let hooks = &summary[&Some(ComponentId::new(ComponentKind::Workflow, "hooks"))];
        assert_eq!((hooks.added, hooks.removed, hooks.unchanged), (1, 1, 1));
    }

    #[test]
    fn test_doctor_finds_deleted_files() {
        let p = setup_tests(Some("v1.6.0"));
        let session = p.session();
        session
            .init(&selectors(&["lang:go"]), &VersionSpec::Latest, ApplyOptions::default())
            .unwrap();
        assert!(session.check().unwrap().is_empty());

        std::fs::remove_file(p.path(".claude/language-guides/go.md")).unwrap();
        let found = session.check().unwrap();
        assert_eq!(
            found,
            vec![Divergence::Missing {
                component: ComponentId::new(ComponentKind::Language, "go"),
                path: PathBuf::from(".claude/language-guides/go.md"),
            }]
        );
    }

    #[test]
    fn test_restore_after_forced_init() {
        let p = setup_tests(Some("v1.6.0"));
        std::fs::write(p.path("CLAUDE.md"), "# Our own notes").unwrap();
        let session = p.session();

        let report = session
            .init(&[], &VersionSpec::Latest, ApplyOptions { force: true, backups: true })
            .unwrap();
        assert_eq!(
            report.result.outcomes[0].outcome,
            Outcome::BackedUp { backup: PathBuf::from("CLAUDE.md.guidekit-backup") }
        );

        session.restore(Path::new("CLAUDE.md")).unwrap();
        assert_eq!(p.read("CLAUDE.md"), "# Our own notes");
        assert!(!p.path("CLAUDE.md.guidekit-backup").exists());
    }
}
