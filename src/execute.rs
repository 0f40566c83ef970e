use std::time::Duration;
use anyhow::{bail, Context as _, Result};
use colored::{ColoredString, Colorize};
use guidekit::cache::VersionSpec;
use guidekit::config::ProjectConfig;
use guidekit::context::Context;
use guidekit::diff::{Change, DiffReport};
use guidekit::installer::{ExtractionResult, Outcome, Removal};
use guidekit::registry::{ComponentKind, Registry};
use guidekit::remote::{DEFAULT_REPOSITORY, GitHubSource};
use guidekit::session::{ApplyOptions, Session};
use guidekit::util::display_path;
use guidekit::vfs::DiskFs;
use crate::cli::{CacheCommand, GuidekitCommand, CLI};

pub fn execute(cli: CLI) -> Result<()> {
    let ctx = build_context(&cli)?;
    let registry = Registry::builtin();
    let remote = GitHubSource::new(&ctx.repository, ctx.timeout)?;
    let session = Session::new(&ctx, &registry, &DiskFs, &remote);

    match cli.command {
        GuidekitCommand::Init { selectors, version, force, no_backup } => {
            execute_init(&session, &selectors, &version, options(force, no_backup))
        }
        GuidekitCommand::Add { kind, names, force, no_backup } => {
            execute_add(&session, &kind, &names, options(force, no_backup))
        }
        GuidekitCommand::Remove { kind, names } => {
            execute_remove(&session, &kind, &names)
        }
        GuidekitCommand::Update { version, force, no_backup, dry_run } => {
            execute_update(&session, &version, options(force, no_backup), dry_run)
        }
        GuidekitCommand::Diff { version, json } => {
            execute_diff(&session, &version, json)
        }
        GuidekitCommand::List { kind } => {
            execute_list(&session, &registry, kind.as_deref())
        }
        GuidekitCommand::Restore { path } => {
            session.restore(&path)?;
            println!("Restored {}", path.display());
            Ok(())
        }
        GuidekitCommand::Doctor => {
            execute_doctor(&session)
        }
        GuidekitCommand::Cache { command } => {
            execute_cache(&session, command)
        }
    }
}

/// Resolves directories and the repository from flags, environment and the
/// project config, in that order.
fn build_context(cli: &CLI) -> Result<Context> {
    let project = match &cli.project {
        Some(project) => project.clone(),
        None => std::env::current_dir().context("could not determine the current directory")?,
    };
    let ctx = match &cli.cache_dir {
        Some(dir) => Context::new(project, dir.clone()),
        None => Context::with_user_cache(project)?,
    };
    let ctx = ctx.timeout(Duration::from_secs(cli.timeout));
    // A malformed config is reported by the command that needs it.
    let recorded = ProjectConfig::load(&ctx.config_path)
        .ok()
        .flatten()
        .and_then(|config| config.repository);
    let repository = cli
        .repo
        .clone()
        .or(recorded)
        .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());
    Ok(ctx.repository(repository))
}

fn options(force: bool, no_backup: bool) -> ApplyOptions {
    ApplyOptions {
        force,
        backups: !no_backup,
    }
}

pub fn execute_init(session: &Session, selectors: &[String], version: &str, options: ApplyOptions) -> Result<()> {
    let report = session.init(selectors, &VersionSpec::parse(version), options)?;
    println!("Initialized at {} ({})", report.version.bold(), report.kind);
    print_result(&report.result);
    finish(&report.result)
}

pub fn execute_add(session: &Session, kind: &str, names: &[String], options: ApplyOptions) -> Result<()> {
    let report = session.add(kind, names, options)?;
    println!("Installing from {}", report.version.bold());
    print_result(&report.result);
    finish(&report.result)
}

pub fn execute_remove(session: &Session, kind: &str, names: &[String]) -> Result<()> {
    for (component, report) in session.remove_many(kind, names)? {
        for (path, removal) in &report.paths {
            match removal {
                Removal::Removed => println!("  {} {}", pad("removed").green(), display_path(path)),
                Removal::Absent => println!("  {} {}", pad("absent").dimmed(), display_path(path)),
                Removal::Failed(reason) => {
                    println!("  {} {}: {}", pad("failed").red(), display_path(path), reason)
                }
            }
        }
        if !report.all_succeeded() {
            bail!("{component} was only partly removed and is still recorded; run `guidekit doctor`");
        }
    }
    Ok(())
}

pub fn execute_update(session: &Session, version: &str, options: ApplyOptions, dry_run: bool) -> Result<()> {
    let report = session.update(&VersionSpec::parse(version), options, dry_run)?;
    match &report.from {
        Some(from) if from == &report.version => println!("Checking {} against upstream", from.bold()),
        Some(from) => println!("Updating {} -> {}", from, report.version.bold()),
        None => println!("Updating to {}", report.version.bold()),
    }
    print_diff(&report.preview);
    let Some(result) = &report.result else {
        println!("{}", "Dry run: nothing was changed".dimmed());
        return Ok(());
    };
    print_result(result);
    finish(result)
}

pub fn execute_diff(session: &Session, version: &str, json: bool) -> Result<()> {
    let (entry, report) = session.diff(&VersionSpec::parse(version))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Comparing installed components with {}", entry.label.bold());
    print_diff(&report);
    Ok(())
}

pub fn execute_list(session: &Session, registry: &Registry, kind: Option<&str>) -> Result<()> {
    let kind = kind.map(str::parse::<ComponentKind>).transpose()?;
    let tracker = session.tracker()?;
    for k in ComponentKind::ALL.into_iter().filter(|k| kind.is_none_or(|f| f == *k)) {
        println!("{}", k.as_str().bold());
        for component in registry.list(Some(k)) {
            let marker = if tracker.is_installed(&component.id()) {
                "installed".green()
            } else {
                "".normal()
            };
            println!("  {:<14} {:<40} {}", component.name, display_path(&component.dest), marker);
        }
    }
    if let Some(version) = tracker.installed_version() {
        println!();
        println!("Installed version: {version}");
    }
    Ok(())
}

pub fn execute_doctor(session: &Session) -> Result<()> {
    let found = session.check()?;
    if found.is_empty() {
        println!("{}", "No problems found".green());
        return Ok(());
    }
    for divergence in &found {
        println!("  {} {}", "!".yellow(), divergence);
    }
    bail!("{} problem(s) found", found.len())
}

pub fn execute_cache(session: &Session, command: CacheCommand) -> Result<()> {
    let downloader = session.downloader();
    match command {
        CacheCommand::List => {
            let entries = downloader.entries()?;
            if entries.is_empty() {
                println!("Cache is empty ({})", downloader.cache_root().display());
                return Ok(());
            }
            for entry in entries {
                println!("{:<24} {:<7} {}", entry.label, entry.kind, entry.root.display());
            }
            Ok(())
        }
        CacheCommand::Clean { label: Some(label) } => {
            if !downloader.remove(&label)? {
                bail!("no cached version '{label}'");
            }
            println!("Removed {label}");
            Ok(())
        }
        CacheCommand::Clean { label: None } => {
            downloader.clean()?;
            println!("Cleaned {}", downloader.cache_root().display());
            Ok(())
        }
    }
}

fn pad(label: &str) -> String {
    format!("{label:>11}")
}

fn status(outcome: &Outcome) -> ColoredString {
    let label = pad(outcome.label());
    match outcome {
        Outcome::Created => label.green(),
        Outcome::Unchanged => label.dimmed(),
        Outcome::Skipped => label.yellow(),
        Outcome::Overwritten | Outcome::BackedUp { .. } => label.cyan(),
        Outcome::Failed { .. } => label.red(),
    }
}

fn print_result(result: &ExtractionResult) {
    for file in &result.outcomes {
        let dest = display_path(&file.dest);
        match &file.outcome {
            Outcome::BackedUp { backup } => {
                println!("  {} {} (previous content in {})", status(&file.outcome), dest, display_path(backup))
            }
            Outcome::Failed { reason } => println!("  {} {}: {}", status(&file.outcome), dest, reason),
            other => println!("  {} {}", status(other), dest),
        }
    }
    let skipped = result.skipped().count();
    if skipped > 0 {
        println!(
            "{} file(s) differ from upstream and were left alone; use --force to overwrite (a backup is kept)",
            skipped
        );
    }
}

fn finish(result: &ExtractionResult) -> Result<()> {
    if result.had_failures {
        let failed: Vec<String> = result.failed_components().iter().map(ToString::to_string).collect();
        bail!("some files could not be written; not recorded: {}", failed.join(", "));
    }
    Ok(())
}

fn print_diff(report: &DiffReport) {
    if !report.has_changes() {
        println!("No changes");
        return;
    }
    for (component, summary) in report.by_component() {
        if !summary.has_changes() {
            continue;
        }
        let name = component.map(|c| c.to_string()).unwrap_or_else(|| "other".to_string());
        println!(
            "{}: {} added, {} removed, {} modified",
            name.bold(),
            summary.added,
            summary.removed,
            summary.modified
        );
    }
    for entry in report.changed() {
        let symbol = match entry.change {
            Change::Added => "+".green(),
            Change::Removed => "-".red(),
            Change::Modified => "~".yellow(),
            Change::Unchanged => continue,
        };
        println!("  {} {}", symbol, display_path(&entry.path));
    }
}
