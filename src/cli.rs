use std::path::PathBuf;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Increase log output on stderr (-v info, -vv debug). `RUST_LOG` overrides
    #[clap(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Project directory. Defaults to the current directory
    #[clap(long, global = true)]
    pub project: Option<PathBuf>,
    /// Cache directory for downloaded versions
    #[clap(long, global = true, env = "GUIDEKIT_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
    /// Upstream repository as `owner/name`
    #[clap(long, global = true, env = "GUIDEKIT_REPO")]
    pub repo: Option<String>,
    /// Download timeout in seconds
    #[clap(long, global = true, default_value_t = 60)]
    pub timeout: u64,
    #[command(subcommand)]
    pub(crate) command: GuidekitCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum GuidekitCommand {
    /// Writes `CLAUDE.md` and the selected components, and creates `.guidekit.toml`
    Init {
        /// Components to install as `type:name`, e.g. `lang:go` or `workflow:hooks`
        selectors: Vec<String>,
        /// `latest`, a release tag, or a branch name (`tag:` / `branch:` force the kind)
        #[clap(long, default_value = "latest")]
        version: String,
        /// Overwrite files that differ from upstream (a backup is kept)
        #[clap(short, long)]
        force: bool,
        /// With --force, overwrite without keeping a backup
        #[clap(long)]
        no_backup: bool,
    },
    /// Installs components of one type at the project's version
    Add {
        /// language, framework, workflow or template (aliases: lang, fw, wf, tpl)
        kind: String,
        #[clap(required = true)]
        names: Vec<String>,
        #[clap(short, long)]
        force: bool,
        #[clap(long)]
        no_backup: bool,
    },
    /// Deletes installed components and removes them from `.guidekit.toml`
    Remove {
        kind: String,
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Moves all installed components to another version
    Update {
        #[clap(long, default_value = "latest")]
        version: String,
        #[clap(short, long)]
        force: bool,
        #[clap(long)]
        no_backup: bool,
        /// Only show what would change
        #[clap(long)]
        dry_run: bool,
    },
    /// Shows how installed components differ from a version
    Diff {
        #[clap(long, default_value = "latest")]
        version: String,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Lists available components
    List {
        /// Only list one type
        kind: Option<String>,
    },
    /// Puts back the file saved by a forced overwrite
    Restore {
        path: PathBuf,
    },
    /// Reports differences between `.guidekit.toml` and the project files
    Doctor,
    /// Manages the download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum CacheCommand {
    /// Lists cached versions
    List,
    /// Deletes one cached version, or all of them
    Clean {
        label: Option<String>,
    },
}
