//! # Guidekit Core Library
//!
//! This crate contains the synchronization engine behind the `guidekit` tool, which keeps a
//! project's guides, workflows and templates in step with a versioned upstream repository.
//!
//! Components are copied from a cached snapshot of an upstream release into the project,
//! local edits are never silently overwritten, and `.guidekit.toml` records what is installed.
//!
//! This library is built for the `guidekit` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`registry`] – Static catalog of components and their source/destination paths
//! - [`remote`] – Release metadata and archive download from the upstream repository
//! - [`cache`] – Version resolution and the on-disk snapshot cache
//! - [`installer`] – Extraction plans, the conflict policy, backups and removal
//! - [`diff`] – Content-hash drift classification between file sets
//! - [`tracker`] – Keeps `.guidekit.toml` consistent with the project directory
//! - [`session`] – The command flows (init, add, remove, update, diff)
//! - [`config`] – The `.guidekit.toml` file format
//! - [`context`] – Project and cache locations for one invocation
//! - [`vfs`] – Filesystem abstraction (disk and in-memory)
//! - [`util`] – Shared helpers (hashing, labels, paths)

pub mod cache;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod installer;
pub mod registry;
pub mod remote;
pub mod session;
pub mod tracker;
pub mod util;
pub mod vfs;

pub use cache::*;
pub use config::*;
pub use context::*;
pub use diff::*;
pub use error::*;
pub use installer::*;
pub use registry::*;
pub use remote::*;
pub use session::*;
pub use tracker::*;
pub use vfs::*;
