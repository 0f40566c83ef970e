//! Narrow filesystem seam used by the extractor and the state tracker.
//!
//! [`DiskFs`] is the real thing. [`MemoryFs`] keeps everything in a map so
//! conflict handling can be exercised without touching disk, and lets tests
//! inject permission failures on chosen paths.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What `stat` reports about an existing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub len: u64,
    /// Unix permission bits. Platforms without them report `0o644`/`0o444`.
    pub mode: u32,
}

pub trait FileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Replaces the file's contents. Parent directories must exist.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    /// `Ok(None)` when nothing exists at `path`.
    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Every regular file below `root`, relative to it, sorted.
    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Filesystem backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    /// Writes through a temporary sibling and renames it into place, so an
    /// interrupted write leaves either the old or the new content.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".guidekit-write-")
            .tempfile_in(parent)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStat {
                is_dir: meta.is_dir(),
                len: meta.len(),
                mode: mode_of(&meta),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o222 == 0);
        std::fs::set_permissions(path, perms)
    }

    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    mode: u32,
}

/// In-memory filesystem. Paths are used verbatim as keys.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RefCell<BTreeMap<PathBuf, MemFile>>,
    dirs: RefCell<BTreeSet<PathBuf>>,
    read_only: RefCell<BTreeSet<PathBuf>>,
    writes: Cell<usize>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file (and its parent directories) with mode `0o644`.
    pub fn insert(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        self.insert_with_mode(path, contents, 0o644);
    }

    pub fn insert_with_mode(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>, mode: u32) {
        let path = path.as_ref();
        self.add_parents(path);
        self.files.borrow_mut().insert(
            path.to_path_buf(),
            MemFile {
                data: contents.as_ref().to_vec(),
                mode,
            },
        );
    }

    /// Makes every write or removal at or below `path` fail with `PermissionDenied`.
    pub fn deny_writes(&self, path: impl AsRef<Path>) {
        self.read_only.borrow_mut().insert(path.as_ref().to_path_buf());
    }

    /// Number of successful file writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files
            .borrow()
            .get(path.as_ref())
            .map(|f| f.data.clone())
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.files.borrow().get(path.as_ref()).map(|f| f.mode)
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.files.borrow().contains_key(path) || self.dirs.borrow().contains(path)
    }

    fn add_parents(&self, path: &Path) {
        let mut dirs = self.dirs.borrow_mut();
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check_writable(&self, path: &Path) -> io::Result<()> {
        if self.read_only.borrow().iter().any(|p| path.starts_with(p)) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    )
}

impl FileSystem for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.contents(path).ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.check_writable(path)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !self.dirs.borrow().contains(parent) {
                return Err(not_found(parent));
            }
        }
        let mut files = self.files.borrow_mut();
        let mode = files.get(path).map(|f| f.mode).unwrap_or(0o644);
        files.insert(
            path.to_path_buf(),
            MemFile {
                data: contents.to_vec(),
                mode,
            },
        );
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileStat>> {
        if let Some(file) = self.files.borrow().get(path) {
            return Ok(Some(FileStat {
                is_dir: false,
                len: file.data.len() as u64,
                mode: file.mode,
            }));
        }
        if self.dirs.borrow().contains(path) {
            return Ok(Some(FileStat {
                is_dir: true,
                len: 0,
                mode: 0o755,
            }));
        }
        Ok(None)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check_writable(path)?;
        self.add_parents(path);
        self.dirs.borrow_mut().insert(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.check_writable(path)?;
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check_writable(path)?;
        if !self.dirs.borrow().contains(path) {
            return Err(not_found(path));
        }
        self.files.borrow_mut().retain(|p, _| !p.starts_with(path));
        self.dirs.borrow_mut().retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.check_writable(path)?;
        if !self.dirs.borrow().contains(path) {
            return Err(not_found(path));
        }
        let occupied = self.files.borrow().keys().any(|p| p.starts_with(path))
            || self.dirs.borrow().iter().any(|p| p != path && p.starts_with(path));
        if occupied {
            return Err(io::Error::new(
                io::ErrorKind::DirectoryNotEmpty,
                format!("directory not empty: {}", path.display()),
            ));
        }
        self.dirs.borrow_mut().remove(path);
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.check_writable(path)?;
        let mut files = self.files.borrow_mut();
        let file = files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.mode = mode;
        Ok(())
    }

    fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .borrow()
            .keys()
            .filter_map(|p| p.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect())
    }
}
