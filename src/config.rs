use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{Result, SyncError};
use crate::registry::ComponentId;

/// File name of the project config, at the project root.
pub const CONFIG_FILE: &str = ".guidekit.toml";

/// Represents the contents of a `.guidekit.toml` file.
///
/// This is the record of what is installed in a project and from which version.
/// It is only changed after the matching filesystem work has succeeded.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Label of the version the project was last synchronized to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    /// Upstream repository (`owner/name`) the project follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Installed components, kept sorted.
    #[serde(default)]
    pub installed_components: BTreeSet<ComponentId>,
}

impl ProjectConfig {
    /// Loads a `ProjectConfig` from a file path. A missing file yields `Ok(None)`.
    ///
    /// # Errors
    /// [`SyncError::ConfigParse`] if the file exists but is not a valid config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<ProjectConfig>> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::io(path, e)),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|cause| SyncError::ConfigParse {
                path: path.to_path_buf(),
                cause,
            })
    }

    /// Saves the config in pretty TOML format. The file is replaced atomically.
    ///
    /// # Errors
    /// Returns an error if serialization fails or the file can't be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|cause| SyncError::ConfigWrite {
            path: path.to_path_buf(),
            cause,
        })?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| SyncError::io(parent, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| SyncError::io(path, e.error))?;
        Ok(())
    }

    pub fn is_installed(&self, id: &ComponentId) -> bool {
        self.installed_components.contains(id)
    }

    /// Adds a component. Returns `false` if it was already recorded.
    pub fn add(&mut self, id: ComponentId) -> bool {
        self.installed_components.insert(id)
    }

    /// Removes a component. If it is not recorded, nothing happens.
    pub fn remove(&mut self, id: &ComponentId) -> bool {
        self.installed_components.remove(id)
    }
}
