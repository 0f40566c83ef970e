use std::path::{Component, Path, PathBuf};
use semver::Version;
use sha2::{Digest, Sha256};

/// Prefix carried by every content digest produced by [`content_digest`].
pub const DIGEST_PREFIX: &str = "sha256:";

/// Hashes a byte slice into a `sha256:<hex>` digest.
/// Only the bytes matter: names, timestamps and permissions never enter the hash.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{}{}", DIGEST_PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Checks whether a version label looks like a release tag (`v1.6.0`, `2.0.0-rc.1`).
/// A single leading `v` is ignored.
pub fn is_tag_like(label: &str) -> bool {
    let version = label.strip_prefix('v').unwrap_or(label);
    Version::parse(version).is_ok()
}

/// Turns a version label into a single safe directory name.
/// Branch names may contain `/`, which would otherwise nest cache entries.
/// A label that needed replacements gets a short hash of the original, so
/// `feature/x` and `feature_x` never share a directory.
pub fn sanitize_label(label: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if safe == label {
        return safe;
    }
    let hash = hex::encode(Sha256::digest(label.as_bytes()));
    format!("{safe}-{}", &hash[..8])
}

/// Returns `path` if it is relative and only made of plain components
/// (no `..`, no root, no prefix). Leading `./` segments are dropped.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Renders a path with forward slashes regardless of platform, for output and config files.
pub fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
