//! Mount root observer
//!
//! The namespace is mounted once below a single mount root and every volume
//! shows up as a directory directly under it. Directory presence is the only
//! record of whether a volume is mounted; nothing here is cached.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PluginError, Result};

/// A validated volume name as supplied by the engine.
///
/// The first path segment names the backend volume. Any further segments
/// name a subdirectory inside it, so `data/app/logs` refers to the
/// directory `app/logs` in volume `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeName {
    full: String,
    split: Option<usize>,
}

impl VolumeName {
    /// Validate `name`, rejecting anything that could escape the mount root
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(PluginError::InvalidName("empty name".to_string()));
        }
        if name.starts_with('/') {
            return Err(PluginError::InvalidName(name.to_string()));
        }
        if name.contains('\0') {
            return Err(PluginError::InvalidName(name.escape_default().to_string()));
        }
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(PluginError::InvalidName(name.to_string()));
            }
        }

        Ok(Self {
            full: name.to_string(),
            split: name.find('/'),
        })
    }

    /// Name as the engine knows it
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Backend volume this name lives in
    pub fn volume(&self) -> &str {
        match self.split {
            Some(i) => &self.full[..i],
            None => &self.full,
        }
    }

    /// Subdirectory inside the backend volume, if any
    pub fn subdir(&self) -> Option<&str> {
        self.split.map(|i| &self.full[i + 1..])
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Read-only view of the mount root.
#[derive(Debug, Clone)]
pub struct MountRoot {
    root: PathBuf,
}

impl MountRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Local path the engine should bind into containers for `name`
    pub fn mountpoint(&self, name: &VolumeName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Directory of the backend volume `name` belongs to
    pub fn volume_dir(&self, name: &VolumeName) -> PathBuf {
        self.root.join(name.volume())
    }

    /// Whether the mount point of `name` currently exists as a directory
    pub async fn exists(&self, name: &VolumeName) -> bool {
        is_dir(&self.mountpoint(name)).await
    }

    /// Whether the backend volume directory of `name` is visible yet
    pub async fn volume_visible(&self, name: &VolumeName) -> bool {
        is_dir(&self.volume_dir(name)).await
    }

    /// Names of every directory directly under the mount root, in
    /// filesystem listing order.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !file_type.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping non UTF-8 entry {:?} in mount root", raw),
            }
        }

        Ok(names)
    }
}

async fn is_dir(path: &Path) -> bool {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta.is_dir(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_plain_name() {
        let name = VolumeName::parse("vol1").unwrap();
        assert_eq!(name.volume(), "vol1");
        assert_eq!(name.subdir(), None);
        assert_eq!(name.to_string(), "vol1");
    }

    #[test]
    fn test_parse_subdir_name() {
        let name = VolumeName::parse("data/app/logs").unwrap();
        assert_eq!(name.volume(), "data");
        assert_eq!(name.subdir(), Some("app/logs"));
        assert_eq!(name.as_str(), "data/app/logs");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        for bad in ["", "..", ".", "/etc", "vol/../../etc", "vol//x", "vol/", "a\0b"] {
            assert!(
                matches!(VolumeName::parse(bad), Err(PluginError::InvalidName(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_exists_tracks_directory() {
        let dir = TempDir::new().unwrap();
        let root = MountRoot::new(dir.path());
        let name = VolumeName::parse("vol1").unwrap();

        assert!(!root.exists(&name).await);
        std::fs::create_dir(dir.path().join("vol1")).unwrap();
        assert!(root.exists(&name).await);
        assert_eq!(root.mountpoint(&name), dir.path().join("vol1"));
    }

    #[tokio::test]
    async fn test_regular_file_is_not_mounted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("vol1"), b"x").unwrap();
        let root = MountRoot::new(dir.path());
        assert!(!root.exists(&VolumeName::parse("vol1").unwrap()).await);
    }

    #[tokio::test]
    async fn test_list_names_only_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::create_dir(dir.path().join("beta")).unwrap();
        std::fs::write(dir.path().join("stray-file"), b"").unwrap();

        let root = MountRoot::new(dir.path());
        let mut names = root.list_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_list_names_empty_root() {
        let dir = TempDir::new().unwrap();
        let root = MountRoot::new(dir.path());
        assert!(root.list_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_names_missing_root() {
        let root = MountRoot::new("/nonexistent/quobyte/mount/root");
        assert!(matches!(root.list_names().await, Err(PluginError::Io(_))));
    }
}
