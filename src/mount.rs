//! Namespace mount management
//!
//! The whole Quobyte namespace is attached once, at startup, below the mount
//! root. Volumes are never mounted individually.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{PluginError, Result};

/// Name of the mount utility
pub const MOUNT_BINARY: &str = "mount.quobyte";

const PROC_MOUNTS: &str = "/proc/mounts";

/// The namespace mount below the mount root
#[derive(Debug, Clone)]
pub struct NamespaceMount {
    root: PathBuf,
    registry: String,
    options: Option<String>,
    binary: PathBuf,
    mount_table: PathBuf,
}

impl NamespaceMount {
    pub fn new(config: &Config) -> Self {
        let binary = match &config.binaries.mount_path {
            Some(dir) => dir.join(MOUNT_BINARY),
            None => PathBuf::from(MOUNT_BINARY),
        };
        Self {
            root: config.mount.path.clone(),
            registry: config.registry.clone(),
            options: config.mount.options.clone(),
            binary,
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Arguments for the mount utility: `[options] <registry>/ <root>`
    pub(crate) fn mount_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .options
            .as_deref()
            .map(|o| o.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        args.push(format!("{}/", self.registry.trim_end_matches('/')));
        args.push(self.root.to_string_lossy().into_owned());
        args
    }

    /// Whether something is already mounted at the mount root
    pub async fn is_mounted(&self) -> Result<bool> {
        let table = tokio::fs::read_to_string(&self.mount_table).await?;
        Ok(mount_table_contains(&table, &self.root))
    }

    /// Create the mount root and attach the namespace unless it already is.
    pub async fn ensure_mounted(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.root).await? {
            debug!("Creating mount root {:?}", self.root);
            tokio::fs::create_dir_all(&self.root).await?;
        }

        if self.is_mounted().await? {
            info!("Found existing namespace mount at {:?}", self.root);
            return Ok(());
        }

        info!("Mounting Quobyte namespace in {:?}", self.root);
        let args = self.mount_args();
        debug!("Running {:?} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| PluginError::Mount(format!("Failed to run {:?}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(PluginError::Mount(format!(
                "{} exited with {}: {}",
                MOUNT_BINARY,
                output.status,
                detail.trim()
            )));
        }

        info!("Successfully mounted namespace at {:?}", self.root);
        Ok(())
    }
}

/// Look for `root` among the mount points of a `/proc/mounts` table
fn mount_table_contains(table: &str, root: &Path) -> bool {
    table.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|target| Path::new(&unescape_mount_field(target)) == root)
            .unwrap_or(false)
    })
}

/// Undo the octal escapes (`\040` for space etc.) the kernel uses in
/// `/proc/mounts`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some(value) = octal_escape(&bytes[i..]) {
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a leading `\ooo` escape
fn octal_escape(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [b'\\', a, b, c, ..] if [a, b, c].iter().all(|d| (b'0'..=b'7').contains(*d)) => {
            let value =
                u32::from(a - b'0') * 64 + u32::from(b - b'0') * 8 + u32::from(c - b'0');
            u8::try_from(value).ok()
        }
        _ => None,
    }
}
