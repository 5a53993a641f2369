//! Volume lifecycle
//!
//! Implements the volume operations on top of a [`Backend`] and the
//! [`MountRoot`]. Nothing is remembered between calls: whether a volume is
//! mounted is always answered by looking at the mount root.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{Backend, CreateRequest};
use crate::config::Config;
use crate::error::{PluginError, Result};
use crate::observer::{MountRoot, VolumeName};
use crate::wait::{wait_until, WaitPolicy};

/// Mode of subdirectories created inside a volume
const SUBDIR_MODE: u32 = 0o755;

/// Overrides accepted when creating a volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub configuration: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// A mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Volume lifecycle manager
pub struct VolumeManager {
    backend: Arc<dyn Backend>,
    root: MountRoot,
    default_configuration: String,
    wait: WaitPolicy,
}

impl VolumeManager {
    /// Create a manager from the daemon configuration
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self::with_settings(
            backend,
            MountRoot::new(&config.mount.path),
            config.volumes.default_configuration.clone(),
            WaitPolicy::new(config.mount.poll_interval, config.mount.timeout),
        )
    }

    pub fn with_settings(
        backend: Arc<dyn Backend>,
        root: MountRoot,
        default_configuration: String,
        wait: WaitPolicy,
    ) -> Self {
        Self {
            backend,
            root,
            default_configuration,
            wait,
        }
    }

    /// Create the backend volume and wait until it is visible under the
    /// mount root.
    ///
    /// A volume the backend already knows is not an error; the call then
    /// only waits for its directory.
    pub async fn create(&self, name: &VolumeName, options: &CreateOptions) -> Result<()> {
        let mut request = CreateRequest::new(
            name.volume(),
            options
                .configuration
                .clone()
                .unwrap_or_else(|| self.default_configuration.clone()),
        );
        if let Some(user) = &options.user {
            request.user = user.clone();
        }
        if let Some(group) = &options.group {
            request.group = group.clone();
        }

        match name.subdir() {
            Some(subdir) => info!(
                volume = name.volume(),
                configuration = %request.configuration,
                "Creating volume with subdir {}",
                subdir
            ),
            None => info!(
                volume = name.volume(),
                configuration = %request.configuration,
                "Creating volume"
            ),
        }

        let outcome = self.backend.create(&request).await?;
        if outcome.already_exists() {
            info!(volume = name.volume(), "Volume already exists in backend");
        } else if !outcome.success {
            warn!(volume = name.volume(), "Backend create failed: {}", outcome.output);
            return Err(PluginError::Backend(if outcome.output.is_empty() {
                format!("Could not create {}", name)
            } else {
                outcome.output
            }));
        }

        let root = &self.root;
        let checks = wait_until(self.wait, move || root.volume_visible(name))
            .await
            .map_err(|timeout| {
                warn!(volume = %name, "Gave up waiting for mount point: {}", timeout);
                PluginError::MountNotReady(name.to_string())
            })?;
        debug!(volume = %name, checks, "Mount point visible");

        // The backend volume exists at this point; a failed mkdir only
        // leaves the subdirectory missing, which Path/Mount then report.
        if name.subdir().is_some() {
            let path = self.root.mountpoint(name);
            match tokio::fs::DirBuilder::new()
                .recursive(true)
                .mode(SUBDIR_MODE)
                .create(&path)
                .await
            {
                Ok(()) => debug!("Created {:?}", path),
                Err(e) => warn!(volume = %name, "Unable to create {:?}: {}", path, e),
            }
        }

        Ok(())
    }

    /// Delete the backend volume. Removing a volume that does not exist
    /// succeeds.
    pub async fn remove(&self, name: &VolumeName) -> Result<()> {
        info!(volume = name.volume(), "Removing volume");

        let resolved = self.backend.resolve(name.volume()).await.map_err(|e| {
            warn!(volume = name.volume(), "Resolve failed: {}", e);
            PluginError::DeleteFailed(name.to_string())
        })?;
        if !resolved.success {
            info!(volume = name.volume(), "Volume does not exist, nothing to remove");
            return Ok(());
        }

        match self.backend.delete(name.volume()).await {
            Ok(outcome) if outcome.success => Ok(()),
            Ok(outcome) => {
                warn!(volume = name.volume(), "Backend delete failed: {}", outcome.output);
                Err(PluginError::DeleteFailed(name.to_string()))
            }
            Err(e) => {
                warn!(volume = name.volume(), "Backend delete failed: {}", e);
                Err(PluginError::DeleteFailed(name.to_string()))
            }
        }
    }

    /// Mount point of a mounted volume. Backs both Mount and Path; neither
    /// attempts to mount anything.
    pub async fn mount_point(&self, name: &VolumeName) -> Result<PathBuf> {
        if self.root.exists(name).await {
            Ok(self.root.mountpoint(name))
        } else {
            debug!(volume = %name, "Mount point missing");
            Err(PluginError::NotMounted(name.to_string()))
        }
    }

    pub async fn get(&self, name: &VolumeName) -> Result<Volume> {
        let mountpoint = self.mount_point(name).await?;
        Ok(Volume {
            name: name.to_string(),
            mountpoint,
        })
    }

    /// Every directory under the mount root, each taken to be a volume
    pub async fn list(&self) -> Result<Vec<Volume>> {
        let names = self.root.list_names().await?;
        Ok(names
            .into_iter()
            .map(|name| Volume {
                mountpoint: self.root.path().join(&name),
                name,
            })
            .collect())
    }

    /// The namespace stays mounted as a whole, so there is nothing to undo
    /// for a single volume.
    pub async fn unmount(&self, name: &VolumeName) -> Result<()> {
        debug!(volume = %name, "Unmount is a no-op");
        Ok(())
    }
}
