//! Single lifecycle worker
//!
//! All volume operations are funnelled through one task that handles jobs
//! strictly in arrival order. No two lifecycle operations ever run at the
//! same time, whichever volumes they touch.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{PluginError, Result};
use crate::lifecycle::{CreateOptions, VolumeManager};
use crate::observer::VolumeName;
use crate::protocol::PluginResponse;

/// Jobs waiting beyond this many make new requests wait for queue space
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// A lifecycle operation for the worker to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeCall {
    Create(VolumeName, CreateOptions),
    Remove(VolumeName),
    Mount(VolumeName),
    Path(VolumeName),
    Unmount(VolumeName),
    Get(VolumeName),
    List,
}

struct Job {
    call: VolumeCall,
    reply: oneshot::Sender<PluginResponse>,
}

/// Cloneable handle for submitting calls to the worker
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Job>,
}

impl WorkerHandle {
    /// Queue `call` and wait for its response
    pub async fn submit(&self, call: VolumeCall) -> Result<PluginResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { call, reply })
            .await
            .map_err(|_| PluginError::WorkerGone)?;
        rx.await.map_err(|_| PluginError::WorkerGone)
    }
}

/// Start the worker. It runs until every handle has been dropped.
pub fn spawn_worker(manager: Arc<VolumeManager>, depth: usize) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));

    let task = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            debug!(call = ?job.call, "Running lifecycle call");
            let response = execute(&manager, job.call).await;
            if job.reply.send(response).is_err() {
                debug!("Caller went away before the response was ready");
            }
        }
        info!("Lifecycle worker stopped");
    });

    (WorkerHandle { tx }, task)
}

/// Run one call and fold its result into a plugin response
pub async fn execute(manager: &VolumeManager, call: VolumeCall) -> PluginResponse {
    let result = match call {
        VolumeCall::Create(name, options) => manager
            .create(&name, &options)
            .await
            .map(|_| PluginResponse::ok()),
        VolumeCall::Remove(name) => manager.remove(&name).await.map(|_| PluginResponse::ok()),
        VolumeCall::Mount(name) | VolumeCall::Path(name) => manager
            .mount_point(&name)
            .await
            .map(|path| PluginResponse::mountpoint(&path)),
        VolumeCall::Unmount(name) => manager.unmount(&name).await.map(|_| PluginResponse::ok()),
        VolumeCall::Get(name) => manager.get(&name).await.map(PluginResponse::volume),
        VolumeCall::List => manager.list().await.map(PluginResponse::volumes),
    };

    result.unwrap_or_else(PluginResponse::error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::observer::MountRoot;
    use crate::wait::WaitPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, backend: InMemoryBackend) -> Arc<VolumeManager> {
        Arc::new(VolumeManager::with_settings(
            Arc::new(backend),
            MountRoot::new(dir.path()),
            "BASE".to_string(),
            WaitPolicy::new(Duration::from_millis(10), Duration::from_secs(5)),
        ))
    }

    #[tokio::test]
    async fn test_calls_run_in_order() {
        let dir = TempDir::new().unwrap();
        let backend =
            InMemoryBackend::with_mount_root(dir.path()).attach_after(Duration::from_millis(100));
        let (worker, _task) = spawn_worker(manager(&dir, backend), 4);
        let name = VolumeName::parse("vol1").unwrap();

        // Path is queued behind the slow create, so it must see the volume.
        let create = {
            let worker = worker.clone();
            let name = name.clone();
            tokio::spawn(async move {
                worker
                    .submit(VolumeCall::Create(name, CreateOptions::default()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let path = worker.submit(VolumeCall::Path(name)).await.unwrap();

        assert!(create.await.unwrap().unwrap().is_ok());
        assert_eq!(
            path.mountpoint,
            Some(dir.path().join("vol1").to_string_lossy().into_owned())
        );
    }

    #[tokio::test]
    async fn test_errors_become_responses() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, InMemoryBackend::new());
        let name = VolumeName::parse("vol1").unwrap();

        let response = execute(&manager, VolumeCall::Get(name.clone())).await;
        assert_eq!(response, PluginResponse::error("Not mounted: vol1"));

        let response = execute(&manager, VolumeCall::Mount(name)).await;
        assert_eq!(response.err, "Not mounted: vol1");
    }

    #[tokio::test]
    async fn test_worker_gone() {
        let dir = TempDir::new().unwrap();
        let (worker, task) = spawn_worker(manager(&dir, InMemoryBackend::new()), 1);
        task.abort();
        let _ = task.await;

        assert!(matches!(
            worker.submit(VolumeCall::List).await,
            Err(PluginError::WorkerGone)
        ));
    }
}
