//! In-memory backend
//!
//! Keeps volumes in a map and, when given a mount root, imitates the
//! namespace mount by creating and removing volume directories there. The
//! attach can be delayed or suppressed and failures can be scripted, which
//! lets the lifecycle and server be exercised without a cluster.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{Backend, CommandOutcome, CreateRequest, ENTITY_EXISTS_MARKER};
use crate::error::Result;

/// One recorded backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Create(CreateRequest),
    Delete(String),
    Resolve(String),
}

#[derive(Debug, Default)]
struct State {
    volumes: HashMap<String, String>,
    calls: Vec<BackendCall>,
    create_failure: Option<String>,
    delete_failure: Option<String>,
}

/// Scriptable backend kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    mount_root: Option<PathBuf>,
    attach_delay: Duration,
}

impl InMemoryBackend {
    /// Backend that never makes volumes visible on disk
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that creates `<root>/<name>` for every created volume
    pub fn with_mount_root(root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Make volume directories appear only after `delay`
    pub fn attach_after(mut self, delay: Duration) -> Self {
        self.attach_delay = delay;
        self
    }

    /// Register an existing volume with the given configuration
    pub fn insert(&self, name: &str, configuration: &str) {
        self.state
            .lock()
            .volumes
            .insert(name.to_string(), configuration.to_string());
    }

    /// Fail every following create with `message`
    pub fn fail_creates(&self, message: &str) {
        self.state.lock().create_failure = Some(message.to_string());
    }

    /// Fail every following delete with `message`
    pub fn fail_deletes(&self, message: &str) {
        self.state.lock().delete_failure = Some(message.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().volumes.contains_key(name)
    }

    /// Configuration a volume was created with
    pub fn configuration(&self, name: &str) -> Option<String> {
        self.state.lock().volumes.get(name).cloned()
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    fn attach(&self, name: &str) {
        let Some(root) = &self.mount_root else {
            return;
        };
        let dir = root.join(name);
        if self.attach_delay.is_zero() {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                debug!("Attach of {:?} failed: {}", dir, e);
            }
            return;
        }

        let delay = self.attach_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                debug!("Delayed attach of {:?} failed: {}", dir, e);
            }
        });
    }

    fn detach(&self, name: &str) {
        if let Some(root) = &self.mount_root {
            let _ = std::fs::remove_dir_all(root.join(name));
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn create(&self, request: &CreateRequest) -> Result<CommandOutcome> {
        {
            let mut state = self.state.lock();
            state.calls.push(BackendCall::Create(request.clone()));

            if let Some(message) = &state.create_failure {
                return Ok(CommandOutcome::failed(message.clone()));
            }
            if state.volumes.contains_key(&request.name) {
                return Ok(CommandOutcome::failed(format!(
                    "{}/POSIX_ERROR_NONE volume {} exists",
                    ENTITY_EXISTS_MARKER, request.name
                )));
            }
            state
                .volumes
                .insert(request.name.clone(), request.configuration.clone());
        }

        self.attach(&request.name);
        Ok(CommandOutcome::ok())
    }

    async fn delete(&self, name: &str) -> Result<CommandOutcome> {
        {
            let mut state = self.state.lock();
            state.calls.push(BackendCall::Delete(name.to_string()));

            if let Some(message) = &state.delete_failure {
                return Ok(CommandOutcome::failed(message.clone()));
            }
            if state.volumes.remove(name).is_none() {
                return Ok(CommandOutcome::failed(format!("volume {} not found", name)));
            }
        }

        self.detach(name);
        Ok(CommandOutcome::ok())
    }

    async fn resolve(&self, name: &str) -> Result<CommandOutcome> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Resolve(name.to_string()));

        if state.volumes.contains_key(name) {
            Ok(CommandOutcome::ok())
        } else {
            Ok(CommandOutcome::failed(format!("volume {} not found", name)))
        }
    }
}
