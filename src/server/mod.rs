//! Plugin socket server
//!
//! Speaks HTTP/1.1 on a Unix domain socket. Every recognised request gets a
//! `200 OK` with a JSON body; failures travel in the body's `Err` field.
//! Connections are served concurrently, but all volume operations go
//! through the single [`worker`].

pub mod router;
pub mod worker;

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, Result};
use crate::lifecycle::VolumeManager;
use crate::protocol::{PluginResponse, Reply, PLUGIN_CONTENT_TYPE};

pub use router::{route, Dispatcher, Route};
pub use worker::{spawn_worker, VolumeCall, WorkerHandle, DEFAULT_QUEUE_DEPTH};

/// Bind `path`, replacing a stale socket file left by an earlier run.
///
/// Missing parent directories are created. With `gid` set, the socket file
/// is handed to that group so the engine can connect without root.
pub fn bind_socket(path: &Path, gid: Option<u32>) -> Result<UnixListener> {
    let bind_err = |e: io::Error| PluginError::Bind(path.to_path_buf(), e.to_string());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(bind_err)?;
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_err)?;

    if let Some(gid) = gid {
        std::os::unix::fs::chown(path, None, Some(gid)).map_err(bind_err)?;
    }

    Ok(listener)
}

/// Volume plugin server bound to its socket
pub struct PluginServer {
    listener: UnixListener,
    socket_path: PathBuf,
    dispatcher: Dispatcher,
    worker_task: JoinHandle<()>,
}

impl PluginServer {
    /// Bind the socket and start the lifecycle worker
    pub fn bind(path: &Path, gid: Option<u32>, manager: Arc<VolumeManager>) -> Result<Self> {
        let listener = bind_socket(path, gid)?;
        let (worker, worker_task) = spawn_worker(manager, DEFAULT_QUEUE_DEPTH);
        info!("Plugin socket listening on {:?}", path);

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
            dispatcher: Dispatcher::new(worker),
            worker_task,
        })
    }

    /// Accept connections until `shutdown` resolves, then close open
    /// connections, let the worker drain and remove the socket file.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let PluginServer {
            listener,
            socket_path,
            dispatcher,
            worker_task,
        } = self;

        tokio::pin!(shutdown);
        let mut connections = Vec::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down plugin server");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.retain(|c: &JoinHandle<()>| !c.is_finished());
                        connections.push(tokio::spawn(serve_connection(stream, dispatcher.clone())));
                    }
                    Err(e) => warn!("Failed to accept plugin connection: {}", e),
                },
            }
        }

        drop(listener);
        // Idle keep-alive connections would otherwise hold shutdown open; the
        // worker still finishes whatever it already dequeued.
        for connection in connections {
            connection.abort();
            let _ = connection.await;
        }
        drop(dispatcher);
        if let Err(e) = worker_task.await {
            error!("Lifecycle worker failed: {}", e);
        }

        if let Err(e) = std::fs::remove_file(&socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove socket {:?}: {}", socket_path, e);
            }
        }
        Ok(())
    }
}

async fn serve_connection(stream: UnixStream, dispatcher: Dispatcher) {
    let service = service_fn(move |request| {
        let dispatcher = dispatcher.clone();
        async move { Ok::<_, Infallible>(handle(&dispatcher, request).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Plugin connection closed with error: {}", e);
    }
}

/// Read the whole body, dispatch, and wrap the reply
async fn handle(dispatcher: &Dispatcher, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = request.uri().path().to_string();
    debug!(method = %request.method(), path = %path, "Plugin request");

    let reply = match request.into_body().collect().await {
        Ok(body) => dispatcher.dispatch(&path, &body.to_bytes()).await,
        Err(e) => Reply::from(PluginResponse::error(PluginError::MalformedRequest(
            e.to_string(),
        ))),
    };

    let mut response = Response::new(Full::new(Bytes::from(reply.to_json())));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plugins/quobyte.sock");

        let first = bind_socket(&path, None).unwrap();
        drop(first);
        assert!(path.exists());

        let _second = bind_socket(&path, None).unwrap();
        let file_type = std::fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_socket());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quobyte.sock");
        std::fs::write(&path, b"leftover").unwrap();

        let _listener = bind_socket(&path, None).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());
    }

    #[tokio::test]
    async fn test_bind_fails_when_path_is_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quobyte.sock");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"").unwrap();

        assert!(matches!(
            bind_socket(&path, None),
            Err(PluginError::Bind(..))
        ));
    }
}
