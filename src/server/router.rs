//! Request routing by plugin API path

use tracing::{debug, warn};

use super::worker::{VolumeCall, WorkerHandle};
use crate::error::{PluginError, Result};
use crate::observer::VolumeName;
use crate::protocol::{ActivateResponse, PluginRequest, PluginResponse, Reply};

pub const PATH_ACTIVATE: &str = "/Plugin.Activate";
pub const PATH_CREATE: &str = "/VolumeDriver.Create";
pub const PATH_REMOVE: &str = "/VolumeDriver.Remove";
pub const PATH_MOUNT: &str = "/VolumeDriver.Mount";
pub const PATH_PATH: &str = "/VolumeDriver.Path";
pub const PATH_UNMOUNT: &str = "/VolumeDriver.Unmount";
pub const PATH_GET: &str = "/VolumeDriver.Get";
pub const PATH_LIST: &str = "/VolumeDriver.List";
pub const PATH_CAPABILITIES: &str = "/VolumeDriver.Capabilities";

/// Volumes live in a cluster-wide namespace
pub const VOLUME_SCOPE: &str = "global";

/// What a request path resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Activate,
    Capabilities,
    Volume(VolumeCall),
}

/// Map a request path and body to a route
pub fn route(path: &str, body: &[u8]) -> Result<Route> {
    let name_call = |f: fn(VolumeName) -> VolumeCall| -> Result<Route> {
        let request = PluginRequest::parse(body)?;
        Ok(Route::Volume(f(request.volume_name()?)))
    };

    match path {
        PATH_ACTIVATE => Ok(Route::Activate),
        PATH_CAPABILITIES => Ok(Route::Capabilities),
        PATH_CREATE => {
            let request = PluginRequest::parse(body)?;
            let name = request.volume_name()?;
            Ok(Route::Volume(VolumeCall::Create(
                name,
                request.create_options(),
            )))
        }
        PATH_REMOVE => name_call(VolumeCall::Remove),
        PATH_MOUNT => name_call(VolumeCall::Mount),
        PATH_PATH => name_call(VolumeCall::Path),
        PATH_UNMOUNT => name_call(VolumeCall::Unmount),
        PATH_GET => name_call(VolumeCall::Get),
        PATH_LIST => {
            PluginRequest::parse(body)?;
            Ok(Route::Volume(VolumeCall::List))
        }
        other => Err(PluginError::UnknownOperation(other.to_string())),
    }
}

/// Turns raw requests into replies, handing volume calls to the worker
#[derive(Clone)]
pub struct Dispatcher {
    worker: WorkerHandle,
}

impl Dispatcher {
    pub fn new(worker: WorkerHandle) -> Self {
        Self { worker }
    }

    pub async fn dispatch(&self, path: &str, body: &[u8]) -> Reply {
        let route = match route(path, body) {
            Ok(route) => route,
            Err(e) => {
                warn!(path, "Rejected request: {}", e);
                return PluginResponse::error(e).into();
            }
        };

        match route {
            Route::Activate => Reply::Activate(ActivateResponse::volume_driver()),
            Route::Capabilities => PluginResponse::capabilities(VOLUME_SCOPE).into(),
            Route::Volume(call) => match self.worker.submit(call).await {
                Ok(response) => {
                    if !response.is_ok() {
                        debug!(path, "Responding with error: {}", response.err);
                    }
                    response.into()
                }
                Err(e) => PluginResponse::error(e).into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::CreateOptions;

    fn name(s: &str) -> VolumeName {
        VolumeName::parse(s).unwrap()
    }

    #[test]
    fn test_routes() {
        assert_eq!(route(PATH_ACTIVATE, b"").unwrap(), Route::Activate);
        assert_eq!(route(PATH_CAPABILITIES, b"{}").unwrap(), Route::Capabilities);
        assert_eq!(
            route(PATH_CREATE, br#"{"Name":"vol1"}"#).unwrap(),
            Route::Volume(VolumeCall::Create(name("vol1"), CreateOptions::default()))
        );
        assert_eq!(
            route(PATH_REMOVE, br#"{"Name":"vol1"}"#).unwrap(),
            Route::Volume(VolumeCall::Remove(name("vol1")))
        );
        assert_eq!(
            route(PATH_MOUNT, br#"{"Name":"vol1","ID":"abc"}"#).unwrap(),
            Route::Volume(VolumeCall::Mount(name("vol1")))
        );
        assert_eq!(
            route(PATH_PATH, br#"{"Name":"vol1"}"#).unwrap(),
            Route::Volume(VolumeCall::Path(name("vol1")))
        );
        assert_eq!(
            route(PATH_UNMOUNT, br#"{"Name":"vol1","ID":"abc"}"#).unwrap(),
            Route::Volume(VolumeCall::Unmount(name("vol1")))
        );
        assert_eq!(
            route(PATH_GET, br#"{"Name":"vol1"}"#).unwrap(),
            Route::Volume(VolumeCall::Get(name("vol1")))
        );
        assert_eq!(route(PATH_LIST, b"{}").unwrap(), Route::Volume(VolumeCall::List));
        assert_eq!(route(PATH_LIST, b"").unwrap(), Route::Volume(VolumeCall::List));
    }

    #[test]
    fn test_unknown_path() {
        let err = route("/VolumeDriver.Snapshot", b"{}").unwrap_err();
        assert_eq!(err.to_string(), "Unknown API operation: /VolumeDriver.Snapshot");
    }

    #[test]
    fn test_bad_requests() {
        assert!(matches!(
            route(PATH_GET, b"{}"),
            Err(PluginError::MissingName)
        ));
        assert!(matches!(
            route(PATH_CREATE, b"[1,2"),
            Err(PluginError::MalformedRequest(_))
        ));
        assert!(matches!(
            route(PATH_PATH, br#"{"Name":"../etc"}"#),
            Err(PluginError::InvalidName(_))
        ));
    }
}
