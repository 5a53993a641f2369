//! Volume plugin wire format
//!
//! Request and response bodies of the engine's plugin API. Field names are
//! fixed by the engine. Every volume response carries `Err`, which is the
//! empty string on success.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, Result};
use crate::lifecycle::{CreateOptions, Volume};
use crate::observer::VolumeName;

/// Media type of every plugin response
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Option keys understood by create
pub const OPT_VOLUME_CONFIGURATION: &str = "volume_configuration";
pub const OPT_CONFIGURATION_NAME: &str = "configuration_name";
pub const OPT_USER: &str = "user";
pub const OPT_GROUP: &str = "group";

/// Body of every volume request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginRequest {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "Opts", default)]
    pub opts: Option<HashMap<String, Value>>,
}

impl PluginRequest {
    /// Parse a request body. An empty body is an empty request.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| PluginError::MalformedRequest(e.to_string()))
    }

    /// The validated `Name` field
    pub fn volume_name(&self) -> Result<VolumeName> {
        match self.name.as_deref() {
            Some(name) => VolumeName::parse(name),
            None => Err(PluginError::MissingName),
        }
    }

    /// String form of option `key`. Booleans and numbers are stringified,
    /// null counts as absent.
    pub fn option(&self, key: &str) -> Option<String> {
        match self.opts.as_ref()?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Create options carried in `Opts`; unknown keys are ignored
    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            configuration: self
                .option(OPT_VOLUME_CONFIGURATION)
                .or_else(|| self.option(OPT_CONFIGURATION_NAME)),
            user: self.option(OPT_USER),
            group: self.option(OPT_GROUP),
        }
    }
}

/// Volume descriptor as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

impl From<Volume> for VolumeInfo {
    fn from(volume: Volume) -> Self {
        Self {
            name: volume.name,
            mountpoint: path_string(&volume.mountpoint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "Scope")]
    pub scope: String,
}

/// Response to every `/VolumeDriver.*` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResponse {
    #[serde(rename = "Err", default)]
    pub err: String,

    #[serde(rename = "Mountpoint", skip_serializing_if = "Option::is_none", default)]
    pub mountpoint: Option<String>,

    #[serde(rename = "Volume", skip_serializing_if = "Option::is_none", default)]
    pub volume: Option<VolumeInfo>,

    #[serde(rename = "Volumes", skip_serializing_if = "Option::is_none", default)]
    pub volumes: Option<Vec<VolumeInfo>>,

    #[serde(rename = "Capabilities", skip_serializing_if = "Option::is_none", default)]
    pub capabilities: Option<Capabilities>,
}

impl PluginResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(err: impl Display) -> Self {
        Self {
            err: err.to_string(),
            ..Self::default()
        }
    }

    pub fn mountpoint(path: &Path) -> Self {
        Self {
            mountpoint: Some(path_string(path)),
            ..Self::default()
        }
    }

    pub fn volume(volume: Volume) -> Self {
        Self {
            volume: Some(volume.into()),
            ..Self::default()
        }
    }

    pub fn volumes(volumes: Vec<Volume>) -> Self {
        Self {
            volumes: Some(volumes.into_iter().map(VolumeInfo::from).collect()),
            ..Self::default()
        }
    }

    pub fn capabilities(scope: &str) -> Self {
        Self {
            capabilities: Some(Capabilities {
                scope: scope.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}

/// Response to `/Plugin.Activate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

impl ActivateResponse {
    pub fn volume_driver() -> Self {
        Self {
            implements: vec!["VolumeDriver".to_string()],
        }
    }
}

/// Any body the server writes back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Activate(ActivateResponse),
    Volume(PluginResponse),
}

impl Reply {
    pub fn to_json(&self) -> Vec<u8> {
        // Both variants are plain structs of strings; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"Err\":\"internal error\"}".to_vec())
    }
}

impl From<PluginResponse> for Reply {
    fn from(response: PluginResponse) -> Self {
        Reply::Volume(response)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
