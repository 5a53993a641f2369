use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for volume plugin operations.
///
/// The `Display` text of the lifecycle variants is what the engine sees in
/// the `Err` field of a plugin response, so those strings are part of the
/// wire contract.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Not mounted: {0}")]
    NotMounted(String),

    #[error("Mount not ready: {0}")]
    MountNotReady(String),

    #[error("Could not delete {0}")]
    DeleteFailed(String),

    #[error("{0}")]
    Backend(String),

    #[error("Invalid volume name: {0}")]
    InvalidName(String),

    #[error("Unknown API operation: {0}")]
    UnknownOperation(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Missing Name in request")]
    MissingName,

    #[error("Plugin worker is not running")]
    WorkerGone,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind plugin socket {0:?}: {1}")]
    Bind(PathBuf, String),

    #[error("Namespace mount failed: {0}")]
    Mount(String),
}

/// Result type alias for volume plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_messages() {
        assert_eq!(
            PluginError::NotMounted("vol1".into()).to_string(),
            "Not mounted: vol1"
        );
        assert_eq!(
            PluginError::DeleteFailed("vol1".into()).to_string(),
            "Could not delete vol1"
        );
        assert_eq!(
            PluginError::UnknownOperation("/VolumeDriver.Frobnicate".into()).to_string(),
            "Unknown API operation: /VolumeDriver.Frobnicate"
        );
        assert_eq!(
            PluginError::Backend("quota exceeded".into()).to_string(),
            "quota exceeded"
        );
    }
}
