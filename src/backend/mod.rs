pub mod memory;
pub mod qmgmt;

use async_trait::async_trait;

use crate::error::Result;

/// Root directory mode applied to every new volume
pub const DEFAULT_VOLUME_MODE: &str = "777";

/// Diagnostic emitted by the management API when the volume already exists
pub const ENTITY_EXISTS_MARKER: &str = "ENTITY_EXISTS_ALREADY";

/// Parameters for creating a volume in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Backend volume name (first segment of the engine's name)
    pub name: String,
    /// Storage policy / volume configuration
    pub configuration: String,
    /// Owner of the volume root
    pub user: String,
    /// Owning group of the volume root
    pub group: String,
    /// Octal mode of the volume root
    pub mode: String,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configuration: configuration.into(),
            user: "root".to_string(),
            group: "root".to_string(),
            mode: DEFAULT_VOLUME_MODE.to_string(),
        }
    }
}

/// Result of one backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// Diagnostic text from the backend, trimmed
    pub output: String,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            output: String::new(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    /// Whether a failed create only reports that the volume is already there
    pub fn already_exists(&self) -> bool {
        !self.success && self.output.contains(ENTITY_EXISTS_MARKER)
    }
}

/// Volume management operations against the storage cluster
///
/// Implementations report the backend's verdict in [`CommandOutcome`]; an
/// `Err` means the backend could not be asked at all (e.g. the binary is
/// missing).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create a volume
    async fn create(&self, request: &CreateRequest) -> Result<CommandOutcome>;

    /// Force-delete a volume
    async fn delete(&self, name: &str) -> Result<CommandOutcome>;

    /// Look a volume up; `success == false` means it does not exist
    async fn resolve(&self, name: &str) -> Result<CommandOutcome>;
}
