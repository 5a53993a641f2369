//! Backend adapter for the `qmgmt` management CLI
//!
//! Every operation runs `qmgmt -u <api-url> volume ...` to completion. The
//! API credentials are handed to the child through its environment so they
//! never show up in the process list.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Backend, CommandOutcome, CreateRequest};
use crate::config::{ApiConfig, BinariesConfig};
use crate::error::{PluginError, Result};

/// Name of the management binary
pub const QMGMT_BINARY: &str = "qmgmt";

const ENV_CHILD_USER: &str = "QUOBYTE_API_USER";
const ENV_CHILD_PASSWORD: &str = "QUOBYTE_API_PASSWORD";

/// Shells out to `qmgmt` for create/delete/resolve
#[derive(Debug, Clone)]
pub struct QmgmtBackend {
    binary: PathBuf,
    api: ApiConfig,
}

impl QmgmtBackend {
    pub fn new(api: ApiConfig, binaries: &BinariesConfig) -> Self {
        let binary = match &binaries.qmgmt_path {
            Some(dir) => dir.join(QMGMT_BINARY),
            None => PathBuf::from(QMGMT_BINARY),
        };
        Self { binary, api }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    fn base_args(&self) -> Vec<String> {
        vec!["-u".to_string(), self.api.url.clone(), "volume".to_string()]
    }

    pub(crate) fn create_args(&self, request: &CreateRequest) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "create".to_string(),
            request.name.clone(),
            request.user.clone(),
            request.group.clone(),
            request.configuration.clone(),
            request.mode.clone(),
        ]);
        args
    }

    pub(crate) fn delete_args(&self, name: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["delete".to_string(), "-f".to_string(), name.to_string()]);
        args
    }

    pub(crate) fn resolve_args(&self, name: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["resolve".to_string(), name.to_string()]);
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<CommandOutcome> {
        debug!("Running {:?} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .env(ENV_CHILD_USER, &self.api.user)
            .env(ENV_CHILD_PASSWORD, &self.api.password)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PluginError::Backend(format!("Failed to run {:?}: {}", self.binary, e))
            })?;

        let outcome = outcome_from(&output);
        if !outcome.success {
            warn!(
                code = ?output.status.code(),
                "{} {} failed: {}",
                QMGMT_BINARY,
                args.get(3).map(String::as_str).unwrap_or_default(),
                outcome.output
            );
        }
        Ok(outcome)
    }
}

/// Diagnostic text is stderr when there is any, stdout otherwise
fn outcome_from(output: &Output) -> CommandOutcome {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };

    CommandOutcome {
        success: output.status.success(),
        output: text,
    }
}

#[async_trait]
impl Backend for QmgmtBackend {
    async fn create(&self, request: &CreateRequest) -> Result<CommandOutcome> {
        self.run(self.create_args(request)).await
    }

    async fn delete(&self, name: &str) -> Result<CommandOutcome> {
        self.run(self.delete_args(name)).await
    }

    async fn resolve(&self, name: &str) -> Result<CommandOutcome> {
        self.run(self.resolve_args(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn api() -> ApiConfig {
        ApiConfig {
            url: "http://api:7860".to_string(),
            user: "docker".to_string(),
            password: "pw".to_string(),
        }
    }

    /// Install a fake `qmgmt` that logs its arguments and user, and fails
    /// `resolve` for any volume called "missing".
    fn fake_qmgmt(dir: &TempDir) -> BinariesConfig {
        let log = dir.path().join("calls.log");
        let script = format!(
            "#!/bin/sh\n\
             echo \"$QUOBYTE_API_USER $*\" >> {log}\n\
             if [ \"$4\" = resolve ] && [ \"$5\" = missing ]; then\n\
               echo 'no such volume' >&2\n\
               exit 1\n\
             fi\n\
             echo done\n",
            log = log.display()
        );
        let path = dir.path().join(QMGMT_BINARY);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        BinariesConfig {
            qmgmt_path: Some(dir.path().to_path_buf()),
            mount_path: None,
        }
    }

    #[test]
    fn test_binary_lookup() {
        let backend = QmgmtBackend::new(api(), &BinariesConfig::default());
        assert_eq!(backend.binary(), &PathBuf::from("qmgmt"));

        let binaries = BinariesConfig {
            qmgmt_path: Some(PathBuf::from("/opt/quobyte/bin")),
            mount_path: None,
        };
        let backend = QmgmtBackend::new(api(), &binaries);
        assert_eq!(backend.binary(), &PathBuf::from("/opt/quobyte/bin/qmgmt"));
    }

    #[test]
    fn test_command_lines() {
        let backend = QmgmtBackend::new(api(), &BinariesConfig::default());

        assert_eq!(
            backend.create_args(&CreateRequest::new("vol1", "BASE")).join(" "),
            "-u http://api:7860 volume create vol1 root root BASE 777"
        );
        assert_eq!(
            backend.delete_args("vol1").join(" "),
            "-u http://api:7860 volume delete -f vol1"
        );
        assert_eq!(
            backend.resolve_args("vol1").join(" "),
            "-u http://api:7860 volume resolve vol1"
        );
    }

    #[tokio::test]
    async fn test_runs_binary() {
        let dir = TempDir::new().unwrap();
        let backend = QmgmtBackend::new(api(), &fake_qmgmt(&dir));

        let outcome = backend.resolve("vol1").await.unwrap();
        assert_eq!(outcome, CommandOutcome { success: true, output: "done".to_string() });

        let outcome = backend.resolve("missing").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.output, "no such volume");

        let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(log.contains("docker -u http://api:7860 volume resolve vol1"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let binaries = BinariesConfig {
            qmgmt_path: Some(PathBuf::from("/nonexistent/bin")),
            mount_path: None,
        };
        let backend = QmgmtBackend::new(api(), &binaries);
        assert!(matches!(
            backend.delete("vol1").await,
            Err(PluginError::Backend(_))
        ));
    }
}
