//! quobyte-docker-volume: a Docker volume plugin for Quobyte
//!
//! The daemon mounts the whole Quobyte namespace once and then answers the
//! engine's volume plugin API on a Unix socket, creating and deleting
//! volumes through the management CLI.
//!
//! # Architecture
//!
//! - **Backend**: volume create/delete/resolve against the cluster, behind
//!   the `Backend` trait (`qmgmt` CLI adapter, in-memory adapter for tests).
//! - **Observer**: the mount root is the only source of truth for whether a
//!   volume is mounted; a volume is mounted iff its directory exists.
//! - **Lifecycle**: the plugin operations, including waiting for a freshly
//!   created volume to show up under the mount root.
//! - **Server**: HTTP/1.1 over a Unix socket, with every volume operation
//!   serialized through a single worker task.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use quobyte_docker_volume::backend::qmgmt::QmgmtBackend;
//! use quobyte_docker_volume::config::Config;
//! use quobyte_docker_volume::lifecycle::VolumeManager;
//! use quobyte_docker_volume::server::PluginServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let backend = Arc::new(QmgmtBackend::new(config.api.clone(), &config.binaries));
//! let manager = Arc::new(VolumeManager::new(backend, &config));
//!
//! let server = PluginServer::bind(&config.socket.path, config.socket.gid, manager)?;
//! server.serve(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod mount;
pub mod observer;
pub mod protocol;
pub mod server;
pub mod wait;

pub use error::{PluginError, Result};
