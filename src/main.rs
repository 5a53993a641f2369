//! quobyte-docker-volume daemon entry point

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quobyte_docker_volume::backend::qmgmt::QmgmtBackend;
use quobyte_docker_volume::config::Config;
use quobyte_docker_volume::lifecycle::VolumeManager;
use quobyte_docker_volume::mount::NamespaceMount;
use quobyte_docker_volume::server::PluginServer;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: quobyte-docker-volume [config.yaml]");
    eprintln!();
    eprintln!("quobyte-docker-volume - Docker volume plugin for Quobyte");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file (optional)");
    eprintln!();
    eprintln!("Without a configuration file, settings are read from QUOBYTE_API_URL,");
    eprintln!("QUOBYTE_API_USER, QUOBYTE_API_PASSWORD, QUOBYTE_REGISTRY and the other");
    eprintln!("QUOBYTE_* variables. Environment variables always override the file.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  quobyte-docker-volume /etc/quobyte/docker-volume.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = match args.get(1).map(String::as_str) {
        Some("-V") | Some("--version") => {
            println!("quobyte-docker-volume {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("-h") | Some("--help") => {
            print_usage();
            return Ok(());
        }
        _ if args.len() > 2 => {
            print_usage();
            std::process::exit(1);
        }
        Some(path) => Some(PathBuf::from(path)),
        None => None,
    };

    // Load configuration
    let loaded = match &config_path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("quobyte-docker-volume {} starting", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Loaded configuration from environment"),
    }

    // Attach the namespace before accepting any plugin call
    let namespace = NamespaceMount::new(&config);
    if let Err(e) = namespace.ensure_mounted().await {
        error!("{}", e);
        std::process::exit(1);
    }

    let backend = Arc::new(QmgmtBackend::new(config.api.clone(), &config.binaries));
    let manager = Arc::new(VolumeManager::new(backend, &config));

    let server = match PluginServer::bind(&config.socket.path, config.socket.gid, manager) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Set up signal handling for graceful shutdown
    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = stop_tx.send(true);
    })?;

    info!("Serving volume plugin API, press Ctrl+C to exit");
    server
        .serve(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Plugin socket closed, exiting");
    Ok(())
}
