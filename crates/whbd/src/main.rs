//! whbd - Windhager Bridge Daemon
//!
//! Mirrors a Windhager heating controller into a host store and serves the
//! mirrored states over REST.
//!
//! Usage:
//!   whbd [OPTIONS] [config.toml]
//!
//! Options:
//!   --full-scan                  Scan every level of every function at connect
//!   --function-types <path>      Function-type configuration (.json/.yaml)
//!
//! Without a config file the defaults are used (controller on 127.0.0.1).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whb_api::{create_router, AppState};
use whb_bridge::{Bridge, Settings};
use whb_client::DeviceClient;
use whb_conv::FunctionTypeConfig;
use whb_core::{HostStore, MemoryStore};

/// Connect timeout of the controller client
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Parsed command-line arguments
struct Args {
    /// Daemon settings file (TOML)
    config_path: Option<String>,
    /// Overrides `bridge.full_scan`
    full_scan: bool,
    /// Overrides `bridge.function_types`
    function_types: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        full_scan: false,
        function_types: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--full-scan" => {
                result.full_scan = true;
                i += 1;
            }
            "--function-types" | "-f" => {
                if i + 1 < args.len() {
                    result.function_types = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    tracing::error!("Missing argument for --function-types");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"whbd - Windhager Bridge Daemon

Usage: whbd [OPTIONS] [config.toml]

Options:
      --full-scan               Scan every level of every function at connect
  -f, --function-types <path>   Function-type configuration (.json/.yaml/.yml)
  -h, --help                    Print this help message

Examples:
  # Run with config file
  whbd config/whbd.toml

  # Rescan the controller and use another function-type configuration
  whbd --full-scan -f config/function-types.yaml config/whbd.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "whbd=info,whb_bridge=info,whb_client=info,whb_api=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting whbd (Windhager Bridge Daemon)");

    let args = parse_args();

    let mut settings = match args.config_path {
        Some(ref path) => {
            tracing::info!("Loading config from: {}", path);
            Settings::load(path)?
        }
        None => {
            tracing::info!("No config file provided, using defaults");
            Settings::default()
        }
    };
    if args.full_scan {
        settings.bridge.full_scan = true;
    }
    if let Some(path) = args.function_types {
        settings.bridge.function_types = Some(PathBuf::from(path));
    }

    let config = match settings.bridge.function_types {
        Some(ref path) => {
            let config = FunctionTypeConfig::from_file(path)?;
            tracing::info!(
                path = %path.display(),
                function_types = config.known_fct_type.len(),
                "Loaded function-type configuration"
            );
            config
        }
        None => {
            tracing::warn!("No function-type configuration, datapoints stay unclassified");
            FunctionTypeConfig::default()
        }
    };

    // Host store
    let store = match settings.store.snapshot {
        Some(ref path) => Arc::new(MemoryStore::load(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    tracing::info!(objects = store.len(), "Host store opened");

    // Controller client
    let client = DeviceClient::with_config(
        &settings.device.host,
        &settings.device.username,
        &settings.device.password,
        settings.device.timeout(),
        std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS),
    )?;
    tracing::info!(url = %client.base_url(), "Controller client created");

    let host: Arc<dyn HostStore> = store.clone();
    let bridge = Arc::new(Bridge::new(
        settings.bridge.clone(),
        settings.device.language.clone(),
        Arc::new(client),
        host,
        config,
    ));

    let events = bridge.spawn_event_loop();

    // The connect retry may take minutes, so the API comes up first
    let starter = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.start().await {
                tracing::error!(error = %e, "Bridge failed to start");
            }
        })
    };

    let app = create_router(AppState::new(bridge.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    starter.abort();
    bridge.shutdown().await;
    if let Err(e) = events.await {
        tracing::warn!(error = %e, "Event loop ended abnormally");
    }

    if let Some(ref path) = settings.store.snapshot {
        store.save(path)?;
        tracing::info!(path = %path.display(), objects = store.len(), "Host store saved");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
    }
}
