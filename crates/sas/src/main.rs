//! SAS Server
//!
//! Loads the configured service components and runs their interfaces until
//! the process is asked to stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info};

use sas::config::{EnvConfigReader, HostSettings, LayeredConfigReader, TomlConfigReader};
use sas::logging::{self, LogOptions};
use sas::server::Server;
use sas_core::{DynamicLibraryOpener, ErrorList, StaticLibraryOpener};

/// Component path of the linked-in bypass component
const BUILTIN_BYPASS: &str = "builtin:bypass";

/// Service Application Server
#[derive(Parser, Debug)]
#[command(name = "sas")]
#[command(about = "Hosts pluggable service components", long_about = None)]
struct Args {
    /// TOML configuration file; environment variables (`SAS__COMPONENTS`)
    /// override its entries
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, used when RUST_LOG is unset
    #[arg(long)]
    log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Arguments handed to the components
    #[arg(last = true)]
    component_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = args
        .config
        .as_ref()
        .map(TomlConfigReader::from_path)
        .transpose()?
        .map(Arc::new);
    let settings = match &file {
        Some(file) => file.settings()?,
        None => HostSettings::default(),
    };

    let mut log = LogOptions::default().with_json(args.json_logs || settings.logging.json);
    if let Some(filter) = args.log.clone().or(settings.logging.filter) {
        log = log.with_filter(filter);
    }
    logging::init(&log)?;

    info!("Starting SAS v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LayeredConfigReader::new().with_layer(Arc::new(EnvConfigReader::new()));
    if let (Some(file), Some(path)) = (file, &args.config) {
        info!("Using configuration file: {}", path.display());
        config = config.with_layer(file);
    }

    let opener = StaticLibraryOpener::new()
        .with_component(
            BUILTIN_BYPASS,
            sas_bypass::__sas_attach_component,
            sas_bypass::__sas_detach_component,
        )
        .with_fallback(DynamicLibraryOpener);

    let component_args = std::iter::once("sas".to_string())
        .chain(args.component_args)
        .collect();
    let server = Server::new(Arc::new(config), component_args, opener);

    let mut errors = ErrorList::new();
    if !server.start(&mut errors) {
        for entry in &errors {
            error!("{}", entry);
        }
        bail!("SAS could not be started: {}", errors.join("; "));
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(shutdown_signal());

    server.stop();
    info!("SAS shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
