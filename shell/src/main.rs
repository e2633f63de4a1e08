//! Terminal host for the SmartInfoQueue core.
//!
//! Loads configuration, wires the real collaborators into a [`Runtime`] and
//! turns stdin lines into events. Every published view is printed.

mod commands;
mod render;
mod store;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shared::capabilities::{
    FixedGeolocation, GeolocationProvider, Position, UnsupportedGeolocation,
};
use shared::{AppConfig, Collaborators, Event, Runtime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, HELP};
use crate::store::FileKvStore;
use crate::transport::ReqwestTransport;

const APP_DIR: &str = "smartinfoqueue";
const CONFIG_FILE: &str = "config.yaml";
const STORE_FILE: &str = "state.json";

#[derive(Parser, Debug)]
#[command(name = "smartinfoqueue", version, about = "A location-aware guide in your terminal")]
struct Cli {
    /// Config file (default: <config dir>/smartinfoqueue/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where saved state lives (default: <data dir>/smartinfoqueue)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Fixed latitude reported as the device position
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Fixed longitude reported as the device position
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE)),
    };

    let config = match path {
        Some(path) if explicit.is_some() || path.exists() => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded config");
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        _ => {
            tracing::info!("no config file, using defaults");
            AppConfig::default()
        }
    };
    Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
}

fn data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No data directory on this platform, pass --data-dir")?
            .join(APP_DIR),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let store_path = data_dir(cli.data_dir)?.join(STORE_FILE);

    let geolocation: Arc<dyn GeolocationProvider> = match (cli.lat, cli.lon) {
        (Some(lat), Some(lon)) => Arc::new(FixedGeolocation(Position::new(lat, lon))),
        _ => Arc::new(UnsupportedGeolocation),
    };
    let collaborators = Collaborators {
        http: Arc::new(ReqwestTransport::new()?),
        kv: Arc::new(FileKvStore::new(&store_path)),
        geolocation,
    };

    let (runtime, handle) =
        Runtime::new(config, collaborators).context("Invalid configuration")?;
    let runtime_task = tokio::spawn(runtime.run());

    let mut watcher = handle.clone();
    let printer = tokio::spawn(async move {
        while let Ok(view) = watcher.changed().await {
            println!("{}", render::render(&view));
        }
    });

    tracing::info!(store = %store_path.display(), "SmartInfoQueue started");
    handle.send(Event::AppStarted)?;
    println!("{HELP}\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Help)) => println!("{HELP}"),
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Dispatch(event))) => handle.send(event)?,
            Err(e) => println!("{e}"),
        }
    }

    printer.abort();
    let _ = printer.await;
    drop(handle);
    runtime_task.await.context("Runtime task failed")?;
    tracing::info!("bye");
    Ok(())
}
