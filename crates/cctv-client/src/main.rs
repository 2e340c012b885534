//! CCTV Monitor client entry point.
//!
//! Loads configuration, opens the connection to the monitoring server and
//! runs the event loop until Ctrl+C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig (file, then CLI/env overrides)
//!  └─ --save-config                  -> write it back and exit
//!  └─ ConnectionManager::new()      -- control channel (framed JSON)
//!  └─ ConnectionManager::new()      -- optional raw image channel
//!  └─ event loop
//!       ├─ Connected                 -> issue startup requests
//!       ├─ Message(event)            -> LineCatalog / ImageStore / log
//!       ├─ ImagesSalvaged            -> log recovered files
//!       └─ Error / Reconnecting      -> log; the manager retries on its own
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cctv_client::application::commands::ClientCommands;
use cctv_client::application::line_catalog::LineCatalog;
use cctv_client::infrastructure::network::{
    ChannelKind, ConnectionEvent, ConnectionManager,
};
use cctv_client::infrastructure::storage::config::{
    load_config, load_from_path, save_config, save_to_path, AppConfig,
};
use cctv_client::infrastructure::storage::image_store::ImageStore;
use cctv_core::{Event, FramingMode};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Framing convention accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FramingArg {
    LineDelimitedJson,
    LengthPrefixedBinary,
}

impl From<FramingArg> for FramingMode {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::LineDelimitedJson => FramingMode::LineDelimitedJson,
            FramingArg::LengthPrefixedBinary => FramingMode::LengthPrefixedBinary,
        }
    }
}

/// Resilient TCP client for the CCTV monitoring server.
///
/// Values given here override the configuration file.
#[derive(Debug, Parser)]
#[command(
    name = "cctv-client",
    about = "Protocol client for the CCTV monitoring server",
    version
)]
struct Cli {
    /// Server hostname or IP address.
    #[arg(long, env = "TCP_HOST")]
    host: Option<String>,

    /// Server TCP port.
    #[arg(long, env = "TCP_PORT")]
    port: Option<u16>,

    /// Message framing used by the server.
    #[arg(long, value_enum, env = "CCTV_FRAMING")]
    framing: Option<FramingArg>,

    /// Path to a config file instead of the platform default.
    #[arg(long, env = "CCTV_CONFIG")]
    config: Option<PathBuf>,

    /// Port of an unframed raw-image channel on the same host.
    #[arg(long, env = "CCTV_IMAGE_PORT")]
    image_port: Option<u16>,

    /// Request road and detection lines after connecting.
    #[arg(long)]
    request_lines: bool,

    /// Turn bounding-box streaming on after connecting.
    #[arg(long)]
    bbox: bool,

    /// Request stored images for this date (yyyy-MM-dd) after connecting.
    #[arg(long, value_name = "DATE")]
    images_date: Option<String>,

    /// Restrict the image request to one hour (0-23).
    #[arg(long, requires = "images_date")]
    images_hour: Option<u8>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Applies command-line and environment overrides on top of the file config.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(framing) = self.framing {
            config.server.framing = framing.into();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The log level comes from the config file, so load it before logging starts
    // and report any problem afterwards.
    let (mut config, config_problem) = match &cli.config {
        Some(path) => (
            load_from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None,
        ),
        None => match load_config() {
            Ok(config) => (config, None),
            Err(e) => (AppConfig::default(), Some(e)),
        },
    };
    cli.apply_to(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Some(e) = config_problem {
        warn!("using default configuration: {e}");
    }

    if cli.save_config {
        match &cli.config {
            Some(path) => save_to_path(&config, path)
                .with_context(|| format!("failed to save config to {}", path.display()))?,
            None => save_config(&config).context("failed to save config")?,
        }
        info!("configuration saved");
        return Ok(());
    }
    info!(
        "CCTV client starting; server={}:{} framing={:?}",
        config.server.host, config.server.port, config.server.framing
    );

    // ── Connections ───────────────────────────────────────────────────────────
    let (manager, mut events) =
        ConnectionManager::new(config.to_connection_config(ChannelKind::Framed(config.server.framing)));
    let manager = Arc::new(manager);
    manager
        .connect(config.server.host.clone(), config.server.port)
        .await
        .context("connection task is not running")?;

    let mut salvage = match cli.image_port {
        Some(port) => {
            let (salvage_manager, salvage_events) =
                ConnectionManager::new(config.to_connection_config(ChannelKind::ImageSalvage));
            salvage_manager
                .connect(config.server.host.clone(), port)
                .await
                .context("image channel task is not running")?;
            Some((salvage_manager, salvage_events))
        }
        None => None,
    };

    let commands = ClientCommands::new(Arc::clone(&manager));
    let store = ImageStore::new(config.images.output_dir.clone());
    let mut catalog = LineCatalog::new();

    // ── Event loop ────────────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("failed to listen for Ctrl+C: {e}");
                }
                info!("shutdown requested");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if matches!(event, ConnectionEvent::Connected { .. }) {
                    run_startup_requests(&cli, &commands).await;
                }
                handle_event(event, &mut catalog, &store);
            }
            event = recv_salvage(&mut salvage) => {
                match event {
                    Some(event) => handle_event(event, &mut catalog, &store),
                    None => salvage = None,
                }
            }
        }
    }

    if let Err(e) = manager.disconnect().await {
        warn!("disconnect failed: {e}");
    }
    if let Some((salvage_manager, _)) = &salvage {
        if let Err(e) = salvage_manager.disconnect().await {
            warn!("image channel disconnect failed: {e}");
        }
    }
    info!("CCTV client stopped");
    Ok(())
}

/// Issues the requests selected on the command line.
async fn run_startup_requests(cli: &Cli, commands: &ClientCommands<Arc<ConnectionManager>>) {
    if cli.request_lines {
        if let Err(e) = commands.request_road_lines().await {
            warn!("road line request failed: {e}");
        }
        if let Err(e) = commands.request_detection_lines().await {
            warn!("detection line request failed: {e}");
        }
    }
    if cli.bbox {
        if let Err(e) = commands.set_bbox_streaming(true).await {
            warn!("bounding-box request failed: {e}");
        }
    }
    if let Some(date) = &cli.images_date {
        if let Err(e) = commands.request_images(date, cli.images_hour).await {
            warn!("image request failed: {e}");
        }
    }
}

fn handle_event(event: ConnectionEvent, catalog: &mut LineCatalog, store: &ImageStore) {
    match event {
        ConnectionEvent::Connected { host, port } => info!("connected to {host}:{port}"),
        ConnectionEvent::Disconnected => warn!("disconnected from server"),
        ConnectionEvent::Error(e) => error!("connection error: {e}"),
        ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => info!("reconnecting ({attempt}/{max_attempts}) in {delay:?}"),
        ConnectionEvent::Protocol(e) => warn!("protocol error: {e}"),
        ConnectionEvent::Message(event) => handle_message(event, catalog, store),
        ConnectionEvent::ImagesSalvaged(images) => {
            for image in images {
                info!(
                    "salvaged {:?} {}x{} ({} bytes) -> {}",
                    image.format,
                    image.width,
                    image.height,
                    image.byte_len,
                    image.path.display()
                );
            }
        }
        ConnectionEvent::SalvageFailed(reason) => warn!("image salvage failed: {reason}"),
    }
}

fn handle_message(event: Event, catalog: &mut LineCatalog, store: &ImageStore) {
    if catalog.apply(&event) {
        info!(
            "line catalog updated: {} road, {} detection",
            catalog.road_lines().count(),
            catalog.detection_lines().count()
        );
        return;
    }
    match event {
        Event::ImagesReceived { images, skipped } => {
            if skipped > 0 {
                warn!("{skipped} image(s) had undecodable data");
            }
            if let Err(e) = store.save_all(&images) {
                error!("failed to store images: {e}");
            }
        }
        Event::BoundingBoxes(frame) => {
            info!("{} bounding box(es)", frame.bboxes.len());
        }
        other if other.is_failure() => warn!("{}: {other:?}", other.kind()),
        other => info!("{}: {other:?}", other.kind()),
    }
}

async fn recv_salvage(
    salvage: &mut Option<(ConnectionManager, mpsc::Receiver<ConnectionEvent>)>,
) -> Option<ConnectionEvent> {
    match salvage {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
