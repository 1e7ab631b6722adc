//! LanShare daemon entry point.
//!
//! Loads the configuration, builds the [`Application`], loads the built-in
//! plugins, and runs the event loop until Ctrl-C.
//!
//! ```text
//! main()
//!  └─ Application::new()        -- config + settings.toml identity store
//!  └─ load plugins
//!       ├─ LanPlugin             (transport/lan)
//!       └─ StaticDevicesPlugin   ([[devices]] enumerator)
//!  └─ LanListener accept loop    (Tokio task → Application::inbound_sender)
//!  └─ Application::run()         (until Ctrl-C)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lanshare_app::application::context::Application;
use lanshare_app::infrastructure::plugins::static_devices::StaticDevicesPlugin;
use lanshare_app::infrastructure::storage::config::{self, AppConfig};
use lanshare_app::infrastructure::storage::settings_store::TomlSettingsStore;
use lanshare_core::Transport;
use lanshare_lan::{LanListener, LanPlugin, TlsConfig};

#[derive(Debug, Parser)]
#[command(name = "lanshare", version, about = "Share files with devices on the local network")]
struct Cli {
    /// Path to config.toml.  Defaults to the platform config directory.
    #[arg(long, env = "LANSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Do not accept inbound transfers.
    #[arg(long)]
    no_listen: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_file_path()?,
    };
    let cfg: AppConfig = config::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level)),
        )
        .init();

    info!("LanShare starting (config {})", config_path.display());

    let settings_path = config_path.with_file_name("settings.toml");
    let store = TomlSettingsStore::open(&settings_path)
        .with_context(|| format!("opening {}", settings_path.display()))?;

    let listen = cfg.lan.listen && !cli.no_listen;
    let listen_addr = cfg.lan.listen_addr()?;
    let tls = cfg
        .lan
        .tls
        .as_ref()
        .map(TlsConfig::from_files)
        .transpose()
        .context("loading TLS material")?;
    let static_devices = cfg.devices.clone();

    let mut app = Application::new(cfg, Box::new(store));
    info!(
        "this device is {} ({}), version {}",
        app.device_display_name(),
        app.device_identifier(),
        app.version()
    );

    let lan_plugin = match &tls {
        Some(tls) => LanPlugin::with_tls(tls.clone()),
        None => LanPlugin::new(),
    };
    app.load_plugin(Arc::new(lan_plugin))?;
    app.load_plugin(Arc::new(StaticDevicesPlugin::new(static_devices)))?;

    // ── Inbound listener ──────────────────────────────────────────────────────
    if listen {
        let listener = LanListener::bind(listen_addr, tls).await?;
        let inbound = app.inbound_sender();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(transport) => {
                        let peer = transport
                            .peer_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        let boxed: Box<dyn Transport> = Box::new(transport);
                        if inbound.send((peer, boxed)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        });
    } else {
        info!("inbound transfers disabled");
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown = app.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                shutdown.request();
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("LanShare ready.  Press Ctrl-C to exit.");
    app.run().await;

    info!("LanShare stopped");
    Ok(())
}
