//! ft8-feed CLI - Stream FT8 decodes from a feed server and print them.

use anyhow::{Context, Result};
use clap::Parser;
use ft8_feed::{
    config::Config,
    decode::{Band, DecodeRecord},
    grid::Coordinate,
    service::DecodeService,
    store::DecodeObserver,
    transport::{FeedTransport, TransportKind},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// ft8-feed - Stream FT8 decodes from a network feed
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "FT8_FEED_CONFIG")]
    config: Option<PathBuf>,

    /// Feed server hostname or address
    #[arg(long, env = "FT8_FEED_HOST")]
    host: Option<String>,

    /// Feed server port
    #[arg(long, env = "FT8_FEED_PORT")]
    port: Option<u16>,

    /// Transport used to read decodes
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Band to announce on connect (e.g. 20m, or "Select Band" for none)
    #[arg(short, long)]
    band: Option<String>,

    /// Receiver grid locator, used for distances (e.g. FN42)
    #[arg(short, long)]
    grid: Option<String>,

    /// Show distances in kilometers
    #[arg(long)]
    km: bool,

    /// Upload the receiver position every N seconds
    #[arg(long)]
    upload_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,
}

impl Args {
    /// Apply command-line overrides on top of the file config.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(band) = &self.band {
            config.band = Band::parse_selection(band)?;
        }
        if self.km {
            config.use_miles = false;
        }
        if let Some(interval) = self.upload_interval {
            config.position_upload.enabled = true;
            config.position_upload.interval = interval;
        }
        if let Some(grid) = &self.grid {
            let center = ft8_feed::grid::locator_to_coordinate(grid)
                .with_context(|| format!("Invalid grid locator: {}", grid))?;
            config.receiver = Some(ft8_feed::config::ReceiverConfig {
                latitude: center.latitude,
                longitude: center.longitude,
            });
        }
        Ok(())
    }
}

/// Prints each decode as it arrives.
struct PrintObserver {
    receiver: Option<Coordinate>,
    use_miles: bool,
}

impl DecodeObserver for PrintObserver {
    fn on_new_decode(&self, record: &DecodeRecord) {
        println!("{}", record.display_text(self.receiver, self.use_miles));
    }

    fn on_cleared(&self) {
        println!("-- cleared --");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config)?;
    config.validate()?;

    info!("ft8-feed starting...");
    info!("Server: {}:{} ({})", config.host, config.port, config.transport);
    if let Some(band) = config.band {
        info!("Band: {}", band);
    }

    let transport = FeedTransport::new(config.transport, config.timeouts())
        .context("Failed to create transport")?;
    let (service, mut events) = DecodeService::new(transport, config.client_config());

    let receiver = config.receiver_coordinate();
    service.update_position(receiver);
    service.select_band(config.band);
    service.store().subscribe(Arc::new(PrintObserver {
        receiver,
        use_miles: config.use_miles,
    }));

    let upload_interval = Duration::from_secs(config.position_upload.interval);
    let uploader = config
        .position_upload
        .enabled
        .then(|| service.spawn_position_uploader(upload_interval));

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx_clone.send(true);
    });

    // Optional max runtime
    if args.max_runtime > 0 {
        let max_runtime = Duration::from_secs(args.max_runtime);
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(max_runtime).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    service.start(config.host.clone(), config.port).await;

    // Main event loop
    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
            event = events.recv() => match event {
                Some(event) => info!("{}", event),
                None => break,
            },
        }
    }

    service.stop().await;
    if let Some(uploader) = uploader {
        uploader.abort();
    }

    println!("\n{} decodes retained", service.store().len());

    Ok(())
}
