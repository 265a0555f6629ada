//! sdbridge
//!
//! Uploads files to an SD-card-class USB mass-storage device through a
//! single managed session: acquire the device, queue one file slot per
//! path, drain the chunked transfers in order, and report per-slot results.

use anyhow::{Context, Result, anyhow};
use bridge::config::BridgeConfig;
use bridge::queue::Endpoints;
use bridge::session::{FilterPicker, SessionManager, SessionSettings};
use bridge::upload::UploadCoordinator;
use bridge::usb::{RusbBackend, spawn_usb_worker};
use clap::Parser;
use common::{DeviceEvent, UsbBridge, create_usb_bridge, setup_logging};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use types::SlotState;

#[derive(Parser, Debug)]
#[command(name = "sdbridge")]
#[command(
    author,
    version,
    about = "Upload files to a USB mass-storage device over one managed session"
)]
#[command(long_about = "
Acquires a session on one USB mass-storage device (open, select
configuration, claim interface), uploads the given files as chunked bulk
transfers in strict order, and releases the device again.

EXAMPLES:
    # Upload two files to the first matching device
    sdbridge --device 0x0781:* firmware.bin data.img

    # List USB devices without acquiring anything
    sdbridge --list-devices

    # Verify every written chunk by reading it back
    sdbridge --verify backup.tar

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/sdbridge/sdbridge.toml
    3. /etc/sdbridge/sdbridge.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Device filter as VID:PID (wildcards allowed, repeatable)
    #[arg(short, long, value_name = "VID:PID")]
    device: Vec<String>,

    /// Maximum chunk size in bytes
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Read every written chunk back and verify its checksum
    #[arg(long)]
    verify: bool,

    /// Files to upload, one slot each
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    // CLI flags override the config file
    if !args.device.is_empty() {
        config.device.filters = args.device.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        config.transfer.chunk_size = chunk_size;
    }
    if args.verify {
        config.transfer.verify_writes = true;
    }
    config.validate()?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.bridge.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("sdbridge v{}", env!("CARGO_PKG_VERSION"));

    let backend = RusbBackend::new(config.device.timeout())
        .map_err(|e| anyhow!("USB context unavailable: {}", e))?;
    let (usb_bridge, worker) = create_usb_bridge();
    let worker_handle = spawn_usb_worker(backend, worker);

    let result = run(&args, &config, usb_bridge.clone()).await;

    info!("Shutting down USB worker...");
    if let Err(e) = usb_bridge.shutdown().await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    if let Err(e) = worker_handle.join() {
        error!("USB worker thread panicked: {:?}", e);
    }

    result
}

async fn run(args: &Args, config: &BridgeConfig, usb_bridge: UsbBridge) -> Result<()> {
    if args.list_devices {
        return list_devices_mode(&usb_bridge).await;
    }
    if args.files.is_empty() {
        return Err(anyhow!("no files to upload; pass at least one path"));
    }

    let manager = Arc::new(SessionManager::new(
        usb_bridge.clone(),
        SessionSettings {
            configuration: config.device.configuration,
            interface: config.device.interface,
        },
    ));
    let picker = FilterPicker::new(config.device.filters.clone());
    let session = manager
        .acquire(&picker)
        .await
        .map_err(|e| anyhow!("failed to acquire device session: {}", e))?;

    // Forward unplug notifications so the session closes cleanly
    let events = usb_bridge.clone();
    let event_manager = manager.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_event().await {
            match event {
                DeviceEvent::Unplugged { device } => event_manager.handle_unplug(device).await,
            }
        }
    });

    let coordinator = UploadCoordinator::new(
        usb_bridge.clone(),
        session.clone(),
        Endpoints {
            bulk_in: config.device.endpoint_in,
            bulk_out: config.device.endpoint_out,
        },
        config.transfer.verify_writes,
    );

    for path in &args.files {
        let payload =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let slot = coordinator.create_slot(label, payload).await;
        coordinator
            .submit(slot, config.transfer.chunk_size)
            .await
            .map_err(|e| anyhow!("failed to submit {}: {}", path.display(), e))?;
    }

    coordinator.drain().await;

    let mut failed = 0;
    for progress in coordinator.progress_all().await {
        match progress.state {
            SlotState::Complete => {
                info!(
                    "{}: {} bytes uploaded",
                    progress.label, progress.bytes_transferred
                );
            }
            SlotState::Failed => {
                failed += 1;
                let cause = progress
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                error!(
                    "{}: failed after {} of {} bytes: {}",
                    progress.label, progress.bytes_transferred, progress.total_size, cause
                );
            }
            state => warn!("{}: left in state {:?}", progress.label, state),
        }
    }

    manager.release(&session).await;
    event_task.abort();

    if failed > 0 {
        Err(anyhow!("{} upload(s) failed", failed))
    } else {
        Ok(())
    }
}

async fn list_devices_mode(usb_bridge: &UsbBridge) -> Result<()> {
    let devices = usb_bridge
        .list_devices()
        .await
        .map_err(|e| anyhow!("device enumeration failed: {}", e))?;

    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }

    println!("Connected USB devices:");
    for device in devices {
        let product = device.product.as_deref().unwrap_or("(unknown)");
        println!(
            "  {:04x}:{:04x}  bus {:03} addr {:03}  {}",
            device.vendor_id, device.product_id, device.bus_number, device.device_address, product
        );
    }
    Ok(())
}
