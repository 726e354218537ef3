//! §6.5 CLI entry point: `fieldbus-bridge <module_config_path> <devices_config_path> [log_level]`.

use anyhow::{bail, Context};
use fieldbus_bridge::bridge::Bridge;
use fieldbus_bridge::config::{ConnectionConfig, DevicesConfig, ModuleConfig};
use fieldbus_bridge::lifecycle::LifecycleController;
use fieldbus_bridge::persistence::KeyValuePersistence;
use fieldbus_bridge::platform::logging::LoggingPlatformClient;
use fieldbus_bridge::platform::PlatformClient;
use fieldbus_bridge::poller::{Poller, PollerConfig};
use fieldbus_bridge::slave_device::SlaveDevice;
use fieldbus_bridge::transport::{tcp_shared, TcpTransportConfig, Transport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    module_config_path: String,
    devices_config_path: String,
    log_level: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let module_config_path = args.next().context("missing <module_config_path>")?;
    let devices_config_path = args.next().context("missing <devices_config_path>")?;
    let log_level = args.next().unwrap_or_else(|| "INFO".to_string());
    let log_level = match log_level.to_ascii_uppercase().as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" => log_level.to_ascii_uppercase(),
        _ => "INFO".to_string(),
    };
    Ok(Args { module_config_path, devices_config_path, log_level })
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let module = ModuleConfig::load(&args.module_config_path).context("loading module config")?;
    let devices_cfg = DevicesConfig::load(&args.devices_config_path).context("loading devices config")?;
    let resolved = fieldbus_bridge::config::resolve_devices(&module, &devices_cfg)?;

    let transport: Arc<dyn Transport> = match &module.connection {
        ConnectionConfig::TcpIp { host, port } => {
            let remote_addr = format!("{host}:{port}").parse().context("parsing TcpIp host:port")?;
            tcp_shared(TcpTransportConfig {
                remote_addr,
                response_timeout: module.response_timeout(),
                ..Default::default()
            })
        }
        #[cfg(feature = "modbus-rtu")]
        ConnectionConfig::SerialRtu { port, baud, data_bits, stop_bits, parity } => {
            use fieldbus_bridge::transport::{RtuParity, SerialRtuTransport, SerialRtuTransportConfig};
            let parity = match parity {
                fieldbus_bridge::config::SerialParity::None => RtuParity::None,
                fieldbus_bridge::config::SerialParity::Even => RtuParity::Even,
                fieldbus_bridge::config::SerialParity::Odd => RtuParity::Odd,
            };
            Arc::new(SerialRtuTransport::new(SerialRtuTransportConfig {
                port: port.clone(),
                baud_rate: *baud,
                data_bits: *data_bits,
                stop_bits: *stop_bits,
                parity,
                response_timeout: module.response_timeout(),
            }))
        }
        #[cfg(not(feature = "modbus-rtu"))]
        ConnectionConfig::SerialRtu { .. } => {
            bail!("SerialRtu connection requires the modbus-rtu feature");
        }
    };

    let slave_devices: Vec<SlaveDevice> = resolved
        .into_iter()
        .map(|d| SlaveDevice::new(d.key, d.slave_id, d.mappings))
        .collect();
    let devices = Arc::new(Mutex::new(slave_devices));

    let platform: Arc<dyn PlatformClient> = Arc::new(LoggingPlatformClient::new());

    let default_store = KeyValuePersistence::new("default-values.json");
    let repeat_store = KeyValuePersistence::new("repeat-writes.json");
    let safe_store = KeyValuePersistence::new("safe-mode.json");

    let bridge = Bridge::new(Arc::clone(&devices), Arc::clone(&transport), Arc::clone(&platform), default_store, repeat_store, safe_store);
    bridge.start().await?;

    let (change_tx, change_rx) = tokio::sync::mpsc::unbounded_channel();
    let poller = Poller::new(Arc::clone(&transport), Arc::clone(&devices), PollerConfig { period: module.register_read_period() }, change_tx);
    let lifecycle = LifecycleController::new(Arc::clone(&transport), Arc::clone(&devices), Arc::clone(&poller));

    let bridge = Arc::new(bridge);
    let drive_handle = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.drive_changes(change_rx).await })
    };

    lifecycle.on_platform_connected(true).await;
    lifecycle.on_registration_complete().await;

    info!("fieldbus-bridge running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await.context("waiting for ctrl_c")?;

    info!("shutting down");
    lifecycle.stop().await;
    drive_handle.abort();

    Ok(())
}
