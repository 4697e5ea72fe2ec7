//! Command-line front end for BLE-to-UART bridge modules.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use tokio::time::{self, Duration};

use ble_uart_bridge::config::CONFIG_FILE;
use ble_uart_bridge::prelude::*;
use ble_uart_bridge::serial::available_port_names;

/// BLE-to-UART bridge command line tool
#[derive(Parser, Debug)]
#[command(name = "ble-uart-bridge")]
#[command(author, version, about = "Drive a serial BLE-to-UART bridge module")]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port, overrides the configured one
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,

    /// Show firmware version, module address, transfer UUIDs and connection
    Info,

    /// Discover advertising devices
    Scan {
        /// How long to scan
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,

        /// Only print devices whose name contains this text
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Connect to a peripheral
    Connect {
        /// Peripheral address, e.g. AA:BB:CC:DD:EE:FF
        address: String,

        /// The address is a random address
        #[arg(long, default_value_t = false)]
        random: bool,

        /// Reconnect automatically after power loss
        #[arg(long, default_value_t = false)]
        auto_reconnect: bool,
    },

    /// Disconnect the connected peripheral
    Disconnect,

    /// Show or change the transfer service and characteristic UUIDs
    Uuids {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        write: Option<String>,
        #[arg(long)]
        notify: Option<String>,
    },

    /// Change the module's baud rate
    Baud {
        /// One of 9600, 14400, 19200, 38400, 57600, 115200, 230400
        rate: u32,
    },

    /// Reboot the module
    Reset {
        /// Restore factory transfer settings first
        #[arg(long, default_value_t = false)]
        defaults: bool,
    },

    /// Write a configuration file with default values
    ConfigInit {
        /// Destination file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let loaded = match BridgeConfig::load_if_present(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    env_logger::Builder::from_env(Env::default().default_filter_or(&config.log_level))
        .format_timestamp_millis()
        .init();
    if !found {
        info!("No config at {}, using defaults", cli.config.display());
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: BridgeConfig) -> Result<()> {
    match cli.command {
        Commands::Ports => {
            for name in available_port_names() {
                println!("{name}");
            }
            return Ok(());
        }
        Commands::ConfigInit { file } => {
            BridgeConfig::default().save(&file)?;
            println!("Wrote {}", file.display());
            return Ok(());
        }
        _ => {}
    }

    let port_name = cli
        .port
        .or_else(|| config.port_name.clone())
        .ok_or_else(|| BridgeError::InvalidConfig("no serial port given, use --port".into()))?;
    let settings = PortSettings::new(port_name, config.initial_baud_rate);
    println!("Opening {}", settings.describe());

    let mut adapter = BleUartAdapter::from_settings(settings, config.timing.clone());
    let index = adapter.open_and_detect().await?;
    println!("Module answering at {index}");

    let result = execute(&adapter, cli.command).await;
    adapter.close().await;
    result
}

async fn execute(adapter: &BleUartAdapter<SerialTransport>, command: Commands) -> Result<()> {
    match command {
        Commands::Info => {
            println!("Firmware:  {}", adapter.version().await?);
            println!("Address:   {}", adapter.mac_address().await?);
            println!("TX power:  {}", adapter.tx_power().await?);
            println!("Service:   {}", adapter.service_uuid().await?);
            println!("Write:     {}", adapter.write_uuid().await?);
            println!("Notify:    {}", adapter.notify_uuid().await?);
            println!(
                "Reconnect: {}",
                if adapter.auto_reconnect_enabled().await? {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            match adapter.connected_device().await? {
                Some(address) => println!("Connected: {address}"),
                None => println!("Connected: none"),
            }
        }
        Commands::Scan { seconds, name } => {
            scan(adapter, Duration::from_secs(seconds), name).await?;
        }
        Commands::Connect {
            address,
            random,
            auto_reconnect,
        } => {
            let address_type = if random {
                AddressType::Random
            } else {
                AddressType::Static
            };
            adapter
                .connect_device(&address, address_type, auto_reconnect)
                .await?;
            println!("Connected to {address}");
        }
        Commands::Disconnect => {
            adapter.disconnect().await?;
            println!("Disconnected");
        }
        Commands::Uuids {
            service,
            write,
            notify,
        } => {
            if let Some(uuid) = service {
                adapter.set_service_uuid(&uuid).await?;
            }
            if let Some(uuid) = write {
                adapter.set_write_uuid(&uuid).await?;
            }
            if let Some(uuid) = notify {
                adapter.set_notify_uuid(&uuid).await?;
            }
            println!("Service: {}", adapter.service_uuid().await?);
            println!("Write:   {}", adapter.write_uuid().await?);
            println!("Notify:  {}", adapter.notify_uuid().await?);
        }
        Commands::Baud { rate } => {
            let index = BaudRateIndex::from_rate(rate).ok_or_else(|| {
                BridgeError::invalid_argument(format!("{rate} is not a supported baud rate"))
            })?;
            adapter.change_baud_rate(index).await?;
            println!("Now at {index}");
        }
        Commands::Reset { defaults } => {
            if defaults {
                adapter.restore_defaults().await?;
            } else {
                adapter.soft_reset().await?;
            }
            println!("Module rebooted");
        }
        Commands::Ports | Commands::ConfigInit { .. } => {}
    }
    Ok(())
}

async fn scan(
    adapter: &BleUartAdapter<SerialTransport>,
    duration: Duration,
    filter: Option<String>,
) -> Result<()> {
    let observer_filter = filter.clone();
    adapter.set_observer(Some(Arc::new(move |device: &DiscoveredDevice| {
        let shown = match &observer_filter {
            Some(filter) => device
                .name
                .as_deref()
                .is_some_and(|name| name.contains(filter.as_str())),
            None => true,
        };
        if shown {
            println!("{device}");
        }
    })));

    adapter.start_scan()?;
    time::sleep(duration).await;
    adapter.stop_scan().await;
    adapter.set_observer(None);

    let stale_after = chrono::Duration::from_std(adapter.timing().stale_after())
        .map_err(|e| BridgeError::InvalidConfig(format!("stale_after_ms: {e}")))?;
    let stale: Vec<String> = adapter
        .devices()
        .stale(stale_after)
        .into_iter()
        .map(|device| device.address)
        .collect();
    let devices = adapter.devices().snapshot();
    println!("\n{} devices found", devices.len());
    for device in devices {
        if let Some(filter) = &filter
            && !device.name.as_deref().is_some_and(|name| name.contains(filter.as_str()))
        {
            continue;
        }
        let marker = if stale.contains(&device.address) {
            " (gone)"
        } else {
            ""
        };
        println!("  {device}{marker}");
    }
    Ok(())
}
