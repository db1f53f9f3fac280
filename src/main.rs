use anyhow::Context;
use bj_led_controller::domain::effects;
use bj_led_controller::domain::settings::SettingsService;
use bj_led_controller::infrastructure::bluetooth::btleplug_backend::{
    first_adapter, BtleplugDirectory, BtleplugTransport, DiscoveredDevice,
};
use bj_led_controller::infrastructure::bluetooth::protocol;
use bj_led_controller::infrastructure::bluetooth::retry::RetryPolicy;
use bj_led_controller::infrastructure::logging::init_logger;
use bj_led_controller::{DeviceOptions, LedDevice};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bjled")]
#[command(about = "Control BJ_LED Bluetooth light strips")]
struct Cli {
    /// Device address; defaults to the configured one, then the first BJ_LED found
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Scan duration in seconds
    #[arg(long, global = true)]
    scan_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby BLE devices
    Scan,
    /// List supported effect names
    Effects,
    /// Turn the light on
    On,
    /// Turn the light off
    Off,
    /// Set a static color
    Color {
        r: u8,
        g: u8,
        b: u8,
        #[arg(long)]
        brightness: Option<i32>,
    },
    /// Re-send the last color at a new brightness
    Brightness { value: i32 },
    /// Start a built-in effect
    Effect { name: String },
}

fn print_devices(found: &[DiscoveredDevice]) {
    println!("Found {} devices:", found.len());
    for device in found {
        let name = device.name.as_deref().unwrap_or("Unknown");
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if protocol::detect_model(name).is_some() {
            " [BJ_LED]"
        } else {
            ""
        };
        println!("  {} ({}) RSSI: {}{}", name, device.address, rssi, marker);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;

    if let Command::Effects = cli.command {
        for name in effects::effect_list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let adapter = first_adapter().await?;
    let directory = Arc::new(BtleplugDirectory::new(adapter.clone()));
    let scan_secs = cli.scan_secs.unwrap_or(settings.transport.scan_timeout_secs);
    let found = directory.scan(Duration::from_secs(scan_secs)).await?;

    if let Command::Scan = cli.command {
        print_devices(&found);
        return Ok(());
    }

    let address = cli
        .address
        .or_else(|| settings.device.address.clone())
        .or_else(|| {
            found
                .iter()
                .find(|d| d.name.as_deref().is_some_and(|n| protocol::detect_model(n).is_some()))
                .map(|d| d.address.clone())
        })
        .context("No BJ_LED device found; pass --address")?;

    let transport = Arc::new(BtleplugTransport::new(adapter, &settings.transport));
    let options = DeviceOptions {
        disconnect_delay: settings.device.disconnect_delay(),
        reset: settings.device.reset,
        retry: RetryPolicy::from(&settings.retry),
    };
    let device = LedDevice::<BtleplugTransport>::new(&address, directory, transport, options)?;
    info!("Using {} ({})", device.name(), device.address());

    if let Err(err) = settings_service.set_default_address(&address) {
        warn!("Could not remember device address: {}", err);
    }

    let result = run(&device, cli.command, &mut settings_service).await;
    device.stop().await;
    result
}

async fn run(
    device: &LedDevice<BtleplugTransport>,
    command: Command,
    settings_service: &mut SettingsService,
) -> anyhow::Result<()> {
    match command {
        Command::Scan | Command::Effects => {}
        Command::On => device.turn_on().await?,
        Command::Off => device.turn_off().await?,
        Command::Color { r, g, b, brightness } => {
            let brightness = brightness.map(|value| device.normalize_brightness(Some(value)));
            device.set_rgb_color((r, g, b), brightness).await?;
            if let Err(err) = settings_service.remember_color((r, g, b)) {
                warn!("Could not remember color: {}", err);
            }
        }
        Command::Brightness { value } => {
            let rgb = settings_service
                .get()
                .device
                .last_color
                .context("No color set yet; use `bjled color` first")?;
            let brightness = device.normalize_brightness(Some(value));
            device.set_rgb_color(rgb, Some(brightness)).await?;
        }
        Command::Effect { name } => {
            name.parse::<effects::Effect>()?;
            device.set_effect(&name).await?;
        }
    }
    Ok(())
}
