//! usb-shim
//!
//! Runs libusb-style device apps (descriptor dump, bulk receive, bulk
//! transmit) from configured device profiles through the usb-shim session
//! over a local rusb host bridge.

mod apps;
mod stream;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::{AppKind, ShimConfig, setup_logging};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-shim")]
#[command(author, version, about = "Run libusb-style device apps through usb-shim")]
#[command(long_about = "
Drives a USB device through the usb-shim libusb compatibility layer.

EXAMPLES:
    # Dump descriptors of the default profile's device
    usb-shim info

    # Dump descriptors of another profile
    usb-shim --profile hackrf info

    # Dump descriptors as TOML
    usb-shim info --toml

    # Stream bulk IN data to the app's output file
    usb-shim run hackrf_receive

    # List configured profiles and apps
    usb-shim profiles

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-shim/config.toml
    3. /etc/usb-shim/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Device profile (defaults to the configured default profile)
    #[arg(short, long, value_name = "NAME")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print device descriptors and strings
    Info {
        /// Dump the descriptors as TOML
        #[arg(long)]
        toml: bool,
    },
    /// Run a configured app
    Run {
        /// App name from the configuration
        app: String,
    },
    /// List configured profiles and apps
    Profiles,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ShimConfig::default();
        let path = ShimConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ShimConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ShimConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-shim v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Info { toml: false }) {
        Command::Info { toml } => {
            let profile = config.select_profile(args.profile.as_deref())?;
            apps::run_info(profile, toml)
        }
        Command::Run { app } => {
            let app = config
                .app(&app)
                .ok_or_else(|| anyhow!("Unknown app '{}'", app))?;
            let profile_name = args.profile.as_deref().unwrap_or(&app.profile);
            let profile = config.select_profile(Some(profile_name))?;

            if app.kind == AppKind::Info {
                return apps::run_info(profile, false);
            }
            let stats = apps::run_app(app, profile, config.general.poll_interval()).await?;
            println!(
                "{}: {} transfers, {} bytes",
                app.name, stats.transfers, stats.bytes
            );
            Ok(())
        }
        Command::Profiles => {
            list_profiles(&config);
            Ok(())
        }
    }
}

fn list_profiles(config: &ShimConfig) {
    println!("Profiles:");
    for profile in &config.profiles {
        let default = config.general.default_profile.as_deref() == Some(profile.name.as_str());
        println!(
            "  {}{} {:04x}:{:04x} {}",
            profile.name,
            if default { " (default)" } else { "" },
            profile.vendor_id,
            profile.product_id,
            profile.description.as_deref().unwrap_or("")
        );
    }

    println!("Apps:");
    for app in &config.apps {
        println!("  {} [{:?}] on {}", app.name, app.kind, app.profile);
    }
}
