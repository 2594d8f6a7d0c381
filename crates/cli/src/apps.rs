//! Device apps
//!
//! Each app opens the configured device through the shim, does its work and
//! tears the session down again.

use crate::stream::{Stream, StreamConfig, StreamStats};
use anyhow::{Context, Result, anyhow};
use common::{AppConfig, AppKind, DeviceProfile};
use host::RusbBridge;
use protocol::{ConfigDescriptor, DeviceDescriptor};
use serde::Serialize;
use shim::{DeviceHandle, DeviceSelector, HostBridge, Session};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Timeout for setup control requests
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Open the profile's device and return the session with its handle
pub fn open_device(
    bridge: impl HostBridge + 'static,
    profile: &DeviceProfile,
) -> Result<(Session, DeviceHandle)> {
    let selector = DeviceSelector::new(profile.vendor_id, profile.product_id);
    let session = Session::init(bridge, selector).context("Failed to initialize USB session")?;

    let devices = session
        .get_device_list(session.context())
        .with_context(|| format!("Device {} ({}) not available", selector, profile.name))?;
    let device = devices
        .first()
        .copied()
        .ok_or_else(|| anyhow!("No device found for profile '{}'", profile.name))?;
    let handle = session.open(device).context("Failed to open device")?;

    info!("Opened {} ({})", profile.name, selector);
    Ok((session, handle))
}

/// Descriptor set of one device, as dumped by `info --toml`
#[derive(Debug, Serialize)]
pub struct DescriptorDump {
    pub device: DeviceDescriptor,
    pub configuration: ConfigDescriptor,
}

/// Print descriptors and strings of the profile's device
///
/// With `as_toml` the descriptors are printed as a TOML document instead.
pub fn run_info(profile: &DeviceProfile, as_toml: bool) -> Result<()> {
    let (session, handle) = open_device(RusbBridge::new(), profile)?;
    let result = if as_toml {
        dump_descriptors(&session, handle).map(|dump| print!("{}", dump))
    } else {
        print_info(&session, handle)
    };
    session.close(handle);
    session.exit(session.context());
    result
}

fn dump_descriptors(session: &Session, handle: DeviceHandle) -> Result<String> {
    let device = session.get_device(handle)?;
    let dump = DescriptorDump {
        device: session
            .device_descriptor(device)
            .context("Failed to read device descriptor")?,
        configuration: session
            .active_config_descriptor(device)
            .context("Failed to read configuration descriptor")?,
    };
    toml::to_string_pretty(&dump).context("Failed to serialize descriptors")
}

fn print_info(session: &Session, handle: DeviceHandle) -> Result<()> {
    let device = session.get_device(handle)?;
    let desc = session
        .device_descriptor(device)
        .context("Failed to read device descriptor")?;

    println!("Found device {:04x}:{:04x}", desc.vendor_id, desc.product_id);
    println!(
        "  Bus {:03} Device {:03}",
        session.bus_number(device)?,
        session.device_address(device)?
    );
    println!(
        "  USB {:x}.{:02x}  Device version {:x}.{:02x}",
        desc.usb_version >> 8,
        desc.usb_version & 0xff,
        desc.device_version >> 8,
        desc.device_version & 0xff
    );
    println!(
        "  Class {:#04x} Subclass {:#04x} Protocol {:#04x} Max packet size {}",
        desc.class, desc.subclass, desc.protocol, desc.max_packet_size0
    );

    for (label, index) in [
        ("Manufacturer", desc.manufacturer_index),
        ("Product", desc.product_index),
        ("Serial number", desc.serial_number_index),
    ] {
        if index == 0 {
            continue;
        }
        match session.read_string(handle, index) {
            Ok(text) => println!("  {}: {}", label, text),
            Err(e) => debug!("String descriptor {} unavailable: {}", index, e),
        }
    }

    match session.configuration(handle) {
        Ok(value) => println!("  Active configuration: {}", value),
        Err(e) => debug!("Active configuration unavailable: {}", e),
    }

    let config = session
        .active_config_descriptor(device)
        .context("Failed to read configuration descriptor")?;
    println!(
        "  Configuration {}: {} interface(s), {} bytes, max power {} mA",
        config.configuration_value,
        config.num_interfaces(),
        config.total_length(),
        u32::from(config.max_power) * 2
    );
    for interface in &config.interfaces {
        println!(
            "    Interface {} alt {}: class {:#04x}",
            interface.number, interface.alternate_setting, interface.class
        );
        for endpoint in &interface.endpoints {
            println!(
                "      Endpoint {} attributes {:#04x} max packet {}",
                endpoint.address, endpoint.attributes, endpoint.max_packet_size
            );
        }
    }

    Ok(())
}

/// Run a streaming app until its transfer budget is spent or Ctrl+C
pub async fn run_app(
    app: &AppConfig,
    profile: &DeviceProfile,
    poll_interval: Duration,
) -> Result<StreamStats> {
    let (session, handle) = open_device(RusbBridge::new(), profile)?;
    let result = stream_app(&session, handle, app, poll_interval).await;

    if let Err(e) = session.release_interface(handle, app.interface) {
        debug!("Release of interface {} failed: {}", app.interface, e);
    }
    session.close(handle);
    session.exit(session.context());
    result
}

async fn stream_app(
    session: &Session,
    handle: DeviceHandle,
    app: &AppConfig,
    poll_interval: Duration,
) -> Result<StreamStats> {
    session
        .claim_interface(handle, app.interface)
        .with_context(|| format!("Failed to claim interface {}", app.interface))?;

    for request in &app.setup {
        let mut data = if request.request_type & protocol::types::DIRECTION_IN_MASK != 0 {
            vec![0u8; 64]
        } else {
            Vec::new()
        };
        session
            .control_transfer(
                handle,
                request.request_type,
                request.request,
                request.value,
                request.index,
                &mut data,
                CONTROL_TIMEOUT,
            )
            .with_context(|| format!("Setup request {:#04x} failed", request.request))?;
    }

    let config = StreamConfig::from_app(app)?;
    let stream = match app.kind {
        AppKind::Receive => {
            let path = app
                .output_path()
                .ok_or_else(|| anyhow!("App '{}' has no output file", app.name))?;
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            info!("Receiving from endpoint {:#04x} into {}", config.endpoint, path.display());
            Stream::receive(session, handle, &config, Box::new(BufWriter::new(file)))?
        }
        AppKind::Transmit => {
            let path = app
                .input_path()
                .ok_or_else(|| anyhow!("App '{}' has no input file", app.name))?;
            let file =
                File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            info!("Transmitting {} to endpoint {:#04x}", path.display(), config.endpoint);
            Stream::transmit(session, handle, &config, Box::new(BufReader::new(file)))?
        }
        AppKind::Info => return Err(anyhow!("App '{}' is not a streaming app", app.name)),
    };

    drive(session, &stream, poll_interval).await?;
    stream.finish(session)
}

/// Poll the session on a fixed interval until the stream drains
async fn drive(session: &Session, stream: &Stream, poll_interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session
                    .handle_events_timeout(session.context(), Some(poll_interval))
                    .context("Event handling failed")?;
                if stream.is_finished() {
                    break;
                }
                if stream.failure().is_some() && !interrupted {
                    warn!("Stream failed, cancelling remaining transfers");
                    interrupted = true;
                    stream.stop(session);
                }
            }
            result = &mut ctrl_c, if !interrupted => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Interrupted, cancelling transfers");
                interrupted = true;
                stream.stop(session);
            }
        }
    }

    let stats = stream.stats();
    info!(
        "Stream finished: {} transfers, {} bytes, {} errors",
        stats.transfers, stats.bytes, stats.errors
    );
    Ok(())
}
