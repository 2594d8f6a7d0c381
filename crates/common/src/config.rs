//! Runtime configuration management
//!
//! Device profiles select the one device the shim talks to (VID:PID), and
//! app entries describe what the runner does once the device is open.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    pub general: GeneralSettings,
    /// Known devices
    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
    /// Runnable apps
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
    /// Profile used when the command line names none
    #[serde(default)]
    pub default_profile: Option<String>,
    /// Delay between two polls of the completion dispatcher
    #[serde(default = "GeneralSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl GeneralSettings {
    fn default_poll_interval() -> u64 {
        10
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A device the shim can be pointed at
///
/// # Example Configuration
/// ```toml
/// [[profiles]]
/// name = "hackrf"
/// vendor_id = "0x1d50"
/// product_id = "0x6089"
/// description = "HackRF One"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(with = "hex_id")]
    pub vendor_id: u16,
    #[serde(with = "hex_id")]
    pub product_id: u16,
    #[serde(default)]
    pub description: Option<String>,
}

/// What an app does once the device is open
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// Dump descriptors and strings
    Info,
    /// Stream bulk IN data to a file
    Receive,
    /// Stream a file to a bulk OUT endpoint
    Transmit,
}

/// Vendor/class control request issued before streaming starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    #[serde(default)]
    pub value: u16,
    #[serde(default)]
    pub index: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    /// Profile name the app runs against
    pub profile: String,
    pub kind: AppKind,
    /// Interface claimed before any transfer
    #[serde(default)]
    pub interface: u8,
    /// Bulk endpoint address (direction bit included)
    #[serde(default)]
    pub endpoint: Option<u8>,
    /// Bytes per bulk transfer
    #[serde(default = "AppConfig::default_transfer_size")]
    pub transfer_size: usize,
    /// Number of transfers kept in flight at once
    #[serde(default = "AppConfig::default_in_flight")]
    pub in_flight: usize,
    /// Stop after this many completed transfers (None = until interrupted)
    #[serde(default)]
    pub transfer_count: Option<u64>,
    /// Per-transfer timeout handed to the host bridge (0 = none)
    #[serde(default)]
    pub timeout_ms: u32,
    /// Control requests sent after claiming the interface
    #[serde(default)]
    pub setup: Vec<ControlRequest>,
    /// Source file for `transmit`
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// Destination file for `receive`
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl AppConfig {
    fn default_transfer_size() -> usize {
        16384
    }

    fn default_in_flight() -> usize {
        4
    }

    /// Input path with `~` expanded
    pub fn input_path(&self) -> Option<PathBuf> {
        self.input.as_deref().map(expand_path)
    }

    /// Output path with `~` expanded
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output.as_deref().map(expand_path)
    }
}

/// Serde module for VID/PID values written as `"0x1d50"`
mod hex_id {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:04x}", id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_hex_id(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `0x1234` (case-insensitive prefix, 1-4 hex digits)
    pub fn parse_hex_id(s: &str) -> Result<u16, String> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("Invalid id '{}', must start with '0x'", s))?;

        if hex.is_empty() || hex.len() > 4 {
            return Err(format!("Invalid id '{}', hex part must be 1-4 digits", s));
        }

        u16::from_str_radix(hex, 16)
            .map_err(|_| format!("Invalid id '{}', not a valid hex number", s))
    }
}

pub use hex_id::parse_hex_id;

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

impl Default for ShimConfig {
    fn default() -> Self {
        let hackrf = DeviceProfile {
            name: "hackrf".to_string(),
            vendor_id: 0x1d50,
            product_id: 0x6089,
            description: Some("HackRF One".to_string()),
        };

        // HackRF vendor request 1 = set transceiver mode (1 = receive, 2 = transmit)
        let transceiver_mode = |mode: u16| ControlRequest {
            request_type: 0x40,
            request: 1,
            value: mode,
            index: 0,
        };

        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
                default_profile: Some(hackrf.name.clone()),
                poll_interval_ms: GeneralSettings::default_poll_interval(),
            },
            apps: vec![
                AppConfig {
                    name: "hackrf_info".to_string(),
                    profile: hackrf.name.clone(),
                    kind: AppKind::Info,
                    interface: 0,
                    endpoint: None,
                    transfer_size: AppConfig::default_transfer_size(),
                    in_flight: AppConfig::default_in_flight(),
                    transfer_count: None,
                    timeout_ms: 0,
                    setup: Vec::new(),
                    input: None,
                    output: None,
                },
                AppConfig {
                    name: "hackrf_receive".to_string(),
                    profile: hackrf.name.clone(),
                    kind: AppKind::Receive,
                    interface: 0,
                    endpoint: Some(0x81),
                    transfer_size: 262144,
                    in_flight: AppConfig::default_in_flight(),
                    transfer_count: Some(64),
                    timeout_ms: 0,
                    setup: vec![transceiver_mode(1)],
                    input: None,
                    output: Some(PathBuf::from("receive.iq")),
                },
                AppConfig {
                    name: "hackrf_transmit".to_string(),
                    profile: hackrf.name.clone(),
                    kind: AppKind::Transmit,
                    interface: 0,
                    endpoint: Some(0x02),
                    transfer_size: 262144,
                    in_flight: AppConfig::default_in_flight(),
                    transfer_count: None,
                    timeout_ms: 0,
                    setup: vec![transceiver_mode(2)],
                    input: Some(PathBuf::from("transmit.iq")),
                    output: None,
                },
            ],
            profiles: vec![hackrf],
        }
    }
}

impl ShimConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/usb-shim/config.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ShimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-shim").join("config.toml")
        } else {
            PathBuf::from(".config/usb-shim/config.toml")
        }
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> crate::Result<&DeviceProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| crate::Error::UnknownProfile(name.to_string()))
    }

    /// Profile named on the command line, else the configured default
    pub fn select_profile(&self, name: Option<&str>) -> crate::Result<&DeviceProfile> {
        match name.or(self.general.default_profile.as_deref()) {
            Some(name) => self.profile(name),
            None => self
                .profiles
                .first()
                .ok_or_else(|| crate::Error::Config("No device profiles configured".to_string())),
        }
    }

    /// Look up an app by name
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|a| a.name == name)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.general.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        let mut names = HashSet::new();
        for profile in &self.profiles {
            if profile.name.is_empty() {
                return Err(anyhow!("Empty profile name"));
            }
            if !names.insert(profile.name.as_str()) {
                return Err(anyhow!("Duplicate profile name '{}'", profile.name));
            }
        }

        if let Some(default) = &self.general.default_profile {
            if !names.contains(default.as_str()) {
                return Err(anyhow!("Default profile '{}' is not defined", default));
            }
        }

        for app in &self.apps {
            if !names.contains(app.profile.as_str()) {
                return Err(anyhow!(
                    "App '{}' references unknown profile '{}'",
                    app.name,
                    app.profile
                ));
            }
            Self::validate_app(app)?;
        }

        Ok(())
    }

    fn validate_app(app: &AppConfig) -> Result<()> {
        if app.transfer_size == 0 {
            return Err(anyhow!("App '{}': transfer_size must be greater than 0", app.name));
        }
        if app.in_flight == 0 {
            return Err(anyhow!("App '{}': in_flight must be greater than 0", app.name));
        }

        match app.kind {
            AppKind::Info => {}
            AppKind::Receive => {
                let ep = app
                    .endpoint
                    .ok_or_else(|| anyhow!("App '{}': receive needs an endpoint", app.name))?;
                if ep & 0x80 == 0 {
                    return Err(anyhow!(
                        "App '{}': receive endpoint {:#04x} is not an IN endpoint",
                        app.name,
                        ep
                    ));
                }
            }
            AppKind::Transmit => {
                let ep = app
                    .endpoint
                    .ok_or_else(|| anyhow!("App '{}': transmit needs an endpoint", app.name))?;
                if ep & 0x80 != 0 {
                    return Err(anyhow!(
                        "App '{}': transmit endpoint {:#04x} is not an OUT endpoint",
                        app.name,
                        ep
                    ));
                }
                if app.input.is_none() {
                    return Err(anyhow!("App '{}': transmit needs an input file", app.name));
                }
            }
        }

        Ok(())
    }
}
