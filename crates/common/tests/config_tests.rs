//! Integration tests for configuration parsing
//!
//! Tests runtime configuration parsing, including:
//! - Minimal and full configurations
//! - Hex VID/PID parsing
//! - App validation rules
//! - Save/load through the filesystem

use common::{AppKind, ShimConfig};
use std::time::Duration;

const MINIMAL_CONFIG: &str = r#"
[general]
log_level = "info"

[[profiles]]
name = "hackrf"
vendor_id = "0x1d50"
product_id = "0x6089"
"#;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"
default_profile = "greatfet"
poll_interval_ms = 25

[[profiles]]
name = "hackrf"
vendor_id = "0x1d50"
product_id = "0x6089"
description = "HackRF One"

[[profiles]]
name = "greatfet"
vendor_id = "0x1d50"
product_id = "0x60e6"

[[apps]]
name = "rx"
profile = "hackrf"
kind = "receive"
endpoint = 129
transfer_size = 262144
in_flight = 8
transfer_count = 10
output = "~/captures/rx.iq"

[[apps.setup]]
request_type = 64
request = 1
value = 1

[[apps]]
name = "tx"
profile = "greatfet"
kind = "transmit"
endpoint = 2
input = "/data/transmit.iq"
"#;

mod parsing {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: ShimConfig = toml::from_str(MINIMAL_CONFIG).expect("Failed to parse");
        config.validate().expect("Minimal config should be valid");

        assert_eq!(config.general.poll_interval(), Duration::from_millis(10));
        assert!(config.general.default_profile.is_none());
        assert!(config.apps.is_empty());
        assert_eq!(config.select_profile(None).unwrap().name, "hackrf");
    }

    #[test]
    fn test_full_config() {
        let config: ShimConfig = toml::from_str(FULL_CONFIG).expect("Failed to parse");
        config.validate().expect("Full config should be valid");

        assert_eq!(config.general.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.select_profile(None).unwrap().product_id, 0x60e6);

        let rx = config.app("rx").expect("rx app");
        assert_eq!(rx.kind, AppKind::Receive);
        assert_eq!(rx.endpoint, Some(0x81));
        assert_eq!(rx.in_flight, 8);
        assert_eq!(rx.transfer_count, Some(10));
        assert_eq!(rx.setup.len(), 1);
        assert_eq!(rx.setup[0].request_type, 0x40);
        assert_eq!(rx.setup[0].index, 0);

        let tx = config.app("tx").expect("tx app");
        assert_eq!(tx.transfer_size, 16384);
        assert_eq!(tx.in_flight, 4);
        assert_eq!(
            tx.input_path().unwrap(),
            std::path::PathBuf::from("/data/transmit.iq")
        );
    }

    #[test]
    fn test_output_path_expands_tilde() {
        let config: ShimConfig = toml::from_str(FULL_CONFIG).unwrap();
        let output = config.app("rx").unwrap().output_path().unwrap();
        assert!(!output.to_string_lossy().starts_with('~'));
        assert!(output.ends_with("captures/rx.iq"));
    }

    #[test]
    fn test_decimal_vid_rejected() {
        let bad = MINIMAL_CONFIG.replace("\"0x1d50\"", "\"7504\"");
        assert!(toml::from_str::<ShimConfig>(&bad).is_err());
    }
}

mod validation {
    use super::*;

    fn full() -> ShimConfig {
        toml::from_str(FULL_CONFIG).unwrap()
    }

    #[test]
    fn test_duplicate_profile_rejected() {
        let mut config = full();
        let dup = config.profiles[0].clone();
        config.profiles.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_default_profile_rejected() {
        let mut config = full();
        config.general.default_profile = Some("missing".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_with_unknown_profile_rejected() {
        let mut config = full();
        config.apps[0].profile = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_receive_needs_in_endpoint() {
        let mut config = full();
        config.apps[0].endpoint = Some(0x01);
        assert!(config.validate().is_err());

        config.apps[0].endpoint = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transmit_needs_out_endpoint_and_input() {
        let mut config = full();
        config.apps[1].endpoint = Some(0x82);
        assert!(config.validate().is_err());

        let mut config = full();
        config.apps[1].input = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = full();
        config.general.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}

mod persistence {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = ShimConfig::default();
        config.save(&path).expect("Failed to save");
        assert!(path.exists());

        let loaded = ShimConfig::load(Some(path)).expect("Failed to load");
        assert_eq!(loaded.profiles, config.profiles);
        assert_eq!(
            loaded.app("hackrf_receive").unwrap().endpoint,
            Some(0x81)
        );
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general]\nlog_level = \"loud\"\n").unwrap();

        assert!(ShimConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(ShimConfig::load(Some(dir.path().join("absent.toml"))).is_err());
    }
}
