//! Configuration for the hub
//!
//! Reads/writes settings from ~/.config/sentinel/config.toml. Secrets can be
//! left out of the file and supplied through the environment instead.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `network.password`
pub const ENV_WIFI_PASSWORD: &str = "SENTINEL_WIFI_PASSWORD";
/// Environment variable overriding `backend.secret`
pub const ENV_BACKEND_SECRET: &str = "SENTINEL_BACKEND_SECRET";

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier reported with every document and used as token subject
    pub device_id: String,
    /// Replace every missing device with a simulated one
    pub simulate: bool,
    pub network: NetworkConfig,
    pub backend: BackendConfig,
    pub ble: BleConfig,
    pub sensors: SensorsConfig,
    pub intervals: IntervalsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    pub apn: String,
    /// Host interface standing in for the WiFi radio (e.g. "wlan0")
    pub wifi_interface: Option<String>,
    /// TCP endpoint used to confirm reachability
    pub probe_host: String,
    /// Serial device of the AT modem (e.g. "/dev/ttyUSB2")
    pub modem_port: Option<String>,
    pub modem_baud: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No Authorization header
    None,
    /// Token issued by the backend auth endpoint
    Backend,
    /// HS256 token minted on the device
    LocalJwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Endpoint receiving the sensor documents
    pub data_url: String,
    /// Endpoint issuing device tokens
    pub auth_url: String,
    pub auth_mode: AuthMode,
    /// Device secret (backend auth) or signing key (local JWT)
    pub secret: Option<String>,
    pub auth_timeout_ms: u64,
    pub auth_retry_attempts: u32,
    pub token_refresh_margin_ms: u64,
    pub default_token_expiry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub enabled: bool,
    pub strap_name: String,
    pub strap_address: String,
}

/// Where a sensor's readings come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Disabled,
    Simulated,
    /// Linux IIO device directory, e.g. /sys/bus/iio/devices/iio:device0
    Iio { device: PathBuf },
}

/// Where the hub's own battery level comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatterySourceConfig {
    Disabled,
    Simulated,
    /// Host power supply through the battery crate
    Host,
    /// ADC channel behind the battery voltage divider
    Iio { device: PathBuf, channel: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub dht: SourceConfig,
    pub gas: SourceConfig,
    /// ADC channel of the MQ-2 output when `gas` is an IIO device
    pub gas_channel: u32,
    pub accelerometer: SourceConfig,
    pub battery: BatterySourceConfig,
    pub gps: bool,

    pub temp_delta_threshold: f32,
    pub hum_delta_threshold: f32,

    pub gas_delta_threshold: f32,
    pub gas_ratio_clean_air: f32,
    /// Exponential regression `ppm = a * ratio^b`
    pub gas_a: f32,
    pub gas_b: f32,

    pub acc_threshold: f32,
    pub angle_threshold: f32,
    pub max_time_between_ms: u64,
    pub step_threshold: f32,
    pub step_debounce_ms: u64,
    pub x_offset: f32,
    pub y_offset: f32,
    pub z_offset: f32,

    pub battery_divider: f32,
    pub battery_vmax: f32,
    pub battery_vmin: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub accel_report_ms: u64,
    pub accel_sample_ms: u64,
    pub battery_ms: u64,
    pub bluetooth_tick_ms: u64,
    pub bluetooth_report_ms: u64,
    pub dht_ms: u64,
    pub gas_ms: u64,
    pub gps_ms: u64,
    pub network_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "SENTINEL-001".to_string(),
            simulate: false,
            network: NetworkConfig::default(),
            backend: BackendConfig::default(),
            ble: BleConfig::default(),
            sensors: SensorsConfig::default(),
            intervals: IntervalsConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            apn: "internet".to_string(),
            wifi_interface: None,
            probe_host: "1.1.1.1:53".to_string(),
            modem_port: None,
            modem_baud: 115_200,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_url: "http://localhost:8080/api/sensor-data".to_string(),
            auth_url: "http://localhost:8080/api/auth/device".to_string(),
            auth_mode: AuthMode::Backend,
            secret: None,
            auth_timeout_ms: 15_000,
            auth_retry_attempts: 3,
            token_refresh_margin_ms: 300_000,
            default_token_expiry_ms: 3_600_000,
        }
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strap_name: "POLAR H9 EC351E2B".to_string(),
            strap_address: "a0:9e:1a:ec:35:1e".to_string(),
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            dht: SourceConfig::Disabled,
            gas: SourceConfig::Disabled,
            gas_channel: 0,
            accelerometer: SourceConfig::Disabled,
            battery: BatterySourceConfig::Disabled,
            gps: false,

            temp_delta_threshold: 0.1,
            hum_delta_threshold: 1.0,

            gas_delta_threshold: 5.0,
            gas_ratio_clean_air: 9.83,
            gas_a: 658.71,
            gas_b: -2.168,

            acc_threshold: 2.0,
            angle_threshold: 60.0,
            max_time_between_ms: 2000,
            step_threshold: 1.2,
            step_debounce_ms: 300,
            x_offset: 0.0737,
            y_offset: -0.6132,
            z_offset: -0.9986,

            battery_divider: 2.0,
            battery_vmax: 4.2,
            battery_vmin: 3.3,
        }
    }
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            accel_report_ms: 1000,
            accel_sample_ms: 50,
            battery_ms: 2000,
            bluetooth_tick_ms: 1000,
            bluetooth_report_ms: 10_000,
            dht_ms: 60_000,
            gas_ms: 2000,
            gps_ms: 30_000,
            network_ms: 10_000,
        }
    }
}

impl IntervalsConfig {
    pub fn period(ms: u64) -> Duration {
        Duration::from_millis(ms.max(1))
    }
}

impl Config {
    /// Get the default config file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sentinel").join("config.toml"))
    }

    /// Load config from `path` (or the default location), falling back to defaults
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::path) {
            Some(path) => path,
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                return Self::default().with_env();
            }
        };

        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Self::default().with_env();
        }

        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read config file: {}", e);
                Self::default()
            }
        };

        config.with_env()
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply secrets from the environment
    fn with_env(mut self) -> Self {
        if let Ok(password) = std::env::var(ENV_WIFI_PASSWORD) {
            self.network.password = password;
        }
        if let Ok(secret) = std::env::var(ENV_BACKEND_SECRET) {
            self.backend.secret = Some(secret);
        }
        self
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::invalid("device_id", "must not be empty"));
        }
        if self.backend.data_url.trim().is_empty() {
            return Err(ConfigError::invalid("backend.data_url", "must not be empty"));
        }
        if self.backend.auth_mode == AuthMode::Backend && self.backend.auth_url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "backend.auth_url",
                "required when auth_mode is backend",
            ));
        }
        if self.backend.auth_retry_attempts == 0 {
            return Err(ConfigError::invalid("backend.auth_retry_attempts", "must be at least 1"));
        }
        if self.ble.enabled && !is_valid_address(&self.ble.strap_address) {
            return Err(ConfigError::invalid(
                "ble.strap_address",
                format!("{:?} is not a 48-bit address", self.ble.strap_address),
            ));
        }

        let s = &self.sensors;
        let positive = [
            ("sensors.temp_delta_threshold", s.temp_delta_threshold),
            ("sensors.hum_delta_threshold", s.hum_delta_threshold),
            ("sensors.gas_delta_threshold", s.gas_delta_threshold),
            ("sensors.gas_ratio_clean_air", s.gas_ratio_clean_air),
            ("sensors.acc_threshold", s.acc_threshold),
            ("sensors.angle_threshold", s.angle_threshold),
            ("sensors.step_threshold", s.step_threshold),
            ("sensors.battery_divider", s.battery_divider),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(field, format!("{} must be positive", value)));
            }
        }
        if s.battery_vmax <= s.battery_vmin {
            return Err(ConfigError::invalid(
                "sensors.battery_vmax",
                "must be greater than battery_vmin",
            ));
        }

        Ok(())
    }
}

/// Check for a colon-separated 48-bit address like "a0:9e:1a:ec:35:1e"
pub fn is_valid_address(address: &str) -> bool {
    let parts: Vec<&str> = address.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.device_id, "SENTINEL-001");
        assert_eq!(config.backend.auth_mode, AuthMode::Backend);
        assert_eq!(config.intervals.dht_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let config = Config::parse(include_str!("../config.toml.example")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensors.battery, BatterySourceConfig::Disabled);
        assert_eq!(config.sensors.dht, SourceConfig::Disabled);
        assert_eq!(config.intervals.gps_ms, IntervalsConfig::default().gps_ms);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            device_id = "SENTINEL-042"

            [network]
            ssid = "lab"

            [sensors]
            gas_delta_threshold = 10.0

            [sensors.dht]
            kind = "iio"
            device = "/sys/bus/iio/devices/iio:device0"
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, "SENTINEL-042");
        assert_eq!(config.network.ssid, "lab");
        assert_eq!(config.network.apn, "internet");
        assert_eq!(config.sensors.gas_delta_threshold, 10.0);
        assert_eq!(config.sensors.hum_delta_threshold, 1.0);
        assert_eq!(
            config.sensors.dht,
            SourceConfig::Iio {
                device: PathBuf::from("/sys/bus/iio/devices/iio:device0")
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
device_id = "SENTINEL-007"

[sensors.battery]
kind = "iio"
device = "/sys/bus/iio/devices/iio:device1"
channel = 3
"#,
        )
        .unwrap();

        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.device_id, "SENTINEL-007");
        assert_eq!(
            loaded.sensors.battery,
            BatterySourceConfig::Iio {
                device: PathBuf::from("/sys/bus/iio/devices/iio:device1"),
                channel: 3,
            }
        );
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "device_id = [").unwrap();

        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.device_id, "SENTINEL-001");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.device_id = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ble.strap_address = "a0:9e:1a:ec:35".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensors.step_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensors.battery_vmin = 4.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_address_check() {
        assert!(is_valid_address("A0:9E:1A:EC:35:1E"));
        assert!(!is_valid_address("a0-9e-1a-ec-35-1e"));
        assert!(!is_valid_address("a0:9e:1a:ec:35:1g"));
    }
}
