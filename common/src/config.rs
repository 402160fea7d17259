use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::MIN_RECORD_BYTES;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`, `COM14`) or `tcp://host:port` for a network bridge.
    pub device: String,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_records_per_tick")]
    pub max_records_per_tick: usize,
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    #[serde(default = "default_signal_timeout_secs")]
    pub signal_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_min_temp")]
    pub min_temp: f32,
    #[serde(default = "default_max_temp")]
    pub max_temp: f32,
    #[serde(default = "default_fever_threshold")]
    pub fever_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_viewer_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_records_per_tick: default_max_records_per_tick(),
            max_record_bytes: default_max_record_bytes(),
            signal_timeout_secs: default_signal_timeout_secs(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            fever_threshold: default_fever_threshold(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            mode: default_viewer_mode(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.device.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.device must not be empty".into()));
        }
        if self.serial.reconnect_initial_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.reconnect_initial_ms must be > 0".into(),
            ));
        }
        if self.pipeline.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("pipeline.tick_interval_ms must be > 0".into()));
        }
        if self.pipeline.max_records_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_records_per_tick must be > 0".into(),
            ));
        }
        if self.pipeline.max_record_bytes < MIN_RECORD_BYTES {
            return Err(ConfigError::Invalid(format!(
                "pipeline.max_record_bytes must be at least {MIN_RECORD_BYTES}"
            )));
        }
        if self.display.min_temp >= self.display.max_temp {
            return Err(ConfigError::Invalid(
                "display.min_temp must be below display.max_temp".into(),
            ));
        }
        Ok(())
    }
}

impl SerialConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs(self.signal_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_tick_interval_ms() -> u64 {
    30
}
fn default_max_records_per_tick() -> usize {
    64
}
fn default_max_record_bytes() -> usize {
    64 * 1024
}
fn default_signal_timeout_secs() -> u64 {
    3
}
fn default_min_temp() -> f32 {
    20.0
}
fn default_max_temp() -> f32 {
    45.0
}
fn default_fever_threshold() -> f32 {
    37.0
}
fn default_viewer_mode() -> String {
    "heatmap".into()
}
fn default_api_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml("[serial]\ndevice = \"/dev/ttyUSB0\"\n").unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.reconnect_initial(), Duration::from_millis(500));
        assert_eq!(config.pipeline.tick_interval(), Duration::from_millis(30));
        assert_eq!(config.pipeline.max_records_per_tick, 64);
        assert_eq!(config.pipeline.signal_timeout(), Duration::from_secs(3));
        assert_eq!(config.display.min_temp, 20.0);
        assert_eq!(config.display.max_temp, 45.0);
        assert_eq!(config.viewer.mode, "heatmap");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_toml(
            r#"
            [serial]
            device = "tcp://192.168.1.50:4000"
            reconnect_max_ms = 2000

            [pipeline]
            tick_interval_ms = 50
            max_records_per_tick = 8

            [viewer]
            mode = "dump"
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.reconnect_max(), Duration::from_millis(2000));
        assert_eq!(config.pipeline.tick_interval_ms, 50);
        assert_eq!(config.pipeline.max_records_per_tick, 8);
        assert_eq!(config.viewer.mode, "dump");
    }

    #[test]
    fn example_config_parses() {
        let config = Config::from_toml(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.display.fever_threshold, 37.0);
    }

    #[test]
    fn missing_serial_section_fails() {
        assert!(matches!(
            Config::from_toml("[logging]\nlevel = \"debug\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_tick_interval_rejected() {
        let err = Config::from_toml(
            "[serial]\ndevice = \"/dev/ttyUSB0\"\n[pipeline]\ntick_interval_ms = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inverted_display_range_rejected() {
        let err = Config::from_toml(
            "[serial]\ndevice = \"/dev/ttyUSB0\"\n[display]\nmin_temp = 40.0\nmax_temp = 30.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_reconnect_delay_rejected() {
        let err = Config::from_toml("[serial]\ndevice = \"x\"\nreconnect_initial_ms = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn record_limit_must_fit_a_frame() {
        let err = Config::from_toml(
            "[serial]\ndevice = \"x\"\n[pipeline]\nmax_record_bytes = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let toml = format!(
            "[serial]\ndevice = \"x\"\n[pipeline]\nmax_record_bytes = {}\n",
            MIN_RECORD_BYTES
        );
        assert!(Config::from_toml(&toml).is_ok());
    }

    #[test]
    fn reconnect_max_never_below_initial() {
        let config = Config::from_toml(
            "[serial]\ndevice = \"x\"\nreconnect_initial_ms = 800\nreconnect_max_ms = 100\n",
        )
        .unwrap();
        assert_eq!(config.serial.reconnect_max(), Duration::from_millis(800));
    }
}
