//! # Configuration System
//!
//! YAML-based configuration for the burst tester:
//!
//! - Device configuration (connection args, clock/time source, master clock)
//! - Per-chain TX/RX settings (divider, bandwidth, gain, antenna, frequency)
//! - Burst scheduling parameters (period, burst lengths, separation, lead time)
//! - Initialization pacing and logging
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `RFBURST_CONFIG` environment variable
//! 2. `./rfburst.yaml` (current directory)
//! 3. `~/.config/rfburst/config.yaml` (user config)
//! 4. `/etc/rfburst/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! sdr:
//!   args: "driver=lime"
//!   master_clock_rate: 133.333333e6
//!   timeout: 2.0
//!   tx:
//!     clock_divider: 8
//!     gain: 52.0
//!     antenna: "BAND1"
//!     frequency: 1457e6
//!
//! signal:
//!   burst_period: 100e-3
//!   tx_burst_length: 5e-3
//! ```

use crate::observe::LogConfig;
use crate::types::Direction;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("config not found: {0}")]
    NotFound(String),
    /// Failed to read configuration file
    #[error("failed to read config: {0}")]
    ReadError(String),
    /// Failed to parse configuration
    #[error("failed to parse config: {0}")]
    ParseError(String),
    /// Invalid configuration value
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Longest accepted streaming timeout in seconds.
pub const MAX_TIMEOUT_SECS: f64 = u32::MAX as f64;

/// Settings of one TX or RX chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainConfig {
    /// Whether this chain is configured and streamed at all
    pub active: bool,
    /// Channel index on the device
    pub channel: usize,
    /// Master clock divider; sample rate = master_clock_rate / clock_divider
    pub clock_divider: u16,
    /// Baseband filter bandwidth in Hz (0 = leave device default)
    pub bandwidth: f64,
    /// Chain gain in dB
    pub gain: f64,
    /// Antenna port name
    pub antenna: String,
    /// Center frequency in Hz
    pub frequency: f64,
}

impl ChainConfig {
    /// LimeSDR transmit chain profile.
    pub fn tx_default() -> Self {
        Self {
            active: true,
            channel: 0,
            clock_divider: 8,
            bandwidth: 16.666667e6,
            gain: 52.0,
            antenna: "BAND1".to_string(),
            frequency: 1457e6,
        }
    }

    /// LimeSDR receive chain profile.
    pub fn rx_default() -> Self {
        Self {
            gain: 20.0,
            antenna: "LNAL".to_string(),
            ..Self::tx_default()
        }
    }
}

/// Partial chain section as written in YAML. Missing fields keep the
/// profile of the chain the section belongs to.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChainOverlay {
    active: Option<bool>,
    channel: Option<usize>,
    clock_divider: Option<u16>,
    bandwidth: Option<f64>,
    gain: Option<f64>,
    antenna: Option<String>,
    frequency: Option<f64>,
}

impl ChainOverlay {
    fn apply(self, mut chain: ChainConfig) -> ChainConfig {
        if let Some(active) = self.active {
            chain.active = active;
        }
        if let Some(channel) = self.channel {
            chain.channel = channel;
        }
        if let Some(divider) = self.clock_divider {
            chain.clock_divider = divider;
        }
        if let Some(bandwidth) = self.bandwidth {
            chain.bandwidth = bandwidth;
        }
        if let Some(gain) = self.gain {
            chain.gain = gain;
        }
        if let Some(antenna) = self.antenna {
            chain.antenna = antenna;
        }
        if let Some(frequency) = self.frequency {
            chain.frequency = frequency;
        }
        chain
    }
}

fn tx_chain<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChainConfig, D::Error> {
    ChainOverlay::deserialize(deserializer).map(|overlay| overlay.apply(ChainConfig::tx_default()))
}

fn rx_chain<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChainConfig, D::Error> {
    ChainOverlay::deserialize(deserializer).map(|overlay| overlay.apply(ChainConfig::rx_default()))
}

/// Operating parameters of one radio device and its TX/RX chains.
///
/// Read-only once initialization begins; shared as `Arc<DeviceConfig>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device connection arguments (e.g. "driver=lime,serial=...")
    pub args: String,
    /// Clock source (None or empty = leave device default)
    pub clock_source: Option<String>,
    /// Time source (None or empty = leave device default)
    pub time_source: Option<String>,
    /// Master clock rate in Hz, shared by TX and RX
    pub master_clock_rate: f64,
    /// Streaming operation timeout in seconds
    pub timeout: f64,
    /// Log every setting and its readback during initialization
    pub debug_settings: bool,
    /// Transmit chain
    #[serde(deserialize_with = "tx_chain")]
    pub tx: ChainConfig,
    /// Receive chain
    #[serde(deserialize_with = "rx_chain")]
    pub rx: ChainConfig,
    /// Samples per TX burst (derived from scheduling parameters)
    #[serde(skip)]
    pub buffer_size_tx: usize,
    /// Samples per RX burst (derived from scheduling parameters)
    #[serde(skip)]
    pub buffer_size_rx: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            args: String::new(),
            clock_source: None,
            time_source: None,
            master_clock_rate: 133.333333e6,
            timeout: 2.0,
            debug_settings: true,
            tx: ChainConfig::tx_default(),
            rx: ChainConfig::rx_default(),
            buffer_size_tx: 0,
            buffer_size_rx: 0,
        }
    }
}

impl DeviceConfig {
    /// Settings of the chain in the given direction.
    pub fn chain(&self, direction: Direction) -> &ChainConfig {
        match direction {
            Direction::Tx => &self.tx,
            Direction::Rx => &self.rx,
        }
    }

    /// Mutable settings of the chain in the given direction.
    pub fn chain_mut(&mut self, direction: Direction) -> &mut ChainConfig {
        match direction {
            Direction::Tx => &mut self.tx,
            Direction::Rx => &mut self.rx,
        }
    }

    /// Sample rate of a chain in Hz: `master_clock_rate / clock_divider`.
    pub fn sample_rate(&self, direction: Direction) -> f64 {
        self.master_clock_rate / f64::from(self.chain(direction).clock_divider)
    }

    /// Clock source to apply, if any.
    pub fn clock_source(&self) -> Option<&str> {
        self.clock_source.as_deref().filter(|s| !s.is_empty())
    }

    /// Time source to apply, if any.
    pub fn time_source(&self) -> Option<&str> {
        self.time_source.as_deref().filter(|s| !s.is_empty())
    }

    /// Streaming timeout as a duration, clamped to [`MAX_TIMEOUT_SECS`].
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout.clamp(0.0, MAX_TIMEOUT_SECS))
            .unwrap_or(Duration::ZERO)
    }

    /// Samples per burst for a chain.
    pub fn buffer_size(&self, direction: Direction) -> usize {
        match direction {
            Direction::Tx => self.buffer_size_tx,
            Direction::Rx => self.buffer_size_rx,
        }
    }

    /// Attach the per-burst buffer sizes derived from the scheduling parameters.
    pub fn with_buffer_sizes(mut self, params: &SchedulingParams) -> Self {
        self.buffer_size_tx = params.samples_per_burst(params.tx_burst_length, self.sample_rate(Direction::Tx));
        self.buffer_size_rx = params.samples_per_burst(params.rx_burst_length, self.sample_rate(Direction::Rx));
        self
    }

    /// Active directions in initialization order (TX before RX).
    pub fn active_chains(&self) -> impl Iterator<Item = Direction> + '_ {
        [Direction::Tx, Direction::Rx]
            .into_iter()
            .filter(move |dir| self.chain(*dir).active)
    }

    /// Validate the device configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.master_clock_rate > 0.0 && self.master_clock_rate.is_finite()) {
            return Err(ConfigError::ValidationError(
                "master_clock_rate must be positive and finite".to_string(),
            ));
        }
        if !(self.timeout > 0.0 && self.timeout <= MAX_TIMEOUT_SECS) {
            return Err(ConfigError::ValidationError(format!(
                "timeout must be within (0, {}] s",
                MAX_TIMEOUT_SECS
            )));
        }
        for dir in self.active_chains() {
            let chain = self.chain(dir);
            if chain.clock_divider == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} clock_divider must be > 0",
                    dir
                )));
            }
            if !(chain.bandwidth >= 0.0 && chain.bandwidth.is_finite()) {
                return Err(ConfigError::ValidationError(format!(
                    "{} bandwidth must be finite and >= 0",
                    dir
                )));
            }
            if !(chain.gain.is_finite() && chain.frequency.is_finite()) {
                return Err(ConfigError::ValidationError(format!(
                    "{} gain and frequency must be finite",
                    dir
                )));
            }
        }
        Ok(())
    }
}

/// Burst scheduling parameters, all in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingParams {
    /// TX/RX burst cycle period
    pub burst_period: f64,
    /// Length of TX bursts
    pub tx_burst_length: f64,
    /// Length of RX bursts
    pub rx_burst_length: f64,
    /// Time by which RX arms ahead of the TX burst it follows
    pub rx_tx_separation: f64,
    /// Lead time before the first burst
    pub time_in_future: f64,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        Self {
            burst_period: 100e-3,
            tx_burst_length: 5e-3,
            rx_burst_length: 5e-3,
            rx_tx_separation: 1e-3,
            time_in_future: 1.0,
        }
    }
}

impl SchedulingParams {
    /// Whole samples covered by `length` seconds at `sample_rate`.
    pub fn samples_per_burst(&self, length: f64, sample_rate: f64) -> usize {
        (length * sample_rate).max(0.0).floor() as usize
    }

    /// Master clock ticks per burst period.
    pub fn ticks_per_period(&self, master_clock_rate: f64) -> i64 {
        (self.burst_period * master_clock_rate).floor() as i64
    }

    /// Validate the scheduling parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.burst_period > 0.0 && self.burst_period.is_finite()) {
            return Err(ConfigError::ValidationError(
                "burst_period must be positive and finite".to_string(),
            ));
        }
        for (name, length) in [
            ("tx_burst_length", self.tx_burst_length),
            ("rx_burst_length", self.rx_burst_length),
        ] {
            if !(0.0..=self.burst_period).contains(&length) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be within [0, burst_period]",
                    name
                )));
            }
        }
        if !(0.0..self.burst_period).contains(&self.rx_tx_separation) {
            return Err(ConfigError::ValidationError(
                "rx_tx_separation must be within [0, burst_period)".to_string(),
            ));
        }
        if !(self.time_in_future >= 0.0 && self.time_in_future.is_finite()) {
            return Err(ConfigError::ValidationError(
                "time_in_future must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pacing of the device initialization sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Pause between failed initialization attempts (ms)
    pub retry_delay_ms: u64,
    /// LO lock sensor polling interval (µs)
    pub lo_lock_poll_us: u64,
    /// Settling delay between teardown steps (µs)
    pub settle_delay_us: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 100,
            lo_lock_poll_us: 100,
            settle_delay_us: 100,
        }
    }
}

impl InitConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn lo_lock_poll(&self) -> Duration {
        Duration::from_micros(self.lo_lock_poll_us)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_micros(self.settle_delay_us)
    }
}

/// Complete burst tester configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RfburstConfig {
    /// Device configuration
    pub sdr: DeviceConfig,
    /// Burst scheduling parameters
    pub signal: SchedulingParams,
    /// Initialization pacing
    pub init: InitConfig,
    /// Logging configuration
    pub logging: LogConfig,
}

impl RfburstConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("RFBURST_CONFIG") {
            if Path::new(&path).exists() {
                return Self::load_from(Path::new(&path));
            }
        }

        for path in &Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./rfburst.yaml")];

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "rfburst") {
            paths.push(config_dir.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/rfburst/config.yaml"));

        paths
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sdr.validate()?;
        self.signal.validate()?;
        if self.sdr.active_chains().next().is_none() {
            tracing::warn!("neither TX nor RX chain is active");
        }
        Ok(())
    }

    /// Device configuration with derived buffer sizes attached.
    pub fn finished_device_config(&self) -> DeviceConfig {
        self.sdr.clone().with_buffer_sizes(&self.signal)
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            sdr: DeviceConfig {
                args: "driver=lime".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RfburstConfig::default();
        assert_eq!(config.sdr.master_clock_rate, 133.333333e6);
        assert_eq!(config.sdr.tx.antenna, "BAND1");
        assert_eq!(config.sdr.rx.antenna, "LNAL");
        assert_eq!(config.sdr.tx.gain, 52.0);
        assert_eq!(config.sdr.rx.gain, 20.0);
        assert_eq!(config.sdr.tx.bandwidth, 16.666667e6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_rate_is_exact_division() {
        let mut device = DeviceConfig::default();
        for divider in [1u16, 2, 3, 8, 7, 1000] {
            device.tx.clock_divider = divider;
            assert_eq!(
                device.sample_rate(Direction::Tx),
                device.master_clock_rate / divider as f64
            );
        }
    }

    #[test]
    fn test_lime_buffer_sizes() {
        let device = DeviceConfig::default().with_buffer_sizes(&SchedulingParams::default());
        let rate = device.sample_rate(Direction::Tx);
        assert!((rate - 16.666667e6).abs() < 1.0);
        assert_eq!(device.buffer_size_tx, 83_333);
        assert_eq!(device.buffer_size_rx, 83_333);
        assert_eq!(device.buffer_size(Direction::Rx), 83_333);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
sdr:
  args: "driver=lime"
  clock_source: "external"
  master_clock_rate: 100e6
  timeout: 0.5
  tx:
    active: false
  rx:
    active: true
    channel: 1
    clock_divider: 4
    bandwidth: 0
    gain: 30.0
    antenna: "LNAW"
    frequency: 2.4e9

signal:
  burst_period: 50e-3
  rx_burst_length: 2e-3

init:
  retry_delay_ms: 250
"#;

        let config = RfburstConfig::parse(yaml).unwrap();
        assert_eq!(config.sdr.args, "driver=lime");
        assert_eq!(config.sdr.clock_source(), Some("external"));
        assert_eq!(config.sdr.time_source(), None);
        assert!(!config.sdr.tx.active);
        assert_eq!(config.sdr.rx.channel, 1);
        assert_eq!(config.sdr.rx.antenna, "LNAW");
        assert_eq!(config.sdr.sample_rate(Direction::Rx), 25e6);
        assert_eq!(config.signal.burst_period, 50e-3);
        assert_eq!(config.signal.tx_burst_length, 5e-3);
        assert_eq!(config.init.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.init.lo_lock_poll(), Duration::from_micros(100));

        let device = config.finished_device_config();
        assert_eq!(device.buffer_size_rx, 50_000);
        assert_eq!(device.active_chains().collect::<Vec<_>>(), vec![Direction::Rx]);
    }

    #[test]
    fn test_partial_chain_sections_keep_chain_profile() {
        let config = RfburstConfig::parse("sdr:\n  rx:\n    gain: 25.0\n  tx:\n    channel: 1\n").unwrap();
        let sdr = &config.sdr;
        assert_eq!(sdr.rx.gain, 25.0);
        assert_eq!(sdr.rx.antenna, "LNAL");
        assert_eq!(sdr.rx.frequency, 1457e6);
        assert_eq!(sdr.tx.channel, 1);
        assert_eq!(sdr.tx.gain, 52.0);
        assert_eq!(sdr.tx.antenna, "BAND1");

        let config = RfburstConfig::parse("sdr:\n  rx: {}\n").unwrap();
        assert_eq!(config.sdr.rx, ChainConfig::rx_default());
        assert_eq!(config.sdr.tx, ChainConfig::tx_default());
    }

    #[test]
    fn test_save_load_keeps_chain_profiles() {
        let path = std::env::temp_dir().join(format!("rfburst-{}.yaml", std::process::id()));
        let mut config = RfburstConfig::default();
        config.sdr.rx.gain = 33.0;
        config.save(&path).unwrap();
        let loaded = RfburstConfig::load_from(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.sdr.rx.gain, 33.0);
        assert_eq!(loaded.sdr.rx.antenna, "LNAL");
        assert_eq!(loaded.sdr.tx, ChainConfig::tx_default());
    }

    #[test]
    fn test_empty_sources_are_none() {
        let yaml = r#"
sdr:
  clock_source: ""
  time_source: "gpsdo"
"#;
        let config = RfburstConfig::parse(yaml).unwrap();
        assert_eq!(config.sdr.clock_source(), None);
        assert_eq!(config.sdr.time_source(), Some("gpsdo"));
    }

    #[test]
    fn test_validation() {
        let mut config = RfburstConfig::default();
        config.sdr.master_clock_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.sdr.tx.clock_divider = 0;
        assert!(config.validate().is_err());

        // Inactive chains are inert
        config.sdr.tx.active = false;
        assert!(config.validate().is_ok());

        let mut config = RfburstConfig::default();
        config.signal.rx_tx_separation = config.signal.burst_period;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.signal.tx_burst_length = 1.0;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.sdr.timeout = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_non_finite() {
        for timeout in [f64::INFINITY, f64::NAN, 1e300] {
            let mut config = RfburstConfig::default();
            config.sdr.timeout = timeout;
            assert!(config.validate().is_err(), "timeout {}", timeout);
        }

        let mut config = RfburstConfig::default();
        config.sdr.master_clock_rate = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.sdr.rx.bandwidth = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.signal.burst_period = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.signal.rx_burst_length = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.signal.rx_tx_separation = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RfburstConfig::default();
        config.signal.time_in_future = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_duration_never_panics() {
        let mut device = DeviceConfig::default();
        assert_eq!(device.timeout_duration(), Duration::from_secs(2));

        device.timeout = f64::INFINITY;
        assert_eq!(device.timeout_duration(), Duration::from_secs(u32::MAX as u64));

        device.timeout = f64::NAN;
        assert_eq!(device.timeout_duration(), Duration::ZERO);

        device.timeout = -1.0;
        assert_eq!(device.timeout_duration(), Duration::ZERO);
    }

    #[test]
    fn test_example_yaml() {
        let yaml = RfburstConfig::example_yaml();
        assert!(yaml.contains("sdr:"));
        assert!(yaml.contains("signal:"));
        let parsed = RfburstConfig::parse(&yaml).unwrap();
        assert_eq!(parsed.sdr.args, "driver=lime");
        assert!(!yaml.contains("buffer_size_tx"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RfburstConfig::load_from(Path::new("/nonexistent/rfburst.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_search_paths() {
        let paths = RfburstConfig::config_search_paths();
        assert!(paths[0].ends_with("rfburst.yaml"));
        assert!(paths.last().unwrap().starts_with("/etc"));
    }
}
