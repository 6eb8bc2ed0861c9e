// MIT License - Copyright (c) 2026 Peter Wright
// Client configuration

use std::time::Duration;

use crate::constants::{
    MAX_INTEGRATION_KEY_LEN, MAX_OUTPUTS, MAX_PARTITIONS, MAX_TEMPERATURE_SENSORS, MAX_ZONES,
};
use crate::error::{Result, SatelError};

/// Arming mode. Mode 0 is full (away) arming, modes 1-3 are the panel's
/// partial (home/night) modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArmMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl ArmMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Mode0),
            1 => Some(Self::Mode1),
            2 => Some(Self::Mode2),
            3 => Some(Self::Mode3),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Mode0 => 0,
            Self::Mode1 => 1,
            Self::Mode2 => 2,
            Self::Mode3 => 3,
        }
    }
}

/// Configuration for connecting to a Satel Integra panel through its ETHM module.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// ETHM module host name or IP address
    pub host: String,
    /// ETHM integration port (default: 7094)
    pub port: u16,
    /// Integration key embedded in every request (up to 12 bytes, may be empty)
    pub integration_key: String,
    /// Partition numbers in use (1-32)
    pub partitions: Vec<u32>,
    /// Zone numbers in use (1-256)
    pub zones: Vec<u32>,
    /// Output numbers in use (1-256)
    pub outputs: Vec<u32>,
    /// Zones with a temperature sensor (1-256)
    pub temperature_sensors: Vec<u32>,
    /// Mode used for "arm home"
    pub arm_home_mode: ArmMode,
    /// How long to wait for a command response
    pub command_timeout_ms: u64,
    /// How long `read_temp_and_wait` waits for the reading
    pub temperature_timeout_ms: u64,
    /// Timeout for a single TCP connect attempt
    pub connect_timeout_ms: u64,
    /// Base delay for reconnection backoff
    pub reconnect_delay_ms: u64,
    /// Upper bound of the reconnection backoff
    pub max_reconnect_delay_ms: u64,
    /// Retries for the initial connection (0 = no retries)
    pub max_connect_retries: u32,
    /// Keep-alive interval (0 disables keep-alive)
    pub keep_alive_interval_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 7094,
            integration_key: String::new(),
            partitions: vec![1],
            zones: Vec::new(),
            outputs: Vec::new(),
            temperature_sensors: Vec::new(),
            arm_home_mode: ArmMode::Mode1,
            command_timeout_ms: 5000,
            temperature_timeout_ms: 10000,
            connect_timeout_ms: 10000,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
            max_connect_retries: 3,
            keep_alive_interval_ms: 20000,
            event_capacity: 256,
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn temperature_timeout(&self) -> Duration {
        Duration::from_millis(self.temperature_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_ms > 0).then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }

    /// Delay before reconnection attempt `attempt` (0-based): doubles from
    /// `reconnect_delay_ms` and saturates at `max_reconnect_delay_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .reconnect_delay_ms
            .saturating_mul(factor)
            .min(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms));
        Duration::from_millis(ms)
    }

    /// Check device numbering and key length.
    pub fn validate(&self) -> Result<()> {
        if self.integration_key.len() > MAX_INTEGRATION_KEY_LEN {
            return Err(SatelError::InvalidConfig {
                details: format!(
                    "integration key is {} bytes (max {})",
                    self.integration_key.len(),
                    MAX_INTEGRATION_KEY_LEN
                ),
            });
        }
        check_ids(&self.partitions, MAX_PARTITIONS)?;
        check_ids(&self.zones, MAX_ZONES)?;
        check_ids(&self.outputs, MAX_OUTPUTS)?;
        check_ids(&self.temperature_sensors, MAX_TEMPERATURE_SENSORS)?;
        if self.event_capacity == 0 {
            return Err(SatelError::InvalidConfig {
                details: "event_capacity must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Verify every id lies in `1..=max`.
pub(crate) fn check_ids(ids: &[u32], max: u32) -> Result<()> {
    match ids.iter().find(|&&id| id == 0 || id > max) {
        Some(&id) => Err(SatelError::InvalidDeviceId { id, max }),
        None => Ok(()),
    }
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn integration_key(mut self, key: impl Into<String>) -> Self {
        self.config.integration_key = key.into();
        self
    }

    pub fn partitions(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.config.partitions = ids.into_iter().collect();
        self
    }

    pub fn zones(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.config.zones = ids.into_iter().collect();
        self
    }

    pub fn outputs(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.config.outputs = ids.into_iter().collect();
        self
    }

    pub fn temperature_sensors(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.config.temperature_sensors = ids.into_iter().collect();
        self
    }

    pub fn arm_home_mode(mut self, mode: ArmMode) -> Self {
        self.config.arm_home_mode = mode;
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    pub fn temperature_timeout_ms(mut self, ms: u64) -> Self {
        self.config.temperature_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_reconnect_delay_ms = ms;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn keep_alive_interval_ms(mut self, ms: u64) -> Self {
        self.config.keep_alive_interval_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}
