//! Configuration management for Wavetalk.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name announced in discovery responses.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Whether the device answers discovery requests.
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Reliable-send retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Audio pipeline configuration.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Key lifetime policy.
    #[serde(default)]
    pub key_policy: KeyPolicyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_device_name() -> String {
    "WT-PRO".into()
}
fn default_visible() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            visible: default_visible(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            audio: AudioConfig::default(),
            key_policy: KeyPolicyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() || self.device_name.len() > crate::types::NAME_MAX_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "device_name must be 1..={} bytes",
                crate::types::NAME_MAX_LENGTH
            )));
        }

        if self.session.call_timeout < Duration::from_secs(1) {
            return Err(Error::InvalidConfig("call_timeout below 1s".into()));
        }

        if self.session.inactivity_timeout < Duration::from_secs(60) {
            return Err(Error::InvalidConfig(
                "inactivity_timeout must be at least 60s".into(),
            ));
        }

        if self.audio.jitter_depth == 0 {
            return Err(Error::InvalidConfig("jitter_depth must be nonzero".into()));
        }

        if self.retry.attempts == 0 {
            return Err(Error::InvalidConfig("retry attempts must be nonzero".into()));
        }

        Ok(())
    }
}

/// Session timing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait in WAITING for a call/join response.
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,

    /// CONNECTED sessions expire after this long without any inbound packet.
    #[serde(default = "default_inactivity_timeout", with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    /// Heartbeat interval while CONNECTED and otherwise idle.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// How often a CONNECTED worker polls the key-refresh predicate.
    #[serde(default = "default_refresh_poll", with = "humantime_serde")]
    pub key_refresh_poll: Duration,
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}
fn default_refresh_poll() -> Duration {
    Duration::from_secs(5)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            inactivity_timeout: default_inactivity_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            key_refresh_poll: default_refresh_poll(),
        }
    }
}

/// Retransmission ladder for ACK-required control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retransmit; doubles on each attempt.
    #[serde(default = "default_retry_base", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Number of transmissions before giving up (initial send included).
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
}

fn default_retry_base() -> Duration {
    Duration::from_millis(100)
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_retry_base(),
            attempts: default_retry_attempts(),
        }
    }
}

/// Audio pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frame duration in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_duration_ms: u8,

    /// Frames to accumulate before playback starts.
    #[serde(default = "default_jitter_depth")]
    pub jitter_depth: usize,
}

fn default_sample_rate() -> u32 {
    8_000
}
fn default_frame_ms() -> u8 {
    20
}
fn default_jitter_depth() -> usize {
    3
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_duration_ms: default_frame_ms(),
            jitter_depth: default_jitter_depth(),
        }
    }
}

/// Key lifetime policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPolicyConfig {
    /// Rekey after this many packets under one key.
    #[serde(default = "default_max_packets")]
    pub max_packets: u64,

    /// Rekey after the key has been in use this long.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,
}

fn default_max_packets() -> u64 {
    1 << 24
}
fn default_max_age() -> Duration {
    Duration::from_secs(3600)
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            max_packets: default_max_packets(),
            max_age: default_max_age(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include span targets in output.
    #[serde(default)]
    pub show_target: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            show_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_policy_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.session.call_timeout, Duration::from_secs(30));
        assert_eq!(config.key_policy.max_packets, 1 << 24);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.audio.jitter_depth, 3);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.call_timeout, config.session.call_timeout);
        assert_eq!(parsed.device_name, config.device_name);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.audio.jitter_depth = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.session.inactivity_timeout = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }
}
