//! Configuration management for Framelink services

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Frame transport tuning knobs.
///
/// All durations are stored in milliseconds so the struct stays plain
/// `Deserialize`; use the accessor methods where a `Duration` is needed.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Largest fragment payload put on the wire, in bytes
    pub max_segment_size: usize,
    /// Per-attempt handshake wait
    pub handshake_timeout_ms: u64,
    /// Handshake retry budget (attempts after the first)
    pub handshake_max_retries: u32,
    /// First retry delay
    pub handshake_initial_delay_ms: u64,
    /// Backoff cap
    pub handshake_max_delay_ms: u64,
    /// Keepalive send period
    pub keepalive_interval_ms: u64,
    /// Silence window after which the peer is considered gone
    pub keepalive_timeout_ms: u64,
    /// Outbound frame queue depth
    pub send_queue_capacity: usize,
    /// Concurrent in-progress inbound frames kept per stream
    pub reassembly_max_entries: usize,
    /// Age after which an incomplete inbound frame is dropped
    pub reassembly_timeout_ms: u64,
    /// Datagram receive buffer size, in bytes
    pub recv_buffer_size: usize,
    pub log_level: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            // Below the common 1500-byte path MTU with room for IP/UDP
            // and the fragment header.
            max_segment_size: 1200,
            handshake_timeout_ms: 1000,
            handshake_max_retries: 5,
            handshake_initial_delay_ms: 250,
            handshake_max_delay_ms: 4000,
            keepalive_interval_ms: 1000,
            keepalive_timeout_ms: 5000,
            send_queue_capacity: 64,
            reassembly_max_entries: 32,
            reassembly_timeout_ms: 3000,
            recv_buffer_size: 2048,
            log_level: None,
        }
    }
}

impl TransportConfig {
    /// Load configuration from environment variables
    ///
    /// Every knob falls back to its default when the variable is unset.
    /// A variable that is set but unparsable is a deployment error and is
    /// reported rather than silently replaced.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = TransportConfig::default();

        Ok(Self {
            max_segment_size: env_or("FRAMELINK_MAX_SEGMENT_SIZE", defaults.max_segment_size)?,
            handshake_timeout_ms: env_or(
                "FRAMELINK_HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout_ms,
            )?,
            handshake_max_retries: env_or(
                "FRAMELINK_HANDSHAKE_MAX_RETRIES",
                defaults.handshake_max_retries,
            )?,
            handshake_initial_delay_ms: env_or(
                "FRAMELINK_HANDSHAKE_INITIAL_DELAY_MS",
                defaults.handshake_initial_delay_ms,
            )?,
            handshake_max_delay_ms: env_or(
                "FRAMELINK_HANDSHAKE_MAX_DELAY_MS",
                defaults.handshake_max_delay_ms,
            )?,
            keepalive_interval_ms: env_or(
                "FRAMELINK_KEEPALIVE_INTERVAL_MS",
                defaults.keepalive_interval_ms,
            )?,
            keepalive_timeout_ms: env_or(
                "FRAMELINK_KEEPALIVE_TIMEOUT_MS",
                defaults.keepalive_timeout_ms,
            )?,
            send_queue_capacity: env_or(
                "FRAMELINK_SEND_QUEUE_CAPACITY",
                defaults.send_queue_capacity,
            )?,
            reassembly_max_entries: env_or(
                "FRAMELINK_REASSEMBLY_MAX_ENTRIES",
                defaults.reassembly_max_entries,
            )?,
            reassembly_timeout_ms: env_or(
                "FRAMELINK_REASSEMBLY_TIMEOUT_MS",
                defaults.reassembly_timeout_ms,
            )?,
            recv_buffer_size: env_or("FRAMELINK_RECV_BUFFER_SIZE", defaults.recv_buffer_size)?,
            log_level: env::var("FRAMELINK_LOG_LEVEL").ok(),
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, config::ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| config::ConfigError::Message(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
