//! Timing and capacity limits for adb operations

use lazy_static::lazy_static;
use std::env;

pub const EXEC_TIMEOUT_ENV: &str = "DROID_BRIDGE_EXEC_TIMEOUT_MS";
pub const DEVICE_WAIT_TIMEOUT_ENV: &str = "DROID_BRIDGE_DEVICE_WAIT_TIMEOUT_MS";
pub const DEVICE_POLL_ENV: &str = "DROID_BRIDGE_DEVICE_POLL_MS";
pub const SERVER_RESTART_DELAY_ENV: &str = "DROID_BRIDGE_SERVER_RESTART_DELAY_MS";
pub const LOGCAT_START_TIMEOUT_ENV: &str = "DROID_BRIDGE_LOGCAT_START_TIMEOUT_MS";
pub const LOGCAT_EXIT_POLL_ENV: &str = "DROID_BRIDGE_LOGCAT_EXIT_POLL_MS";
pub const LOG_BUFFER_CAPACITY_ENV: &str = "DROID_BRIDGE_LOG_BUFFER_CAPACITY";
pub const INSTALL_TIMEOUT_ENV: &str = "DROID_BRIDGE_INSTALL_TIMEOUT_MS";

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Command execution limits
#[derive(Debug, Clone)]
pub struct ExecTimingConfig {
    pub default_timeout_ms: u64,
}

impl Default for ExecTimingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: env_u64(EXEC_TIMEOUT_ENV, 20_000),
        }
    }
}

/// Device discovery limits for the wait-for-device loop
#[derive(Debug, Clone)]
pub struct DiscoveryTimingConfig {
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub server_restart_delay_ms: u64,
}

impl Default for DiscoveryTimingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: env_u64(DEVICE_WAIT_TIMEOUT_ENV, 20_000),
            poll_interval_ms: env_u64(DEVICE_POLL_ENV, 1_000),
            server_restart_delay_ms: env_u64(SERVER_RESTART_DELAY_ENV, 1_000),
        }
    }
}

/// Log capture limits
#[derive(Debug, Clone)]
pub struct LogcatTimingConfig {
    pub start_timeout_ms: u64,
    pub exit_poll_ms: u64,
    pub default_buffer_capacity: usize,
}

impl Default for LogcatTimingConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: env_u64(LOGCAT_START_TIMEOUT_ENV, 10_000),
            exit_poll_ms: env_u64(LOGCAT_EXIT_POLL_ENV, 100),
            default_buffer_capacity: env_usize(LOG_BUFFER_CAPACITY_ENV, 10_000),
        }
    }
}

/// App management limits
#[derive(Debug, Clone)]
pub struct AppsTimingConfig {
    pub install_timeout_ms: u64,
}

impl Default for AppsTimingConfig {
    fn default() -> Self {
        Self {
            install_timeout_ms: env_u64(INSTALL_TIMEOUT_ENV, 60_000),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default)]
pub struct TimingConfig {
    pub exec: ExecTimingConfig,
    pub discovery: DiscoveryTimingConfig,
    pub logcat: LogcatTimingConfig,
    pub apps: AppsTimingConfig,
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env_overrides() {
        let config = TimingConfig::default();
        assert_eq!(config.exec.default_timeout_ms, 20_000);
        assert_eq!(config.logcat.default_buffer_capacity, 10_000);
        assert_eq!(config.logcat.start_timeout_ms, 10_000);
        assert_eq!(config.apps.install_timeout_ms, 60_000);
    }
}
