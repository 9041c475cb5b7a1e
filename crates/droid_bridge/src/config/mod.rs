//! Configuration module for droid_bridge
//!
//! This module contains:
//! - `timing`: Timeouts, poll intervals, and capacity limits for adb
//!   operations, overridable through environment variables

mod timing;

pub use timing::{
    AppsTimingConfig, DiscoveryTimingConfig, ExecTimingConfig, LogcatTimingConfig, TimingConfig,
    DEVICE_POLL_ENV, DEVICE_WAIT_TIMEOUT_ENV, EXEC_TIMEOUT_ENV, INSTALL_TIMEOUT_ENV,
    LOGCAT_EXIT_POLL_ENV, LOGCAT_START_TIMEOUT_ENV, LOG_BUFFER_CAPACITY_ENV,
    SERVER_RESTART_DELAY_ENV, TIMING_CONFIG,
};
