//! adb integration for Android device automation
//!
//! This module provides:
//! - `channel`: command execution with timeouts, retry, and exclusive mode
//! - `logcat`: long-lived log capture into a bounded ring buffer
//! - `connection`: device discovery and server management
//! - `device` / `apps`: one-shot queries and controls over the channel
//! - `screenshot`: screen capture
//! - `parse`: pure parsers for tool output

mod apps;
mod channel;
mod connection;
mod device;
mod log_buffer;
mod logcat;
pub mod parse;
mod screenshot;

pub use apps::{install, is_installed, list_packages, start_app, stop_app, uninstall};
pub use channel::{CommandOutput, DeviceChannel, ExecOptions};
pub use connection::{
    connect, disconnect, list_devices, restart_server, wait_for_device, ConnectionType,
    DeviceInfo, DeviceState,
};
pub use device::{
    android_version, api_level, get_setting, is_screen_locked, keyevent, put_setting,
    wake_screen, SettingsNamespace,
};
pub use log_buffer::{LogBuffer, LogEntry, CAPTURE_LEVEL};
pub use logcat::{
    sanitize_filter_specs, Logcat, LogcatConfig, LogcatFormat, DEFAULT_FORMAT,
};
pub use screenshot::{get_screenshot, save_screenshot, Screenshot};
