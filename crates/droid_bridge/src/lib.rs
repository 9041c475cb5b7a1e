//! droid_bridge: programmatic control of Android devices through the
//! external `adb` executable
//!
//! This library provides:
//! - `adb::DeviceChannel`: command execution with timeouts, a one-shot retry
//!   on transient connection faults, and an exclusive execution mode
//! - `adb::Logcat`: long-lived log capture into a capacity-bounded ring
//!   buffer, with incremental draining and a broadcast event stream
//! - Connection, device, app, and screenshot helpers layered on the channel
//!
//! # Example
//!
//! ```no_run
//! use droid_bridge::{DeviceChannel, Logcat, LogcatConfig};
//!
//! #[tokio::main]
//! async fn main() -> droid_bridge::Result<()> {
//!     let channel = DeviceChannel::new().with_serial("emulator-5554");
//!     let logcat = Logcat::new(channel.clone(), LogcatConfig::default());
//!     logcat.start().await?;
//!     let fresh = logcat.new_logs()?;
//!     println!("captured {} lines", fresh.len());
//!     logcat.stop().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;

// Configuration module
pub mod config;

// adb integration
pub mod adb;

// Re-export commonly used types
pub use adb::{
    CommandOutput, ConnectionType, DeviceChannel, DeviceInfo, DeviceState, ExecOptions,
    LogEntry, Logcat, LogcatConfig, LogcatFormat, Screenshot,
};
pub use error::{AdbError, Result};
