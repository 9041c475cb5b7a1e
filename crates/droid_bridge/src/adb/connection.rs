//! Connection management: device discovery, remote connect/disconnect, and
//! the wait loop the executor's retry path leans on

use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::TIMING_CONFIG;
use crate::error::{AdbError, Result};

use super::channel::{DeviceChannel, ExecOptions};
use super::parse;

/// Transport a device is attached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Emulator,
    Tcp,
}

/// Connection state as reported by `adb devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Device,
    Offline,
    Unauthorized,
    Connecting,
    Unknown(String),
}

impl DeviceState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => Self::Device,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "connecting" => Self::Connecting,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == Self::Device
    }
}

/// One attached device or emulator
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: DeviceState,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

/// Lists all devices known to the adb server.
pub async fn list_devices(channel: &DeviceChannel) -> Result<Vec<DeviceInfo>> {
    let raw = channel
        .exec_host(&["devices", "-l"], &ExecOptions::default())
        .await?;
    Ok(parse::parse_device_list(&raw))
}

/// Connects to a remote device over TCP/IP. A bare host gets the default
/// adb port appended.
pub async fn connect(channel: &DeviceChannel, address: &str) -> Result<String> {
    let address = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:5555")
    };
    let response = channel
        .exec_host(&["connect", &address], &ExecOptions::default())
        .await?;
    // `adb connect` reports failures on stdout with a zero exit
    if response.to_lowercase().contains("connected") {
        Ok(address)
    } else {
        Err(AdbError::CommandFailed(response))
    }
}

/// Disconnects one remote device, or all of them when no address is given.
pub async fn disconnect(channel: &DeviceChannel, address: Option<&str>) -> Result<String> {
    let mut args = vec!["disconnect"];
    if let Some(addr) = address {
        args.push(addr);
    }
    channel.exec_host(&args, &ExecOptions::default()).await
}

/// Restarts the adb server, giving it a moment to come back up.
pub async fn restart_server(channel: &DeviceChannel) -> Result<()> {
    channel
        .exec_host(&["kill-server"], &ExecOptions::default())
        .await?;
    sleep(Duration::from_millis(
        TIMING_CONFIG.discovery.server_restart_delay_ms,
    ))
    .await;
    channel
        .exec_host(&["start-server"], &ExecOptions::default())
        .await?;
    Ok(())
}

/// Polls the device list until the channel's device (or any device, when no
/// serial is pinned) reports `device` state.
///
/// Listing runs unguarded so the executor's retry path can call this while
/// it already holds the exec gate.
pub async fn wait_for_device(channel: &DeviceChannel, timeout: Duration) -> Result<()> {
    let poll = Duration::from_millis(TIMING_CONFIG.discovery.poll_interval_ms);
    let listing_timeout = Duration::from_millis(TIMING_CONFIG.exec.default_timeout_ms);
    let deadline = Instant::now() + timeout;
    loop {
        match channel
            .run_host_unguarded(&["devices", "-l"], listing_timeout)
            .await
        {
            Ok(output) => {
                let devices = parse::parse_device_list(&output.stdout);
                let ready = match channel.serial() {
                    Some(serial) => devices
                        .iter()
                        .any(|d| d.serial == serial && d.state.is_ready()),
                    None => devices.iter().any(|d| d.state.is_ready()),
                };
                if ready {
                    debug!("device ready");
                    return Ok(());
                }
            }
            Err(err) => {
                warn!(error = %err, "device listing failed while waiting for a device");
            }
        }
        if Instant::now() + poll > deadline {
            let detail = match channel.serial() {
                Some(serial) => format!(
                    "{serial} did not reach `device` state within {} ms",
                    timeout.as_millis()
                ),
                None => format!(
                    "no device reached `device` state within {} ms",
                    timeout.as_millis()
                ),
            };
            return Err(AdbError::DeviceNotFound(detail));
        }
        sleep(poll).await;
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_adb(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("fake-adb");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn list_devices_parses_server_output() {
        let dir = tempfile::tempdir().unwrap();
        let adb = fake_adb(
            &dir,
            "echo 'List of devices attached'\nprintf 'emulator-5554\\tdevice product:sdk model:sdk_gphone_x86 device:generic\\n'",
        );
        let channel = DeviceChannel::with_path(&adb);
        let devices = list_devices(&channel).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].state.is_ready());
    }

    #[tokio::test]
    async fn wait_for_device_resolves_when_serial_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let adb = fake_adb(
            &dir,
            "echo 'List of devices attached'\nprintf 'pixel-7\\tdevice\\n'",
        );
        let channel = DeviceChannel::with_path(&adb).with_serial("pixel-7");
        wait_for_device(&channel, Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_device_times_out_without_a_ready_device() {
        let dir = tempfile::tempdir().unwrap();
        let adb = fake_adb(
            &dir,
            "echo 'List of devices attached'\nprintf 'pixel-7\\toffline\\n'",
        );
        let channel = DeviceChannel::with_path(&adb).with_serial("pixel-7");
        let err = wait_for_device(&channel, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, AdbError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn connect_rejects_failure_reported_on_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let adb = fake_adb(&dir, "echo 'failed to connect to 192.168.1.9:5555'");
        let channel = DeviceChannel::with_path(&adb);
        let err = connect(&channel, "192.168.1.9").await.unwrap_err();
        assert!(matches!(err, AdbError::CommandFailed(_)));
    }

    #[tokio::test]
    async fn connect_appends_default_port() {
        let dir = tempfile::tempdir().unwrap();
        let adb = fake_adb(&dir, "echo \"connected to $2\"");
        let channel = DeviceChannel::with_path(&adb);
        let address = connect(&channel, "192.168.1.9").await.unwrap();
        assert_eq!(address, "192.168.1.9:5555");
    }
}
