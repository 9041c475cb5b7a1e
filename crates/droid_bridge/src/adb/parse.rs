//! Pure parsers for adb tool output.
//!
//! Scraping tool text is version-dependent; keeping every parser here as a
//! small pure function with golden-output tests makes format drift cheap to
//! localize.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AdbError, Result};

use super::connection::{ConnectionType, DeviceInfo, DeviceState};

lazy_static! {
    static ref INSTALL_FAILURE: Regex = Regex::new(r"Failure\s*\[([^\]]+)\]").unwrap();
    /// Lock-state markers from `dumpsys window`, newest Android releases
    /// first.
    static ref LOCK_MARKERS: Vec<Regex> = vec![
        Regex::new(r"mDreamingLockscreen=(true|false)").unwrap(),
        Regex::new(r"isStatusBarKeyguard=(true|false)").unwrap(),
        Regex::new(r"mShowingLockscreen=(true|false)").unwrap(),
    ];
}

/// Parses `adb devices -l` output into structured device records.
pub fn parse_device_list(raw: &str) -> Vec<DeviceInfo> {
    raw.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Option<DeviceInfo> {
    let mut parts = line.split_whitespace();
    let serial = parts.next()?.to_string();
    let state = DeviceState::parse(parts.next()?);
    let model = parts
        .clone()
        .find_map(|part| part.strip_prefix("model:").map(str::to_string));
    let connection_type = if serial.contains(':') {
        ConnectionType::Tcp
    } else if serial.starts_with("emulator-") {
        ConnectionType::Emulator
    } else {
        ConnectionType::Usb
    };
    Some(DeviceInfo {
        serial,
        state,
        connection_type,
        model,
    })
}

/// Parses a `getprop ro.build.version.sdk` response.
pub fn parse_api_level(raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| AdbError::ParseError(format!("unexpected api level output: {raw:?}")))
}

/// Parses `pm list packages` output (`package:<name>` per line).
pub fn parse_package_list(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

/// Interprets `adb install`/`uninstall` output, which reports `Success` or
/// `Failure [REASON]` regardless of the exit code.
pub fn parse_install_result(raw: &str) -> std::result::Result<(), String> {
    if raw.lines().any(|line| line.trim() == "Success") {
        return Ok(());
    }
    match INSTALL_FAILURE.captures(raw) {
        Some(caps) => Err(caps[1].to_string()),
        None => Err(raw.trim().to_string()),
    }
}

/// Extracts the keyguard state from `dumpsys window` output. Returns `None`
/// when no known marker is present.
pub fn parse_screen_locked(raw: &str) -> Option<bool> {
    for marker in LOCK_MARKERS.iter() {
        if let Some(caps) = marker.captures(raw) {
            return Some(&caps[1] == "true");
        }
    }
    None
}
