//! Device queries and controls layered on the channel executor

use crate::error::{AdbError, Result};

use super::channel::{DeviceChannel, ExecOptions};
use super::parse;

/// Namespaces understood by `settings get`/`settings put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsNamespace {
    System,
    Secure,
    Global,
}

impl SettingsNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Secure => "secure",
            Self::Global => "global",
        }
    }
}

/// SDK level of the attached device.
pub async fn api_level(channel: &DeviceChannel) -> Result<u32> {
    let raw = channel
        .shell(&["getprop", "ro.build.version.sdk"], &ExecOptions::default())
        .await?;
    parse::parse_api_level(&raw)
}

/// Human-readable Android release (e.g. `14`).
pub async fn android_version(channel: &DeviceChannel) -> Result<String> {
    let raw = channel
        .shell(&["getprop", "ro.build.version.release"], &ExecOptions::default())
        .await?;
    Ok(raw.trim().to_string())
}

pub async fn get_setting(
    channel: &DeviceChannel,
    namespace: SettingsNamespace,
    key: &str,
) -> Result<String> {
    let raw = channel
        .shell(&["settings", "get", namespace.as_str(), key], &ExecOptions::default())
        .await?;
    Ok(raw.trim().to_string())
}

pub async fn put_setting(
    channel: &DeviceChannel,
    namespace: SettingsNamespace,
    key: &str,
    value: &str,
) -> Result<()> {
    channel
        .shell(
            &["settings", "put", namespace.as_str(), key, value],
            &ExecOptions::default(),
        )
        .await?;
    Ok(())
}

/// Sends a key event by numeric code.
pub async fn keyevent(channel: &DeviceChannel, code: u32) -> Result<()> {
    let code = code.to_string();
    channel
        .shell(&["input", "keyevent", &code], &ExecOptions::default())
        .await?;
    Ok(())
}

/// KEYCODE_WAKEUP
pub async fn wake_screen(channel: &DeviceChannel) -> Result<()> {
    keyevent(channel, 224).await
}

/// Whether the keyguard is currently showing, derived from `dumpsys window`.
pub async fn is_screen_locked(channel: &DeviceChannel) -> Result<bool> {
    let raw = channel
        .shell(&["dumpsys", "window"], &ExecOptions::default())
        .await?;
    parse::parse_screen_locked(&raw).ok_or_else(|| {
        AdbError::ParseError("no lock-state marker in dumpsys window output".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_namespaces_map_to_adb_tokens() {
        assert_eq!(SettingsNamespace::System.as_str(), "system");
        assert_eq!(SettingsNamespace::Secure.as_str(), "secure");
        assert_eq!(SettingsNamespace::Global.as_str(), "global");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::super::*;
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
        async fn api_level_round_trips_through_getprop() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo 34");
            let channel = DeviceChannel::with_path(&adb);
            assert_eq!(api_level(&channel).await.unwrap(), 34);
        }

        #[tokio::test]
        async fn screen_lock_state_is_parsed_from_dumpsys() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo 'mDreamingLockscreen=true'");
            let channel = DeviceChannel::with_path(&adb);
            assert!(is_screen_locked(&channel).await.unwrap());
        }

        #[tokio::test]
        async fn unparseable_lock_state_surfaces_as_parse_error() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo 'nothing relevant'");
            let channel = DeviceChannel::with_path(&adb);
            assert!(matches!(
                is_screen_locked(&channel).await,
                Err(AdbError::ParseError(_))
            ));
        }
    }
}
