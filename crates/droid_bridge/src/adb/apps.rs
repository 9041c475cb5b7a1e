//! App installation and lifecycle management

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::TIMING_CONFIG;
use crate::error::{AdbError, Result};

use super::channel::{DeviceChannel, ExecOptions};
use super::parse;

/// Installs an APK. Runs in exclusive mode with an install-sized timeout:
/// the package manager tolerates no concurrent sessions on the same
/// connection.
pub async fn install(channel: &DeviceChannel, apk: &Path, reinstall: bool) -> Result<()> {
    let apk = apk.to_string_lossy();
    let mut args = vec!["install"];
    if reinstall {
        args.push("-r");
    }
    args.push(&apk);
    let options = ExecOptions::new()
        .exclusive()
        .with_timeout(Duration::from_millis(TIMING_CONFIG.apps.install_timeout_ms));
    let output = channel.exec_full(&args, &options).await?;
    // `adb install` reports failures on stdout with a zero exit on some builds
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    debug!(apk = %apk, "install finished");
    parse::parse_install_result(&combined).map_err(AdbError::CommandFailed)
}

/// Uninstalls a package, optionally keeping its data (`-k`).
pub async fn uninstall(channel: &DeviceChannel, package: &str, keep_data: bool) -> Result<()> {
    let mut args = vec!["uninstall"];
    if keep_data {
        args.push("-k");
    }
    args.push(package);
    let output = channel.exec_full(&args, &ExecOptions::default()).await?;
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    parse::parse_install_result(&combined).map_err(AdbError::CommandFailed)
}

/// All installed package names.
pub async fn list_packages(channel: &DeviceChannel) -> Result<Vec<String>> {
    let raw = channel
        .shell(&["pm", "list", "packages"], &ExecOptions::default())
        .await?;
    Ok(parse::parse_package_list(&raw))
}

pub async fn is_installed(channel: &DeviceChannel, package: &str) -> Result<bool> {
    let packages = list_packages(channel).await?;
    Ok(packages.iter().any(|p| p == package))
}

/// Launches a package through the monkey launcher intent.
pub async fn start_app(channel: &DeviceChannel, package: &str) -> Result<()> {
    channel
        .shell(
            &[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ],
            &ExecOptions::default(),
        )
        .await?;
    Ok(())
}

pub async fn stop_app(channel: &DeviceChannel, package: &str) -> Result<()> {
    channel
        .shell(&["am", "force-stop", package], &ExecOptions::default())
        .await?;
    Ok(())
}
