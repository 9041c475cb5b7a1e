//! droidbridge CLI - command-line adb automation client
//!
//! Usage:
//!     droidbridge [OPTIONS] <COMMAND>
//!
//! Environment Variables:
//!     DROID_BRIDGE_ADB: Path to the adb executable (default: adb)
//!     DROID_BRIDGE_SERIAL: Target device serial for multi-device setups
//!     DROID_BRIDGE_EXEC_TIMEOUT_MS: Default command timeout

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use droid_bridge::adb::{self, DeviceChannel, DeviceInfo, ExecOptions, Logcat, LogcatConfig};
use droid_bridge::config::TIMING_CONFIG;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Automation client for Android devices over adb
#[derive(Parser, Debug)]
#[command(name = "droidbridge")]
#[command(about = "Automation client for Android devices over adb")]
#[command(after_help = r#"Examples:
    # List connected devices
    droidbridge devices

    # Stream logs from a specific device until Ctrl-C
    droidbridge -s emulator-5554 logcat --filter ActivityManager:i

    # Capture ten seconds of logs after clearing the device buffer
    droidbridge logcat --clear --duration-secs 10

    # Install an APK, replacing any existing install
    droidbridge install app.apk --reinstall

    # Run a privileged shell command
    droidbridge shell --privileged -- getprop ro.serialno
"#)]
struct Cli {
    /// Path to the adb executable
    #[arg(long, env = "DROID_BRIDGE_ADB", default_value = "adb")]
    adb_path: String,

    /// Target device serial (as shown by `adb devices`)
    #[arg(short = 's', long, env = "DROID_BRIDGE_SERIAL")]
    serial: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List connected devices
    Devices {
        /// Emit the device list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run an adb command and print its stdout
    Exec {
        /// Serialize against every other command on this channel
        #[arg(long)]
        exclusive: bool,
        /// Per-command timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Command tokens passed to adb
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run a shell command on the device
    Shell {
        #[arg(long)]
        exclusive: bool,
        /// Elevate through su unless the session is already root
        #[arg(long)]
        privileged: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Stream device logs to stdout
    Logcat {
        /// Output format (brief, process, tag, thread, raw, time, threadtime, long)
        #[arg(long, default_value = "threadtime")]
        format: String,
        /// Filter spec, e.g. `ActivityManager:i` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Clear device logs before capturing
        #[arg(long)]
        clear: bool,
        /// Stop after this many seconds (Ctrl-C otherwise)
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Clear the device-side log buffer
    ClearLogs,
    /// Install an APK
    Install {
        apk: PathBuf,
        /// Replace an existing install (-r)
        #[arg(long)]
        reinstall: bool,
    },
    /// Uninstall a package
    Uninstall {
        package: String,
        /// Keep app data and caches (-k)
        #[arg(long)]
        keep_data: bool,
    },
    /// Capture a screenshot to a local PNG
    Screenshot { output: PathBuf },
    /// Block until a device reports `device` state
    WaitForDevice {
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("No devices connected.");
        return;
    }
    println!("Connected devices:");
    println!("{}", "-".repeat(60));
    for device in devices {
        let icon = if device.state.is_ready() {
            "\u{2713}"
        } else {
            "\u{2717}"
        };
        let model = device
            .model
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default();
        println!(
            "  {} {:<28} [{:?}, {:?}]{}",
            icon, device.serial, device.connection_type, device.state, model
        );
    }
}

async fn stream_logcat(
    channel: DeviceChannel,
    format: String,
    filters: Vec<String>,
    clear: bool,
    duration_secs: Option<u64>,
) -> Result<()> {
    let config = LogcatConfig::new()
        .with_format(format)
        .with_filter_specs(filters)
        .with_clear_on_start(clear);
    let logcat = Logcat::new(channel, config);
    let mut events = logcat.subscribe();
    logcat.start().await?;

    let deadline =
        duration_secs.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    loop {
        tokio::select! {
            entry = events.recv() => match entry {
                Ok(entry) => {
                    println!("{} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.message);
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("... output lagged; {missed} lines dropped from the stream ...");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep_until_deadline(deadline) => break,
        }
        if !logcat.is_capturing() {
            break;
        }
    }
    logcat.stop().await;
    Ok(())
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn exec_options(exclusive: bool, privileged: bool, timeout_ms: Option<u64>) -> ExecOptions {
    let mut options = ExecOptions::new();
    if exclusive {
        options = options.exclusive();
    }
    if privileged {
        options = options.privileged();
    }
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    options
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    if cli.adb_path == "adb" && which::which("adb").is_err() {
        bail!(
            "adb is not installed or not in PATH.\n\
             Install android platform-tools or pass --adb-path:\n\
               - macOS: brew install android-platform-tools\n\
               - Linux: sudo apt install android-tools-adb"
        );
    }

    let mut channel = DeviceChannel::with_path(&cli.adb_path);
    if let Some(serial) = &cli.serial {
        channel = channel.with_serial(serial);
    }

    match cli.command {
        CliCommand::Devices { json } => {
            let devices = adb::list_devices(&channel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_devices(&devices);
            }
        }
        CliCommand::Exec {
            exclusive,
            timeout_ms,
            args,
        } => {
            let options = exec_options(exclusive, false, timeout_ms);
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = channel.exec(&refs, &options).await?;
            if !out.is_empty() {
                println!("{out}");
            }
        }
        CliCommand::Shell {
            exclusive,
            privileged,
            timeout_ms,
            args,
        } => {
            let options = exec_options(exclusive, privileged, timeout_ms);
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = channel.shell(&refs, &options).await?;
            if !out.is_empty() {
                println!("{out}");
            }
        }
        CliCommand::Logcat {
            format,
            filters,
            clear,
            duration_secs,
        } => {
            stream_logcat(channel, format, filters, clear, duration_secs).await?;
        }
        CliCommand::ClearLogs => {
            channel
                .exec(&["logcat", "-c"], &ExecOptions::default())
                .await?;
            println!("Device logs cleared.");
        }
        CliCommand::Install { apk, reinstall } => {
            adb::install(&channel, &apk, reinstall)
                .await
                .with_context(|| format!("installing {}", apk.display()))?;
            println!("Installed {}.", apk.display());
        }
        CliCommand::Uninstall { package, keep_data } => {
            adb::uninstall(&channel, &package, keep_data)
                .await
                .with_context(|| format!("uninstalling {package}"))?;
            println!("Uninstalled {package}.");
        }
        CliCommand::Screenshot { output } => {
            adb::save_screenshot(&channel, &output).await?;
            println!("Saved screenshot to {}.", output.display());
        }
        CliCommand::WaitForDevice { timeout_ms } => {
            let timeout = Duration::from_millis(
                timeout_ms.unwrap_or(TIMING_CONFIG.discovery.wait_timeout_ms),
            );
            adb::wait_for_device(&channel, timeout).await?;
            println!("Device ready.");
        }
    }

    Ok(())
}
