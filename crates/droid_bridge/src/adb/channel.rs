//! Device-communication channel: command execution against the external
//! `adb` binary with timeouts, one-shot retry on transient connection
//! faults, and an exclusive execution mode.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{EXEC_TIMEOUT_ENV, TIMING_CONFIG};
use crate::error::{AdbError, Result};

use super::connection;

lazy_static! {
    /// Linker spam some devices emit on every shell invocation.
    static ref LINKER_NOISE: Regex = Regex::new(r"(?m)^WARNING: linker: .*$\n?").unwrap();
    /// Failures one reconnect-and-retry cycle is allowed to absorb.
    static ref TRANSIENT_FAILURES: Vec<Regex> = vec![
        Regex::new(r"protocol fault \(no status\)").unwrap(),
        Regex::new(r"error: device ('[^']+' )?not found").unwrap(),
        Regex::new(r"error: device still (connecting|authorizing)").unwrap(),
        Regex::new(r"error: closed").unwrap(),
    ];
}

/// Both output streams of a finished command, noise-stripped and trimmed.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Per-invocation execution options
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Falls back to the configured default when unset
    pub timeout: Option<Duration>,
    /// Serialize against every other command on this channel
    pub exclusive: bool,
    /// Elevate shell commands through `su -c` unless the session is already root
    pub privileged: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Handle to the communication channel for one attached device or emulator.
///
/// Clones share the exclusive-execution gate: while an exclusive command is
/// in flight, every other invocation on the same channel waits, reflecting
/// that the underlying connection supports a single exclusive operation at a
/// time.
#[derive(Debug, Clone)]
pub struct DeviceChannel {
    adb_path: String,
    serial: Option<String>,
    exec_gate: Arc<RwLock<()>>,
}

impl DeviceChannel {
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: None,
            exec_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Runs a device-scoped adb command and returns its trimmed stdout.
    pub async fn exec(&self, args: &[&str], options: &ExecOptions) -> Result<String> {
        Ok(self.exec_full(args, options).await?.stdout)
    }

    /// Runs a device-scoped adb command and returns both output streams.
    pub async fn exec_full(&self, args: &[&str], options: &ExecOptions) -> Result<CommandOutput> {
        let argv = self.device_argv(args);
        self.run_gated(&argv, options).await
    }

    /// Runs a host-scoped command (`devices`, `connect`, server control);
    /// the `-s <serial>` prefix is not applied.
    pub async fn exec_host(&self, args: &[&str], options: &ExecOptions) -> Result<String> {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(self.run_gated(&argv, options).await?.stdout)
    }

    /// Runs a device-scoped command and returns raw stdout bytes with no
    /// cleaning applied. Binary payloads are not retried.
    pub async fn exec_bytes(&self, args: &[&str], options: &ExecOptions) -> Result<Vec<u8>> {
        let argv = self.device_argv(args);
        let timeout = self.resolve_timeout(options);
        if options.exclusive {
            let _gate = self.exec_gate.write().await;
            self.run_once_bytes(&argv, timeout).await
        } else {
            let _gate = self.exec_gate.read().await;
            self.run_once_bytes(&argv, timeout).await
        }
    }

    /// Runs a shell command on the device. With `privileged` set the command
    /// is wrapped in `su -c` unless the session already runs as root.
    pub async fn shell(&self, args: &[&str], options: &ExecOptions) -> Result<String> {
        let mut shell_args: Vec<String> = vec!["shell".to_string()];
        if options.privileged && !self.is_root().await.unwrap_or(false) {
            shell_args.push("su".to_string());
            shell_args.push("-c".to_string());
            shell_args.push(args.join(" "));
        } else {
            shell_args.extend(args.iter().map(|a| a.to_string()));
        }
        let refs: Vec<&str> = shell_args.iter().map(|s| s.as_str()).collect();
        self.exec(&refs, options).await
    }

    /// Convenience for a whitespace-separated shell command line.
    pub async fn shell_line(&self, line: &str) -> Result<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        self.shell(&tokens, &ExecOptions::default()).await
    }

    /// Whether the adb session on the device runs with elevated privileges.
    pub async fn is_root(&self) -> Result<bool> {
        let uid = self.exec(&["shell", "id", "-u"], &ExecOptions::default()).await?;
        Ok(uid.trim() == "0")
    }

    /// Spawns a long-lived adb subprocess with piped output streams and a
    /// null stdin. The caller owns the returned handle; the process is
    /// killed if the handle is dropped.
    pub fn spawn(&self, args: &[String]) -> Result<Child> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn().map_err(|err| AdbError::SpawnFailed {
            binary: self.adb_path.clone(),
            message: err.to_string(),
        })
    }

    /// Unguarded host-scoped execution for callers that already hold the
    /// exec gate (the retry path's device rediscovery).
    pub(crate) async fn run_host_unguarded(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.run_once(&argv, timeout).await
    }

    fn device_argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            argv.push("-s".to_string());
            argv.push(serial.clone());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    fn resolve_timeout(&self, options: &ExecOptions) -> Duration {
        options
            .timeout
            .unwrap_or(Duration::from_millis(TIMING_CONFIG.exec.default_timeout_ms))
    }

    async fn run_gated(&self, argv: &[String], options: &ExecOptions) -> Result<CommandOutput> {
        let timeout = self.resolve_timeout(options);
        if options.exclusive {
            let _gate = self.exec_gate.write().await;
            self.run_retrying(argv, timeout).await
        } else {
            let _gate = self.exec_gate.read().await;
            self.run_retrying(argv, timeout).await
        }
    }

    async fn run_retrying(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput> {
        match self.run_once(argv, timeout).await {
            Ok(output) => Ok(output),
            Err(err) if is_transient(&err) => {
                warn!(error = %err, "transient adb failure; re-discovering devices before retrying");
                let wait = Duration::from_millis(TIMING_CONFIG.discovery.wait_timeout_ms);
                if let Err(discover_err) = connection::wait_for_device(self, wait).await {
                    warn!(error = %discover_err, "device re-discovery failed; retrying anyway");
                }
                self.run_once(argv, timeout).await
            }
            Err(err) => Err(err),
        }
    }

    async fn run_once(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput> {
        debug!(command = %render(&self.adb_path, argv), "executing");
        let output = self.wait_for_output(argv, timeout).await?;
        let stdout = clean_stream(&output.stdout);
        let stderr = clean_stream(&output.stderr);
        match output.status.code() {
            // Exit code 0 wins even when stderr is populated: some tool
            // builds write warnings there while producing a usable result.
            Some(0) => Ok(CommandOutput { stdout, stderr }),
            Some(code) => {
                let detail = if stderr.is_empty() { stdout } else { stderr };
                Err(AdbError::CommandFailed(format!(
                    "`{}` exited with code {code}: {detail}",
                    render(&self.adb_path, argv)
                )))
            }
            None => Err(self.timeout_error(argv, timeout)),
        }
    }

    async fn run_once_bytes(&self, argv: &[String], timeout: Duration) -> Result<Vec<u8>> {
        debug!(command = %render(&self.adb_path, argv), "executing (raw)");
        let output = self.wait_for_output(argv, timeout).await?;
        match output.status.code() {
            Some(0) => Ok(output.stdout),
            Some(code) => Err(AdbError::CommandFailed(format!(
                "`{}` exited with code {code}: {}",
                render(&self.adb_path, argv),
                clean_stream(&output.stderr)
            ))),
            None => Err(self.timeout_error(argv, timeout)),
        }
    }

    async fn wait_for_output(
        &self,
        argv: &[String],
        timeout: Duration,
    ) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(argv).stdin(Stdio::null()).kill_on_drop(true);
        tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| self.timeout_error(argv, timeout))?
            .map_err(AdbError::Io)
    }

    fn timeout_error(&self, argv: &[String], timeout: Duration) -> AdbError {
        AdbError::Timeout(format!(
            "`{}` produced no exit status within {} ms; raise {} to allow more time",
            render(&self.adb_path, argv),
            timeout.as_millis(),
            EXEC_TIMEOUT_ENV
        ))
    }
}

impl Default for DeviceChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn render(adb_path: &str, argv: &[String]) -> String {
    if argv.is_empty() {
        adb_path.to_string()
    } else {
        format!("{} {}", adb_path, argv.join(" "))
    }
}

fn clean_stream(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    LINKER_NOISE.replace_all(&text, "").trim().to_string()
}

fn is_transient(err: &AdbError) -> bool {
    let rendered = err.to_string();
    TRANSIENT_FAILURES.iter().any(|re| re.is_match(&rendered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linker_noise_is_stripped_from_streams() {
        let raw = b"WARNING: linker: libfoo.so: unused DT entry\npayload\n";
        assert_eq!(clean_stream(raw), "payload");
    }

    #[test]
    fn transient_patterns_match_known_failures() {
        for message in [
            "Command execution failed: error: device 'emulator-5554' not found",
            "Command execution failed: error: device not found",
            "Command execution failed: protocol fault (no status)",
            "Command execution failed: error: device still connecting",
        ] {
            assert!(
                TRANSIENT_FAILURES.iter().any(|re| re.is_match(message)),
                "expected transient: {message}"
            );
        }
        assert!(!TRANSIENT_FAILURES
            .iter()
            .any(|re| re.is_match("Command execution failed: INSTALL_FAILED_INVALID_APK")));
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

        const DEVICE_LISTING: &str = r#"case "$1" in
  devices)
    echo "List of devices attached"
    printf 'emulator-5554\tdevice product:sdk_gphone model:sdk_gphone_x86 device:generic_x86\n'
    exit 0
    ;;
esac"#;

        #[tokio::test]
        async fn stdout_is_trimmed_and_noise_stripped() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(
                &dir,
                "echo 'WARNING: linker: libx.so: unused DT entry'\necho payload",
            );
            let channel = DeviceChannel::with_path(&adb);
            let out = channel.exec(&["anything"], &ExecOptions::default()).await.unwrap();
            assert_eq!(out, "payload");
        }

        #[tokio::test]
        async fn zero_exit_with_stderr_is_success() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo good\necho 'some warning' >&2\nexit 0");
            let channel = DeviceChannel::with_path(&adb);
            let output = channel
                .exec_full(&["anything"], &ExecOptions::default())
                .await
                .unwrap();
            assert_eq!(output.stdout, "good");
            assert_eq!(output.stderr, "some warning");
        }

        #[tokio::test]
        async fn timeout_error_names_the_controlling_option() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "sleep 5");
            let channel = DeviceChannel::with_path(&adb);
            let options = ExecOptions::new().with_timeout(Duration::from_millis(100));
            let err = channel.exec(&["anything"], &options).await.unwrap_err();
            match err {
                AdbError::Timeout(message) => assert!(message.contains(EXEC_TIMEOUT_ENV)),
                other => panic!("expected timeout error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn transient_failure_retries_once_and_succeeds() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("marker");
            let body = format!(
                "{DEVICE_LISTING}\nif [ -f {marker} ]; then\n  echo ok\nelse\n  touch {marker}\n  echo \"error: device 'emulator-5554' not found\" >&2\n  exit 1\nfi",
                marker = marker.display()
            );
            let adb = fake_adb(&dir, &body);
            let channel = DeviceChannel::with_path(&adb);
            let out = channel.exec(&["anything"], &ExecOptions::default()).await.unwrap();
            assert_eq!(out, "ok");
        }

        #[tokio::test]
        async fn persistent_failure_retries_exactly_once_then_propagates() {
            let dir = tempfile::tempdir().unwrap();
            let counter = dir.path().join("runs");
            let body = format!(
                "{DEVICE_LISTING}\necho run >> {counter}\necho \"error: device 'emulator-5554' not found\" >&2\nexit 1",
                counter = counter.display()
            );
            let adb = fake_adb(&dir, &body);
            let channel = DeviceChannel::with_path(&adb);
            let err = channel
                .exec(&["anything"], &ExecOptions::default())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("not found"));
            let runs = std::fs::read_to_string(&counter).unwrap();
            assert_eq!(runs.lines().count(), 2);
        }

        #[tokio::test]
        async fn privileged_shell_wraps_in_su_for_non_root_sessions() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(
                &dir,
                "if [ \"$2\" = \"id\" ]; then echo 1000; exit 0; fi\necho \"$@\"",
            );
            let channel = DeviceChannel::with_path(&adb);
            let out = channel
                .shell(&["whoami"], &ExecOptions::new().privileged())
                .await
                .unwrap();
            assert_eq!(out, "shell su -c whoami");
        }

        #[tokio::test]
        async fn privileged_shell_runs_directly_when_already_root() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(
                &dir,
                "if [ \"$2\" = \"id\" ]; then echo 0; exit 0; fi\necho \"$@\"",
            );
            let channel = DeviceChannel::with_path(&adb);
            let out = channel
                .shell(&["whoami"], &ExecOptions::new().privileged())
                .await
                .unwrap();
            assert_eq!(out, "shell whoami");
        }

        #[tokio::test]
        async fn exclusive_and_shared_commands_both_complete() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo done");
            let channel = DeviceChannel::with_path(&adb);
            let exclusive_opts = ExecOptions::new().exclusive();
            let shared_opts = ExecOptions::default();
            let exclusive = channel.exec(&["first"], &exclusive_opts);
            let shared = channel.exec(&["second"], &shared_opts);
            let (a, b) = tokio::join!(exclusive, shared);
            assert_eq!(a.unwrap(), "done");
            assert_eq!(b.unwrap(), "done");
        }

        #[tokio::test]
        async fn serial_is_prefixed_for_device_commands() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(&dir, "echo \"$@\"");
            let channel = DeviceChannel::with_path(&adb).with_serial("emulator-5554");
            let out = channel.exec(&["shell", "true"], &ExecOptions::default()).await.unwrap();
            assert_eq!(out, "-s emulator-5554 shell true");
        }
    }
}
