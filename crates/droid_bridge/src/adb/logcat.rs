//! Log capture engine: a long-lived `adb logcat` subprocess feeding a
//! capacity-bounded ring buffer, with incremental draining and a real-time
//! event stream.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lazy_static::lazy_static;
use phf::{phf_map, phf_set};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TIMING_CONFIG;
use crate::error::{AdbError, Result};

use super::channel::{DeviceChannel, ExecOptions};
use super::log_buffer::{LogBuffer, LogEntry};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

lazy_static! {
    /// First-stderr-line signature of a subprocess that never really started.
    static ref EXEC_FAILURE: Regex = Regex::new(
        r"(?i)(cannot execute|failed to exec|exec format error|not found|no such file or directory|permission denied)"
    )
    .unwrap();
    /// Separators logcat prints between device-side ring buffers.
    static ref NOISY_TRACE: Regex = Regex::new(r"^-{9} beginning of ").unwrap();
}

/// Output formats `logcat -v` understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogcatFormat {
    Brief,
    Process,
    Tag,
    Thread,
    Raw,
    Time,
    Threadtime,
    Long,
}

pub const DEFAULT_FORMAT: LogcatFormat = LogcatFormat::Threadtime;

static FORMATS: phf::Map<&'static str, LogcatFormat> = phf_map! {
    "brief" => LogcatFormat::Brief,
    "process" => LogcatFormat::Process,
    "tag" => LogcatFormat::Tag,
    "thread" => LogcatFormat::Thread,
    "raw" => LogcatFormat::Raw,
    "time" => LogcatFormat::Time,
    "threadtime" => LogcatFormat::Threadtime,
    "long" => LogcatFormat::Long,
};

/// Priority letters a `tag:priority` filter spec may carry
static PRIORITIES: phf::Set<char> = phf_set! {'v', 'd', 'i', 'w', 'e', 'f', 's'};

impl LogcatFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Process => "process",
            Self::Tag => "tag",
            Self::Thread => "thread",
            Self::Raw => "raw",
            Self::Time => "time",
            Self::Threadtime => "threadtime",
            Self::Long => "long",
        }
    }

    /// Resolves a user-supplied format name, falling back to `threadtime`
    /// for anything unrecognized.
    pub fn parse_or_default(name: &str) -> Self {
        match FORMATS.get(name.to_ascii_lowercase().as_str()) {
            Some(format) => *format,
            None => {
                warn!(
                    requested = %name,
                    fallback = DEFAULT_FORMAT.as_str(),
                    "unknown logcat format"
                );
                DEFAULT_FORMAT
            }
        }
    }
}

/// Normalizes `tag[:priority]` filter specs: leading-`-` entries are
/// dropped, empty tags become `*`, unknown priorities fall back to `v`, and
/// bare tags pass through untouched.
pub fn sanitize_filter_specs(specs: &[String]) -> Vec<String> {
    let mut sanitized = Vec::with_capacity(specs.len());
    for spec in specs {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        if spec.starts_with('-') {
            warn!(spec = %spec, "dropping exclusion-style filter spec");
            continue;
        }
        match spec.split_once(':') {
            Some((tag, priority)) => {
                let tag = if tag.is_empty() { "*" } else { tag };
                let valid = priority.len() == 1
                    && priority
                        .chars()
                        .all(|c| PRIORITIES.contains(&c.to_ascii_lowercase()));
                if valid {
                    sanitized.push(format!("{tag}:{priority}"));
                } else {
                    warn!(spec = %spec, "invalid filter priority; defaulting to `v`");
                    sanitized.push(format!("{tag}:v"));
                }
            }
            None => sanitized.push(spec.to_string()),
        }
    }
    sanitized
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct LogcatConfig {
    pub format: String,
    pub filter_specs: Vec<String>,
    pub max_buffer_size: usize,
    pub clear_on_start: bool,
    pub debug: bool,
    pub debug_trace: bool,
}

impl Default for LogcatConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.as_str().to_string(),
            filter_specs: Vec::new(),
            max_buffer_size: TIMING_CONFIG.logcat.default_buffer_capacity,
            clear_on_start: false,
            debug: false,
            debug_trace: false,
        }
    }
}

impl LogcatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_filter_specs(mut self, specs: Vec<String>) -> Self {
        self.filter_specs = specs;
        self
    }

    pub fn with_max_buffer_size(mut self, capacity: usize) -> Self {
        self.max_buffer_size = capacity;
        self
    }

    pub fn with_clear_on_start(mut self, clear: bool) -> Self {
        self.clear_on_start = clear;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_trace(mut self, debug_trace: bool) -> Self {
        self.debug_trace = debug_trace;
        self
    }
}

enum StartSignal {
    Output,
    ExecFailure(String),
}

#[derive(Debug)]
struct CaptureState {
    child: Option<Child>,
    buffer: LogBuffer,
    cursor: Option<u64>,
    session: Option<Uuid>,
    started_once: bool,
}

/// Log capture engine for one device channel.
///
/// Owns the capture subprocess and the ring buffer exclusively; callers read
/// through [`Logcat::new_logs`] / [`Logcat::all_logs`] or subscribe to the
/// real-time stream.
pub struct Logcat {
    channel: DeviceChannel,
    config: LogcatConfig,
    state: Arc<Mutex<CaptureState>>,
    events: broadcast::Sender<LogEntry>,
}

impl Logcat {
    pub fn new(channel: DeviceChannel, config: LogcatConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let buffer = LogBuffer::new(config.max_buffer_size);
        Self {
            channel,
            config,
            state: Arc::new(Mutex::new(CaptureState {
                child: None,
                buffer,
                cursor: None,
                session: None,
                started_once: false,
            })),
            events,
        }
    }

    /// Real-time stream of captured entries.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().child.is_some()
    }

    /// Starts the capture subprocess.
    ///
    /// Resolves as soon as the first output line of either stream arrives,
    /// the subprocess exits before producing any output, or the startup
    /// timeout elapses. Rejects when a capture is already running, when
    /// spawning fails outright, or when the first stderr line carries a
    /// failed-to-exec signature.
    pub async fn start(&self) -> Result<()> {
        if self.is_capturing() {
            return Err(AdbError::CaptureInProgress);
        }
        if self.config.clear_on_start {
            self.clear().await;
        }

        let format = LogcatFormat::parse_or_default(&self.config.format);
        let mut args: Vec<String> = vec![
            "logcat".to_string(),
            "-v".to_string(),
            format.as_str().to_string(),
        ];
        args.extend(sanitize_filter_specs(&self.config.filter_specs));

        let mut child = self.channel.spawn(&args)?;
        let stdout = child.stdout.take().ok_or_else(|| AdbError::SpawnFailed {
            binary: self.channel.adb_path().to_string(),
            message: "no stdout pipe on spawned logcat".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| AdbError::SpawnFailed {
            binary: self.channel.adb_path().to_string(),
            message: "no stderr pipe on spawned logcat".to_string(),
        })?;

        let session = Uuid::new_v4();
        debug!(session = %session, args = ?args, "logcat capture starting");
        {
            let mut state = self.lock();
            state.child = Some(child);
            state.session = Some(session);
            state.started_once = true;
        }

        let (signal_tx, mut signal_rx) = mpsc::channel(4);
        self.spawn_reader(stdout, false, signal_tx.clone());
        self.spawn_reader(stderr, true, signal_tx);
        self.spawn_exit_watcher(session);

        let deadline =
            Instant::now() + Duration::from_millis(TIMING_CONFIG.logcat.start_timeout_ms);
        tokio::select! {
            signal = signal_rx.recv() => match signal {
                Some(StartSignal::Output) => Ok(()),
                Some(StartSignal::ExecFailure(line)) => {
                    self.stop().await;
                    Err(AdbError::SpawnFailed {
                        binary: self.channel.adb_path().to_string(),
                        message: line,
                    })
                }
                // Both readers hit EOF before any output: the subprocess
                // exited silently, which still counts as started.
                None => Ok(()),
            },
            _ = sleep_until(deadline) => Ok(()),
        }
    }

    /// Stops an active capture. A no-op when nothing is running; teardown
    /// failures are logged, never raised.
    pub async fn stop(&self) {
        let child = {
            let mut state = self.lock();
            // Detach the exit watcher before killing, so the deliberate
            // termination is not reported as a crash.
            state.session = None;
            state.child.take()
        };
        let Some(mut child) = child else { return };
        if let Err(err) = child.start_kill() {
            warn!(error = %err, "failed to signal logcat process");
        }
        if let Err(err) = child.wait().await {
            warn!(error = %err, "failed to reap logcat process");
        }
    }

    /// Entries buffered since the previous call (everything retained, on the
    /// first call). Entries evicted before ever being returned are lost.
    pub fn new_logs(&self) -> Result<Vec<LogEntry>> {
        let mut state = self.lock();
        if !state.started_once {
            return Err(AdbError::NoCaptureSession);
        }
        let (entries, latest) = state.buffer.newer_than(state.cursor);
        if latest.is_some() {
            state.cursor = latest;
        }
        Ok(entries)
    }

    /// Every retained entry, oldest first. Leaves the incremental cursor
    /// untouched.
    pub fn all_logs(&self) -> Result<Vec<LogEntry>> {
        let state = self.lock();
        if !state.started_once {
            return Err(AdbError::NoCaptureSession);
        }
        Ok(state.buffer.snapshot())
    }

    /// Clears the device-side log. Local retention is unaffected; failures
    /// are advisory.
    pub async fn clear(&self) {
        if let Err(err) = self
            .channel
            .exec(&["logcat", "-c"], &ExecOptions::default())
            .await
        {
            warn!(error = %err, "failed to clear device logs");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_reader<R>(&self, stream: R, is_stderr: bool, signal_tx: mpsc::Sender<StartSignal>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let debug_echo = self.config.debug;
        let debug_trace = self.config.debug_trace;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            let mut signal_tx = Some(signal_tx);
            let mut first_line = true;
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "logcat stream read failed");
                        break;
                    }
                };
                if is_stderr && first_line && EXEC_FAILURE.is_match(&line) {
                    if let Some(tx) = signal_tx.take() {
                        let _ = tx.try_send(StartSignal::ExecFailure(line.clone()));
                    }
                }
                first_line = false;
                if debug_echo && (debug_trace || !NOISY_TRACE.is_match(&line)) {
                    debug!(stderr = is_stderr, "{line}");
                }
                let message = if is_stderr {
                    format!("STDERR: {line}")
                } else {
                    line
                };
                let entry = LogEntry::new(message);
                {
                    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    state.buffer.insert(entry.clone());
                }
                let _ = events.send(entry);
                if let Some(tx) = signal_tx.take() {
                    let _ = tx.try_send(StartSignal::Output);
                }
            }
        });
    }

    fn spawn_exit_watcher(&self, session: Uuid) {
        let state = Arc::clone(&self.state);
        let poll = Duration::from_millis(TIMING_CONFIG.logcat.exit_poll_ms);
        tokio::spawn(async move {
            loop {
                sleep(poll).await;
                let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if guard.session != Some(session) {
                    // stop() detached this watcher, or a newer session took over
                    return;
                }
                let Some(child) = guard.child.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        warn!(
                            session = %session,
                            exit_code = ?status.code(),
                            "logcat process terminated unexpectedly"
                        );
                        guard.child = None;
                        guard.session = None;
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(session = %session, error = %err, "failed to poll logcat process");
                        guard.child = None;
                        guard.session = None;
                        return;
                    }
                }
            }
        });
    }
}
