// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera logging and liveness accounting
//!
//! Every pipeline logs through a [`CameraLogger`]. Each camera gets its own
//! lazily-created sink behind its own mutex; a sink owns an optional log
//! file (size-rotated) plus the activity counters the stall checks read.
//! Every line is also echoed through `tracing`, so the host's subscriber
//! sees everything even when file logging is disabled, and a sink failure
//! can never take a pipeline down with it.

use chrono::Local;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::constants::logger;
use crate::types::CameraId;

/// Severity of one log line; filtered before formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// All levels, least to most verbose
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    fn tag(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_rank(rank: u8) -> Self {
        match rank {
            0 => LogLevel::Error,
            1 => LogLevel::Warning,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

/// What a pipeline just did, for the liveness counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PacketRead,
    FrameDecoded,
    FrameDelivered,
}

/// Counters snapshot for one camera
#[derive(Debug, Clone, Copy)]
pub struct ActivitySnapshot {
    pub activity_count: u64,
    pub packet_count: u64,
    pub decode_count: u64,
    pub frame_count: u64,
    pub avg_processing_ms: f64,
    pub last_activity_age: Duration,
    pub last_frame_age: Duration,
    pub last_heartbeat_age: Duration,
}

struct Counters {
    activity_count: u64,
    packet_count: u64,
    decode_count: u64,
    frame_count: u64,
    total_processing_ms: f64,
    last_activity: Instant,
    last_frame: Instant,
    last_heartbeat: Instant,
}

struct Sink {
    file: Option<File>,
    path: Option<PathBuf>,
    written: u64,
    counters: Counters,
}

impl Sink {
    fn new(path: Option<PathBuf>) -> Self {
        let now = Instant::now();
        Self {
            file: None,
            path,
            written: 0,
            counters: Counters {
                activity_count: 0,
                packet_count: 0,
                decode_count: 0,
                frame_count: 0,
                total_processing_ms: 0.0,
                last_activity: now,
                last_frame: now,
                last_heartbeat: now,
            },
        }
    }

    fn write_line(&mut self, line: &str) {
        let Some(path) = self.path.clone() else {
            return;
        };
        if self.file.is_none() {
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
                    self.file = Some(file);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open camera log file");
                    return;
                }
            }
        }
        if let Some(file) = self.file.as_mut() {
            if writeln!(file, "{}", line).is_ok() {
                self.written += line.len() as u64 + 1;
            }
        }
        if self.written >= logger::ROTATE_BYTES {
            self.rotate(&path);
        }
    }

    fn rotate(&mut self, path: &PathBuf) {
        self.file = None;
        self.written = 0;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let rotated = path.with_extension(format!("{}.log", stamp));
        if let Err(e) = std::fs::rename(path, &rotated) {
            warn!(path = %path.display(), error = %e, "log rotation failed");
        }
    }
}

struct LoggerShared {
    dir: Option<PathBuf>,
    level: AtomicU8,
    sinks: Mutex<HashMap<CameraId, Arc<Mutex<Sink>>>>,
}

/// Thread-safe logger shared by the registry and all pipelines
#[derive(Clone)]
pub struct CameraLogger {
    shared: Arc<LoggerShared>,
}

impl CameraLogger {
    /// Console-echo-only logger (no per-camera files)
    pub fn new() -> Self {
        Self::with_config(None, LogLevel::Info)
    }

    /// Logger writing one rotated file per camera under `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_config(Some(dir.into()), LogLevel::Info)
    }

    pub fn with_config(dir: Option<PathBuf>, level: LogLevel) -> Self {
        if let Some(dir) = &dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "cannot create log directory");
            }
        }
        Self {
            shared: Arc::new(LoggerShared {
                dir,
                level: AtomicU8::new(level as u8),
                sinks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.shared.level.store(level as u8, Ordering::SeqCst);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_rank(self.shared.level.load(Ordering::SeqCst))
    }

    fn sink(&self, id: CameraId) -> Arc<Mutex<Sink>> {
        let mut sinks = self.shared.sinks.lock().unwrap();
        Arc::clone(sinks.entry(id).or_insert_with(|| {
            let path = self
                .shared
                .dir
                .as_ref()
                .map(|dir| dir.join(format!("camera-{}.log", id)));
            Arc::new(Mutex::new(Sink::new(path)))
        }))
    }

    /// Write one line to the camera's sink and echo it to the console
    /// stream. Filtering happens here, before any formatting.
    pub fn log(&self, id: CameraId, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!(camera = %id, "{}", message),
            LogLevel::Warning => warn!(camera = %id, "{}", message),
            LogLevel::Info => info!(camera = %id, "{}", message),
            LogLevel::Debug => debug!(camera = %id, "{}", message),
            LogLevel::Trace => trace!(camera = %id, "{}", message),
        }
        if level > self.level() {
            return;
        }
        let line = format!(
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            level.tag(),
            message
        );
        let sink = self.sink(id);
        sink.lock().unwrap().write_line(&line);
    }

    /// Record one unit of pipeline work.
    pub fn log_activity(&self, id: CameraId, kind: ActivityKind, processing_ms: f64) {
        let sink = self.sink(id);
        let mut sink = sink.lock().unwrap();
        let now = Instant::now();
        let counters = &mut sink.counters;
        counters.activity_count += 1;
        counters.total_processing_ms += processing_ms;
        counters.last_activity = now;
        match kind {
            ActivityKind::PacketRead => counters.packet_count += 1,
            ActivityKind::FrameDecoded => counters.decode_count += 1,
            ActivityKind::FrameDelivered => {
                counters.frame_count += 1;
                counters.last_frame = now;
            }
        }
    }

    /// Record that `component` is alive.
    pub fn log_heartbeat(&self, id: CameraId, component: &str) {
        let sink = self.sink(id);
        sink.lock().unwrap().counters.last_heartbeat = Instant::now();
        trace!(camera = %id, component, "heartbeat");
    }

    /// True when the camera has shown no activity, or delivered no frame,
    /// within `timeout`.
    pub fn check_processing_stall(&self, id: CameraId, timeout: Duration) -> bool {
        let sink = self.sink(id);
        let sink = sink.lock().unwrap();
        let now = Instant::now();
        now.duration_since(sink.counters.last_activity) > timeout
            || now.duration_since(sink.counters.last_frame) > timeout
    }

    /// Counters for one camera, if it ever logged.
    pub fn snapshot(&self, id: CameraId) -> Option<ActivitySnapshot> {
        let sinks = self.shared.sinks.lock().unwrap();
        let sink = sinks.get(&id)?;
        let sink = sink.lock().unwrap();
        let now = Instant::now();
        let counters = &sink.counters;
        Some(ActivitySnapshot {
            activity_count: counters.activity_count,
            packet_count: counters.packet_count,
            decode_count: counters.decode_count,
            frame_count: counters.frame_count,
            avg_processing_ms: if counters.activity_count > 0 {
                counters.total_processing_ms / counters.activity_count as f64
            } else {
                0.0
            },
            last_activity_age: now.duration_since(counters.last_activity),
            last_frame_age: now.duration_since(counters.last_frame),
            last_heartbeat_age: now.duration_since(counters.last_heartbeat),
        })
    }

    /// Drop the sink of a removed camera, closing its file.
    pub fn remove(&self, id: CameraId) {
        self.shared.sinks.lock().unwrap().remove(&id);
    }
}

impl Default for CameraLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the process-wide console subscriber.
///
/// Respects `RUST_LOG`; defaults to `warn`. Safe to call more than once;
/// later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(raw: i32) -> CameraId {
        CameraId::new(raw).unwrap()
    }

    #[test]
    fn activity_counters_accumulate_per_kind() {
        let log = CameraLogger::new();
        let id = camera(9);
        log.log_activity(id, ActivityKind::PacketRead, 0.0);
        log.log_activity(id, ActivityKind::FrameDecoded, 4.0);
        log.log_activity(id, ActivityKind::FrameDelivered, 8.0);

        let snap = log.snapshot(id).expect("sink exists");
        assert_eq!(snap.activity_count, 3);
        assert_eq!(snap.packet_count, 1);
        assert_eq!(snap.decode_count, 1);
        assert_eq!(snap.frame_count, 1);
        assert!((snap.avg_processing_ms - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stall_check_uses_both_clocks() {
        let log = CameraLogger::new();
        let id = camera(1);
        log.log_activity(id, ActivityKind::PacketRead, 0.0);

        assert!(!log.check_processing_stall(id, Duration::from_secs(30)));
        // Packets flow but no frame was ever delivered within the window.
        assert!(log.check_processing_stall(id, Duration::ZERO));
    }

    #[test]
    fn snapshot_of_unknown_camera_is_none() {
        let log = CameraLogger::new();
        assert!(log.snapshot(camera(42)).is_none());
    }

    #[test]
    fn file_sink_writes_filtered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = CameraLogger::with_dir(dir.path());
        let id = camera(3);

        log.log(id, LogLevel::Info, "connected");
        log.log(id, LogLevel::Trace, "filtered out");

        let path = dir.path().join("camera-3.log");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("connected"));
        assert!(!contents.contains("filtered out"));
        assert!(contents.contains("[INFO ]"));
    }

    #[test]
    fn levels_parse_and_order() {
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!(" TRACE ".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert!("verbose".parse::<LogLevel>().is_err());
        for pair in LogLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn level_filter_is_dynamic() {
        let dir = tempfile::tempdir().unwrap();
        let log = CameraLogger::with_config(Some(dir.path().into()), LogLevel::Warning);
        let id = camera(0);

        log.log(id, LogLevel::Info, "suppressed");
        log.set_level(LogLevel::Trace);
        log.log(id, LogLevel::Info, "visible");

        let contents = std::fs::read_to_string(dir.path().join("camera-0.log")).unwrap();
        assert!(!contents.contains("suppressed"));
        assert!(contents.contains("visible"));
    }
}
