// SPDX-License-Identifier: GPL-3.0-only

//! Library-wide tunables
//!
//! Everything here ships as a compile-time constant. Per-camera knobs
//! (the target frame rate) travel in [`crate::types::CameraConfig`] instead.

pub mod limits {
    /// Maximum number of concurrently registered cameras
    pub const MAX_CAMERAS: usize = 128;

    /// Delivery pool slots shared by all cameras (4x the camera cap)
    pub const FRAME_POOL_SIZE: usize = MAX_CAMERAS * 4;
}

pub mod reconnect {
    use std::time::Duration;

    /// Backoff grows by this much per consecutive failed attempt
    pub const BASE_DELAY: Duration = Duration::from_secs(2);

    /// Lower clamp for the reconnect backoff
    pub const MIN_DELAY: Duration = Duration::from_secs(1);

    /// Upper clamp for the reconnect backoff
    pub const MAX_DELAY: Duration = Duration::from_secs(30);

    /// Open-input retries back off linearly up to this cap
    pub const OPEN_RETRY_CAP: Duration = Duration::from_secs(5);

    /// Backoff and stop waits sleep in slices this long so a stop
    /// request is observed promptly
    pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Pause after a read was aborted by a wakeup aimed at another
    /// pipeline, so pending tokens do not turn the pump into a busy loop
    pub const INTERRUPT_RETRY_SLEEP: Duration = Duration::from_millis(10);
}

pub mod pacing {
    /// Sleep toward the presentation target only when we are earlier
    /// than this; anything closer is sent immediately
    pub const EARLY_SLEEP_THRESHOLD_SEC: f64 = 0.050;

    /// Lateness beyond this is treated as catch-up territory
    pub const LATENESS_CATCHUP_THRESHOLD_SEC: f64 = 0.200;

    /// A PTS step larger than this re-anchors the playback clock
    pub const PTS_JUMP_RESET_THRESHOLD_SEC: f64 = 1.0;

    /// Fallback inter-frame interval when neither target nor source
    /// rate is known (~30 FPS)
    pub const DEFAULT_FRAME_INTERVAL_SEC: f64 = 0.033;

    /// Pacing sleeps are chunked so the worker re-checks its stop flag
    pub const SLEEP_SLICE_MS: u64 = 50;
}

pub mod fps {
    use std::time::Duration;

    /// Window over which input and output rates are measured
    pub const MEASURE_WINDOW: Duration = Duration::from_secs(5);

    /// A measured source rate must move by more than this to be adopted
    pub const ADOPT_DELTA: f64 = 1.0;

    /// Guessed stream rates outside this range are replaced by
    /// DEFAULT_SOURCE until the first real measurement
    pub const MIN_PLAUSIBLE: f64 = 5.0;
    pub const MAX_PLAUSIBLE: f64 = 65.0;

    /// Stand-in source rate while the guess is implausible
    pub const DEFAULT_SOURCE: f64 = 30.0;
}

pub mod stall {
    use std::time::Duration;

    /// No packet/frame activity for this long forces a reconnect
    pub const TIMEOUT: Duration = Duration::from_secs(30);
}

pub mod registry {
    use std::time::Duration;

    /// Bounded wait for a worker to exit after a stop request
    pub const JOIN_TIMEOUT: Duration = Duration::from_secs(3);
}

pub mod media {
    /// Socket read/write timeout for network inputs, in microseconds (10 s)
    pub const SOCKET_TIMEOUT_US: &str = "10000000";

    /// Probe size for live inputs, in bytes; kept small for startup latency
    pub const PROBE_SIZE: &str = "500000";

    /// Analyze duration for live inputs, in microseconds
    pub const ANALYZE_DURATION_US: &str = "500000";
}

pub mod logger {
    /// Rotate a per-camera log file once it exceeds this many bytes (10 MB)
    pub const ROTATE_BYTES: u64 = 10 * 1024 * 1024;

    /// Emit a per-camera progress line every this many delivered frames
    pub const PROGRESS_LOG_EVERY: u64 = 300;
}
