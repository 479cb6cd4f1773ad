// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera worker
//!
//! One [`CameraPipeline`] runs on one thread and owns everything about its
//! stream: the connection, the decoder, the flow-control state and the
//! pacing clock. The registry only ever touches the shared stop flag and
//! the stats snapshot.
//!
//! # State machine
//!
//! ```text
//! Connecting ──► Connected ──► Disconnected ──► WaitingReconnect
//!     ▲                                               │
//!     │                                               ▼
//!     └────────────────────────────────────────  Reconnecting
//!
//! any state ──► Stopped on stop request
//! ```
//!
//! Retryable open failures (I/O, unreachable network, interrupt-aborted
//! opens) loop inside `Connecting` with a linear backoff; everything else
//! goes through the `Disconnected → WaitingReconnect → Reconnecting` path
//! with a clamped linear backoff. The worker never gives up on its own;
//! only a stop request ends it.

pub mod flow;
pub mod pacing;
pub mod reconnect;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::constants::{logger as logcfg, pacing as pacecfg, reconnect as recfg, stall};
use crate::delivery::FramePool;
use crate::errors::MediaErrorKind;
use crate::interrupt::InterruptWatch;
use crate::logging::{ActivityKind, CameraLogger, LogLevel};
use crate::media::{ConnectOptions, DecodeStatus, MediaBackend, MediaSource, ReadStatus};
use crate::types::{CameraConfig, CameraState, FrameCallback, PipelineStats, StatusCallback};

use self::flow::{FpsWindow, SkipGate, sanitize_guessed_fps, should_adopt};
use self::pacing::{PaceDecision, PtsPacer, interval_sleep};
use self::reconnect::{open_retry_delay, reconnect_delay};

/// State the registry shares with a running worker
pub struct PipelineShared {
    stop: Arc<AtomicBool>,
    stats: Mutex<PipelineStats>,
}

impl PipelineShared {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock().unwrap()
    }
}

impl Default for PipelineShared {
    fn default() -> Self {
        Self::new()
    }
}

enum PumpExit {
    Stop,
    Reconnect(String),
}

/// Flush the decoder after end of stream so buffered frames are not
/// carried into the next connection. The tail is discarded; a live
/// pipeline has nowhere coherent to pace it to.
fn drain_decoder(source: &mut dyn MediaSource) -> u32 {
    if source.send_eof().is_err() {
        return 0;
    }
    let mut drained = 0;
    while drained < 64 {
        match source.receive_frame() {
            Ok(DecodeStatus::Ok) => drained += 1,
            _ => break,
        }
    }
    drained
}

enum ConnectOutcome {
    Connected(Box<dyn MediaSource>),
    Failed(String),
    Stopped,
}

/// One camera's worker: connection lifecycle, decode pump, pacing and
/// delivery
pub struct CameraPipeline {
    config: CameraConfig,
    backend: Arc<dyn MediaBackend>,
    options: ConnectOptions,
    pool: FramePool,
    logger: CameraLogger,
    status_cb: StatusCallback,
    frame_cb: FrameCallback,
    shared: Arc<PipelineShared>,
    watch: InterruptWatch,
}

impl CameraPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CameraConfig,
        backend: Arc<dyn MediaBackend>,
        pool: FramePool,
        logger: CameraLogger,
        status_cb: StatusCallback,
        frame_cb: FrameCallback,
        shared: Arc<PipelineShared>,
        watch: InterruptWatch,
    ) -> Self {
        Self {
            config,
            backend,
            options: ConnectOptions::default(),
            pool,
            logger,
            status_cb,
            frame_cb,
            shared,
            watch,
        }
    }

    /// Worker entry point; returns only when the camera is stopped.
    pub fn run(self) {
        let id = self.config.id;
        self.post_status(
            CameraState::Connecting,
            &format!("connecting to {}", self.config.url),
        );

        let mut attempts: u32 = 0;
        loop {
            if self.stop_requested() {
                break;
            }

            let source = match self.connect() {
                ConnectOutcome::Connected(source) => source,
                ConnectOutcome::Stopped => break,
                ConnectOutcome::Failed(reason) => {
                    self.post_status(CameraState::Disconnected, &reason);
                    attempts += 1;
                    if !self.wait_reconnect(attempts) {
                        break;
                    }
                    continue;
                }
            };

            attempts = 0;
            let info = source.stream_info();
            self.post_status(
                CameraState::Connected,
                &format!("connected ({}x{})", info.width, info.height),
            );

            match self.pump(source) {
                PumpExit::Stop => break,
                PumpExit::Reconnect(reason) => {
                    {
                        let mut stats = self.shared.stats.lock().unwrap();
                        stats.reconnects += 1;
                    }
                    self.post_status(CameraState::Disconnected, &reason);
                    attempts += 1;
                    if !self.wait_reconnect(attempts) {
                        break;
                    }
                }
            }
        }

        self.post_status(CameraState::Stopped, "stopped");
        debug!(camera = %id, "worker exiting");
    }

    /// Open the input. Retryable failures loop here, inside `Connecting`,
    /// with linearly growing delays; the loop is unbounded and exits only
    /// on success, a non-retryable error or a stop request.
    fn connect(&self) -> ConnectOutcome {
        let mut attempt: u32 = 0;
        loop {
            if self.stop_requested() {
                return ConnectOutcome::Stopped;
            }
            match self
                .backend
                .connect(&self.config.url, &self.options, self.watch.clone())
            {
                Ok(source) => return ConnectOutcome::Connected(source),
                Err(e) if e.is_open_retryable() => {
                    attempt += 1;
                    let delay = open_retry_delay(attempt);
                    self.logger.log(
                        self.config.id,
                        LogLevel::Warning,
                        &format!("open failed ({}), retrying in {:?}", e, delay),
                    );
                    if !self.sleep_for(delay) {
                        return ConnectOutcome::Stopped;
                    }
                }
                Err(e) => {
                    return ConnectOutcome::Failed(format!("connect failed: {}", e));
                }
            }
        }
    }

    /// The packet/frame pump. Runs until the stream dies, stalls or the
    /// camera is stopped.
    fn pump(&self, mut source: Box<dyn MediaSource>) -> PumpExit {
        let id = self.config.id;
        let info = source.stream_info();
        let time_base = info.time_base;
        let target_fps = self.config.effective_target_fps();

        let mut source_fps = sanitize_guessed_fps(info.guessed_fps);
        let mut measured_once = false;
        let mut gate = SkipGate::new(target_fps, source_fps);
        let mut pacer = PtsPacer::new(time_base);

        let now = Instant::now();
        let mut input_window = FpsWindow::new(now);
        let mut output_window = FpsWindow::new(now);
        let mut last_activity = now;
        let mut last_sent_pts: Option<i64> = None;
        let mut last_sent_at: Option<Instant> = None;
        let mut delivered_total: u64 = 0;

        debug!(
            camera = %id,
            target_fps,
            source_fps,
            skip_count = gate.skip_count(),
            time_base,
            "pump starting"
        );

        loop {
            if self.stop_requested() {
                return PumpExit::Stop;
            }
            if last_activity.elapsed() > stall::TIMEOUT {
                self.logger.log(
                    id,
                    LogLevel::Warning,
                    &format!("stall detected: no decoded frame for {:?}", stall::TIMEOUT),
                );
                return PumpExit::Reconnect("stall detected".into());
            }

            match source.read_packet() {
                Ok(ReadStatus::Video) => {
                    self.logger.log_activity(id, ActivityKind::PacketRead, 0.0);
                }
                Ok(ReadStatus::Other) => continue,
                Ok(ReadStatus::Again) => continue,
                Ok(ReadStatus::Eof) => {
                    let drained = drain_decoder(source.as_mut());
                    if drained > 0 {
                        debug!(camera = %id, drained, "dropped decoder tail at end of stream");
                    }
                    return PumpExit::Reconnect("end of stream".into());
                }
                Err(e) if e.kind() == MediaErrorKind::Interrupted => {
                    if self.stop_requested() {
                        return PumpExit::Stop;
                    }
                    // A wakeup meant for another pipeline; the token stays
                    // queued until the registry drains it.
                    thread::sleep(recfg::INTERRUPT_RETRY_SLEEP);
                    continue;
                }
                Err(e) => return PumpExit::Reconnect(format!("read failed: {}", e)),
            }

            let packet_at = Instant::now();
            match source.send_packet() {
                Ok(DecodeStatus::Ok) => {}
                Ok(DecodeStatus::Again) | Ok(DecodeStatus::Eof) => {
                    // The packet is gone either way; the decoder will ask
                    // again through the next read.
                    trace!(camera = %id, "decoder refused packet");
                    continue;
                }
                Err(e) => {
                    warn!(camera = %id, error = %e, "send_packet failed; dropping packet");
                    continue;
                }
            }

            loop {
                match source.receive_frame() {
                    Ok(DecodeStatus::Ok) => {}
                    Ok(DecodeStatus::Again) | Ok(DecodeStatus::Eof) => break,
                    Err(e) => {
                        warn!(camera = %id, error = %e, "decode error; resuming at next packet");
                        break;
                    }
                }

                let frame_at = Instant::now();
                last_activity = frame_at;
                self.logger.log_activity(id, ActivityKind::FrameDecoded, 0.0);
                {
                    let mut stats = self.shared.stats.lock().unwrap();
                    stats.frames_decoded += 1;
                    if let Some(fps) = input_window.record(frame_at) {
                        stats.input_fps = fps;
                        if should_adopt(fps, source_fps, measured_once) {
                            measured_once = true;
                            source_fps = fps;
                            gate.set_source_fps(fps);
                            debug!(
                                camera = %id,
                                source_fps,
                                skip_count = gate.skip_count(),
                                skip_ratio = gate.skip_ratio(),
                                "adopted measured source rate"
                            );
                        }
                    }
                }

                let pts = source.frame_pts();
                let send = match pts {
                    Some(p) => gate.should_send_timestamped(p, last_sent_pts, time_base),
                    None => gate.should_send_unpaced(),
                };
                if !send {
                    self.shared.stats.lock().unwrap().frames_skipped += 1;
                    continue;
                }

                match pts {
                    Some(p) => match pacer.schedule(p, Instant::now()) {
                        PaceDecision::Hold(until) => {
                            if !self.sleep_until(until) {
                                return PumpExit::Stop;
                            }
                        }
                        PaceDecision::Immediate { late_by } => {
                            if late_by.as_secs_f64() > pacecfg::LATENESS_CATCHUP_THRESHOLD_SEC {
                                trace!(camera = %id, ?late_by, "catching up");
                            }
                        }
                    },
                    None => {
                        if let Some(wait) =
                            interval_sleep(gate.target_interval(), last_sent_at, Instant::now())
                        {
                            if !self.sleep_for(wait) {
                                return PumpExit::Stop;
                            }
                        }
                    }
                }

                match self.dispatch(source.as_mut(), packet_at) {
                    Ok(true) => {
                        last_sent_pts = pts.or(last_sent_pts);
                        last_sent_at = Some(Instant::now());
                        delivered_total += 1;
                        let mut stats = self.shared.stats.lock().unwrap();
                        stats.frames_delivered += 1;
                        if let Some(fps) = output_window.record(Instant::now()) {
                            stats.output_fps = fps;
                            self.logger.log_heartbeat(id, "pump");
                        }
                        if delivered_total % logcfg::PROGRESS_LOG_EVERY == 0 {
                            debug!(
                                camera = %id,
                                delivered = delivered_total,
                                input_fps = input_window.last(),
                                output_fps = output_window.last(),
                                "delivery progress"
                            );
                        }
                    }
                    Ok(false) => {
                        let mut stats = self.shared.stats.lock().unwrap();
                        stats.frames_dropped += 1;
                    }
                    Err(reason) => return PumpExit::Reconnect(reason),
                }
            }
        }
    }

    /// Convert the current frame, copy it into a pool slot and hand it to
    /// the host. `Ok(false)` means the pool was exhausted and the frame
    /// was dropped.
    fn dispatch(&self, source: &mut dyn MediaSource, started_at: Instant) -> Result<bool, String> {
        let id = self.config.id;
        let view = match source.bgr_frame() {
            Ok(view) => view,
            Err(e) => return Err(format!("pixel conversion failed: {}", e)),
        };
        match self.pool.acquire(&view, id) {
            Some(lease) => {
                (self.frame_cb)(lease);
                self.logger.log_activity(
                    id,
                    ActivityKind::FrameDelivered,
                    started_at.elapsed().as_secs_f64() * 1000.0,
                );
                Ok(true)
            }
            None => {
                trace!(camera = %id, "delivery pool exhausted; dropping frame");
                Ok(false)
            }
        }
    }

    /// Post one state transition to the host and the per-camera log.
    fn post_status(&self, state: CameraState, message: &str) {
        self.logger.log(
            self.config.id,
            LogLevel::Info,
            &format!("{}: {}", state, message),
        );
        (self.status_cb)(self.config.id, state, message);
    }

    /// Backoff between reconnect attempts. Returns `false` when a stop
    /// request ended the wait.
    fn wait_reconnect(&self, attempts: u32) -> bool {
        let delay = reconnect_delay(attempts);
        self.post_status(
            CameraState::WaitingReconnect,
            &format!("reconnect attempt {} in {:?}", attempts, delay),
        );
        if !self.sleep_for(delay) {
            return false;
        }
        self.post_status(
            CameraState::Reconnecting,
            &format!("reconnect attempt {}", attempts),
        );
        true
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Stop-aware sleep to an absolute instant, in bounded slices.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let slice = Duration::from_millis(pacecfg::SLEEP_SLICE_MS);
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }

    /// Stop-aware relative sleep in bounded slices.
    fn sleep_for(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let slice = recfg::STOP_POLL_INTERVAL;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{MediaError, MediaResult};
    use crate::media::StreamInfo;
    use crate::types::BgrFrame;

    /// Decoder stub holding a fixed number of buffered frames.
    struct TailSource {
        buffered: u32,
        eof_seen: bool,
        pixels: Vec<u8>,
    }

    impl TailSource {
        fn with_buffered(buffered: u32) -> Self {
            Self {
                buffered,
                eof_seen: false,
                pixels: vec![0; 3],
            }
        }
    }

    impl MediaSource for TailSource {
        fn stream_info(&self) -> StreamInfo {
            StreamInfo {
                time_base: 1.0 / 90_000.0,
                guessed_fps: 25.0,
                width: 1,
                height: 1,
            }
        }

        fn read_packet(&mut self) -> MediaResult<ReadStatus> {
            Ok(ReadStatus::Eof)
        }

        fn send_packet(&mut self) -> MediaResult<DecodeStatus> {
            Ok(DecodeStatus::Again)
        }

        fn send_eof(&mut self) -> MediaResult<DecodeStatus> {
            self.eof_seen = true;
            Ok(DecodeStatus::Ok)
        }

        fn receive_frame(&mut self) -> MediaResult<DecodeStatus> {
            if !self.eof_seen {
                return Ok(DecodeStatus::Again);
            }
            if self.buffered > 0 {
                self.buffered -= 1;
                Ok(DecodeStatus::Ok)
            } else {
                Ok(DecodeStatus::Eof)
            }
        }

        fn frame_pts(&self) -> Option<i64> {
            None
        }

        fn bgr_frame(&mut self) -> MediaResult<BgrFrame<'_>> {
            Ok(BgrFrame {
                width: 1,
                height: 1,
                stride: 3,
                data: &self.pixels,
                pts: None,
            })
        }
    }

    #[test]
    fn drain_flushes_buffered_tail() {
        let mut source = TailSource::with_buffered(3);
        assert_eq!(drain_decoder(&mut source), 3);
        assert!(source.eof_seen);
    }

    #[test]
    fn drain_is_bounded() {
        let mut source = TailSource::with_buffered(u32::MAX);
        assert_eq!(drain_decoder(&mut source), 64);
    }

    #[test]
    fn drain_gives_up_when_eof_is_rejected() {
        struct RefusingSource(TailSource);
        impl MediaSource for RefusingSource {
            fn stream_info(&self) -> StreamInfo {
                self.0.stream_info()
            }
            fn read_packet(&mut self) -> MediaResult<ReadStatus> {
                self.0.read_packet()
            }
            fn send_packet(&mut self) -> MediaResult<DecodeStatus> {
                self.0.send_packet()
            }
            fn send_eof(&mut self) -> MediaResult<DecodeStatus> {
                Err(MediaError::new(MediaErrorKind::Stream, "decoder gone"))
            }
            fn receive_frame(&mut self) -> MediaResult<DecodeStatus> {
                self.0.receive_frame()
            }
            fn frame_pts(&self) -> Option<i64> {
                self.0.frame_pts()
            }
            fn bgr_frame(&mut self) -> MediaResult<BgrFrame<'_>> {
                self.0.bgr_frame()
            }
        }

        let mut source = RefusingSource(TailSource::with_buffered(3));
        assert_eq!(drain_decoder(&mut source), 0);
    }

    #[test]
    fn shared_state_starts_clean_and_latches_stop() {
        let shared = PipelineShared::new();
        assert!(!shared.stop_requested());
        assert_eq!(shared.stats(), PipelineStats::default());

        shared.request_stop();
        assert!(shared.stop_requested());
        assert!(shared.stop_flag().load(Ordering::SeqCst));
    }
}
