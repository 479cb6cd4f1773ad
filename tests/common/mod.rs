// SPDX-License-Identifier: GPL-3.0-only

//! Scripted media backend for integration tests
//!
//! Serves synthetic BGR frames on a schedule, refuses connections on cue
//! and can block forever to exercise the interruption path, all without
//! a network or a codec.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camera_pipeline::errors::{MediaError, MediaErrorKind, MediaResult};
use camera_pipeline::interrupt::InterruptWatch;
use camera_pipeline::media::{
    ConnectOptions, DecodeStatus, MediaBackend, MediaSource, ReadStatus, StreamInfo,
};
use camera_pipeline::types::BgrFrame;
use camera_pipeline::{CameraId, CameraState};

pub const TICKS_PER_SECOND: f64 = 90_000.0;

/// One synthetic stream's parameters
#[derive(Debug, Clone, Copy)]
pub struct StreamScript {
    /// Frames served before EOF (`u64::MAX` = endless)
    pub frame_limit: u64,
    /// Real-time rate the source emits at
    pub fps: f64,
    pub with_pts: bool,
    pub width: u32,
    pub height: u32,
    /// Add this many seconds to every PTS from the given frame on,
    /// simulating a timestamp discontinuity
    pub pts_jump: Option<(u64, f64)>,
    /// After this many frames, packets keep flowing but none of them
    /// decodes, simulating a stream that went bad without dying
    pub undecodable_after: Option<u64>,
}

impl Default for StreamScript {
    fn default() -> Self {
        Self {
            frame_limit: u64::MAX,
            fps: 50.0,
            with_pts: true,
            width: 16,
            height: 8,
            pts_jump: None,
            undecodable_after: None,
        }
    }
}

/// What one `connect` attempt does
#[derive(Debug, Clone, Copy)]
pub enum ServePlan {
    Serve(StreamScript),
    Refuse(MediaErrorKind),
    /// Connect succeeds, then every read blocks until interrupted
    Block,
}

pub struct ScriptedBackend {
    plans: Mutex<VecDeque<ServePlan>>,
    fallback: ServePlan,
    connects: AtomicUsize,
}

impl ScriptedBackend {
    pub fn endless() -> Self {
        Self::with_fallback(ServePlan::Serve(StreamScript::default()))
    }

    pub fn with_fallback(fallback: ServePlan) -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            fallback,
            connects: AtomicUsize::new(0),
        }
    }

    /// Queue a plan for the next connect attempt; the fallback serves
    /// once the queue is empty.
    pub fn push_plan(&self, plan: ServePlan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl MediaBackend for ScriptedBackend {
    fn connect(
        &self,
        _url: &str,
        _options: &ConnectOptions,
        watch: InterruptWatch,
    ) -> MediaResult<Box<dyn MediaSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match plan {
            ServePlan::Refuse(kind) => Err(MediaError::new(kind, "scripted refusal")),
            ServePlan::Serve(script) => Ok(Box::new(ScriptedSource::new(script, watch, false))),
            ServePlan::Block => Ok(Box::new(ScriptedSource::new(
                StreamScript::default(),
                watch,
                true,
            ))),
        }
    }
}

struct ScriptedSource {
    script: StreamScript,
    watch: InterruptWatch,
    block: bool,
    produced: u64,
    frame_pending: bool,
    current_pts: Option<i64>,
    buffer: Vec<u8>,
}

impl ScriptedSource {
    fn new(script: StreamScript, watch: InterruptWatch, block: bool) -> Self {
        let buffer = vec![0x40; (script.width * script.height * 3) as usize];
        Self {
            script,
            watch,
            block,
            produced: 0,
            frame_pending: false,
            current_pts: None,
            buffer,
        }
    }

    /// Sleep in slices, bailing out like a real demuxer when the
    /// interrupt hook fires.
    fn interruptible_sleep(&self, duration: Duration) -> MediaResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.watch.triggered() {
                return Err(MediaError::new(
                    MediaErrorKind::Interrupted,
                    "read aborted by interrupt hook",
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

impl MediaSource for ScriptedSource {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            time_base: 1.0 / TICKS_PER_SECOND,
            guessed_fps: self.script.fps,
            width: self.script.width,
            height: self.script.height,
        }
    }

    fn read_packet(&mut self) -> MediaResult<ReadStatus> {
        if self.block {
            loop {
                self.interruptible_sleep(Duration::from_millis(50))?;
            }
        }
        if self.produced >= self.script.frame_limit {
            return Ok(ReadStatus::Eof);
        }
        self.interruptible_sleep(Duration::from_secs_f64(1.0 / self.script.fps))?;
        self.produced += 1;
        self.frame_pending = !self
            .script
            .undecodable_after
            .is_some_and(|after| self.produced > after);
        self.current_pts = self.script.with_pts.then(|| {
            let mut pts = self.produced as f64 * TICKS_PER_SECOND / self.script.fps;
            if let Some((after, jump_sec)) = self.script.pts_jump {
                if self.produced >= after {
                    pts += jump_sec * TICKS_PER_SECOND;
                }
            }
            pts as i64
        });
        Ok(ReadStatus::Video)
    }

    fn send_packet(&mut self) -> MediaResult<DecodeStatus> {
        Ok(DecodeStatus::Ok)
    }

    fn send_eof(&mut self) -> MediaResult<DecodeStatus> {
        self.frame_pending = false;
        Ok(DecodeStatus::Eof)
    }

    fn receive_frame(&mut self) -> MediaResult<DecodeStatus> {
        if self.frame_pending {
            self.frame_pending = false;
            Ok(DecodeStatus::Ok)
        } else {
            Ok(DecodeStatus::Again)
        }
    }

    fn frame_pts(&self) -> Option<i64> {
        self.current_pts
    }

    fn bgr_frame(&mut self) -> MediaResult<BgrFrame<'_>> {
        Ok(BgrFrame {
            width: self.script.width,
            height: self.script.height,
            stride: (self.script.width * 3) as usize,
            data: &self.buffer,
            pts: self.current_pts,
        })
    }
}

/// Status-callback recorder shared between the test and the worker
#[derive(Clone, Default)]
pub struct StatusLog {
    entries: Arc<Mutex<Vec<(CameraId, CameraState, String)>>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: CameraId, state: CameraState, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((id, state, message.to_string()));
    }

    pub fn states(&self) -> Vec<CameraState> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, state, _)| *state)
            .collect()
    }

    pub fn contains(&self, state: CameraState) -> bool {
        self.states().contains(&state)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
