// SPDX-License-Identifier: GPL-3.0-only

//! Shared types: camera identity, pipeline states and the host callback
//! contract

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::delivery::FrameLease;

/// Caller-assigned camera identifier
///
/// Non-negative, unique among currently registered pipelines, and reusable
/// the moment the registry drops its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraId(i32);

impl CameraId {
    /// Build an id; negative values are rejected.
    pub fn new(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one camera pipeline
///
/// Transitions are driven only by the pipeline worker; observers receive a
/// monotonic stream of state-change callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraState {
    Stopped,
    Connecting,
    Connected,
    Disconnected,
    WaitingReconnect,
    Reconnecting,
}

impl CameraState {
    /// All states, in status-code order
    pub const ALL: [CameraState; 6] = [
        CameraState::Stopped,
        CameraState::Connecting,
        CameraState::Connected,
        CameraState::Disconnected,
        CameraState::WaitingReconnect,
        CameraState::Reconnecting,
    ];

    /// Numeric status code delivered to binding layers
    pub fn code(&self) -> i32 {
        match self {
            CameraState::Stopped => 0,
            CameraState::Connecting => 1,
            CameraState::Connected => 2,
            CameraState::Disconnected => 3,
            CameraState::WaitingReconnect => 4,
            CameraState::Reconnecting => 5,
        }
    }

    /// Inverse of [`CameraState::code`], for binding layers decoding a
    /// status integer.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraState::Stopped => "Stopped",
            CameraState::Connecting => "Connecting",
            CameraState::Connected => "Connected",
            CameraState::Disconnected => "Disconnected",
            CameraState::WaitingReconnect => "WaitingReconnect",
            CameraState::Reconnecting => "Reconnecting",
        };
        write!(f, "{}", name)
    }
}

/// Pixel format of delivered frames
///
/// Delivery is always packed 24-bit BGR; the enum exists so the descriptor
/// carries an explicit tag rather than a bare sentinel integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgr24 => 3,
        }
    }

    /// Numeric tag delivered to binding layers
    pub fn code(&self) -> i32 {
        match self {
            PixelFormat::Bgr24 => 0,
        }
    }
}

/// Per-camera configuration handed to `add_camera`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    pub url: String,
    /// Requested delivery rate; zero or negative means 1 FPS
    pub target_fps: f64,
}

impl CameraConfig {
    pub fn new(id: CameraId, url: impl Into<String>, target_fps: f64) -> Self {
        Self {
            id,
            url: url.into(),
            target_fps,
        }
    }

    /// The rate actually used for pacing and skipping
    pub fn effective_target_fps(&self) -> f64 {
        if self.target_fps > 0.0 {
            self.target_fps
        } else {
            1.0
        }
    }
}

/// Borrowed view of one converted BGR frame, as produced by the media
/// facade and consumed by the delivery pool's copy
#[derive(Debug, Clone, Copy)]
pub struct BgrFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Source row stride in bytes; may exceed `width * 3`
    pub stride: usize,
    pub data: &'a [u8],
    pub pts: Option<i64>,
}

/// Status callback invoked on every pipeline state transition (plus on
/// waiting/reconnecting re-entries). Serialized per camera.
pub type StatusCallback = Arc<dyn Fn(CameraId, CameraState, &str) + Send + Sync>;

/// Frame callback invoked for every delivered frame. The host owns the
/// lease until it releases it.
pub type FrameCallback = Arc<dyn Fn(FrameLease) + Send + Sync>;

/// Counters snapshot for one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Frames that came out of the decoder
    pub frames_decoded: u64,
    /// Frames handed to the host callback
    pub frames_delivered: u64,
    /// Frames withheld by the skip gate
    pub frames_skipped: u64,
    /// Frames dropped because the delivery pool was exhausted
    pub frames_dropped: u64,
    /// Completed reconnect cycles
    pub reconnects: u64,
    /// Most recent measured input rate
    pub input_fps: f64,
    /// Most recent measured output rate
    pub output_fps: f64,
}
