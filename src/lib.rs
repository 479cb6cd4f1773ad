// SPDX-License-Identifier: GPL-3.0-only

//! Concurrent IP-camera ingestion library
//!
//! Connects to many live video sources at once (RTSP, HLS, RTMP,
//! HTTP-MJPEG), decodes them, thins and paces the frames to the rate each
//! caller asked for, and hands packed BGR24 buffers to host callbacks.
//! Every camera is an independent worker with its own connection, decoder,
//! pacing clock and automatic reconnection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │    CameraRegistry    │  ← add/stop/shutdown, owns pool + wakeup channel
//! └──────────┬───────────┘
//!            │ one worker thread per camera
//!            ▼
//! ┌──────────────────────┐      ┌─────────────────┐
//! │    CameraPipeline    │─────►│    FramePool    │──► frame callback
//! │ connect → decode →   │      └─────────────────┘
//! │ skip → pace → send   │──────────────────────────► status callback
//! └──────────┬───────────┘
//!            │ MediaSource trait
//!            ▼
//! ┌──────────────────────┐
//! │    FfmpegBackend     │  ← demux, decode, scale to BGR24
//! └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use camera_pipeline::{CameraConfig, CameraId, CameraRegistry};
//!
//! let registry = CameraRegistry::new();
//! registry.initialize().unwrap();
//!
//! let id = CameraId::new(0).unwrap();
//! registry
//!     .add_camera(
//!         CameraConfig::new(id, "rtsp://10.0.0.17/stream1", 10.0),
//!         Arc::new(|id, state, msg| println!("camera {id}: {state} ({msg})")),
//!         Arc::new(|frame| {
//!             // consume frame.data(), then give the slot back
//!             frame.release();
//!         }),
//!     )
//!     .unwrap();
//!
//! // ... later
//! registry.shutdown();
//! ```

pub mod constants;
pub mod delivery;
pub mod errors;
pub mod interrupt;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod registry;
pub mod types;

// Re-export the host-facing surface
pub use delivery::{FrameDescriptor, FrameHandle, FrameLease, PoolStats};
pub use errors::{MediaError, MediaErrorKind, RegistryError, RegistryResult};
pub use logging::{ActivityKind, CameraLogger, LogLevel};
pub use registry::CameraRegistry;
pub use types::{
    CameraConfig, CameraId, CameraState, FrameCallback, PipelineStats, PixelFormat, StatusCallback,
};
