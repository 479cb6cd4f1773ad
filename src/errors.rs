// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the ingestion library
//!
//! Two families: [`RegistryError`] is what the host-facing API returns and
//! maps one-to-one onto the numeric codes a binding layer would expose;
//! [`MediaError`] is what the media facade produces and what the pipeline
//! worker classifies into retry/reconnect decisions.

use std::fmt;

use crate::types::CameraId;

/// Result type alias for host-facing registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type alias for media facade operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors surfaced by the host-facing API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has not been initialized (or was shut down)
    NotInitialized,
    /// No pipeline is registered under this id
    CameraNotFound(CameraId),
    /// The stream URL is empty or unparsable
    InvalidUrl(String),
    /// A pipeline is already registered under this id
    CameraInUse(CameraId),
    /// Context or pool allocation failed
    AllocationFailed(String),
    /// The worker thread could not be spawned
    WorkerSpawnFailed(String),
    /// A previous worker for this id has not released its slot yet
    WorkerStillRunning(CameraId),
}

impl RegistryError {
    /// Numeric code at the host boundary. Stable: binding layers encode
    /// these as the negative return values of the C-level API.
    pub fn code(&self) -> i32 {
        match self {
            RegistryError::NotInitialized => -1,
            RegistryError::CameraNotFound(_) => -2,
            RegistryError::InvalidUrl(_) => -3,
            RegistryError::CameraInUse(_) => -4,
            RegistryError::AllocationFailed(_) => -5,
            RegistryError::WorkerSpawnFailed(_) => -6,
            RegistryError::WorkerStillRunning(_) => -7,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotInitialized => write!(f, "registry is not initialized"),
            RegistryError::CameraNotFound(id) => write!(f, "camera {} is not registered", id),
            RegistryError::InvalidUrl(url) => write!(f, "invalid stream url: {:?}", url),
            RegistryError::CameraInUse(id) => write!(f, "camera {} is already registered", id),
            RegistryError::AllocationFailed(msg) => write!(f, "allocation failed: {}", msg),
            RegistryError::WorkerSpawnFailed(msg) => write!(f, "worker spawn failed: {}", msg),
            RegistryError::WorkerStillRunning(id) => {
                write!(f, "previous worker for camera {} is still running", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Broad classification of media facade failures
///
/// The pipeline keys its recovery on the kind, never on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
    /// Transient I/O failure while opening; retried with linear backoff
    OpenRetryable,
    /// Open/probe failed for a non-transient reason (bad URL, auth, codec)
    OpenFailed,
    /// Stream probing found no usable video stream
    NoVideoStream,
    /// Decoder could not be created or opened
    DecoderSetup,
    /// End of stream reported by the demuxer or decoder
    EndOfStream,
    /// Read or decode failed mid-stream
    Stream,
    /// Pixel conversion failed
    Scale,
    /// A blocking call was aborted by the interrupt hook
    Interrupted,
}

/// Error produced by the media facade
#[derive(Debug, Clone)]
pub struct MediaError {
    kind: MediaErrorKind,
    message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> MediaErrorKind {
        self.kind
    }

    /// True for open failures worth retrying in place (I/O, unreachable
    /// network, interrupt-aborted open)
    pub fn is_open_retryable(&self) -> bool {
        matches!(
            self.kind,
            MediaErrorKind::OpenRetryable | MediaErrorKind::Interrupted
        )
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MediaError {}
