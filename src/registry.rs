// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide camera registry
//!
//! Owns the id → pipeline mapping, the shared delivery pool and the
//! interruption channel. The locking discipline is narrow: the mapping
//! mutex guards insertion and removal only; a running worker never takes
//! it.
//!
//! Stopping is deliberately asymmetric: `stop_camera` removes the mapping
//! entry *first*, releasing the id for immediate reuse, and only then
//! waits (bounded) for the worker to wind down. A worker that overruns the
//! wait is detached; it still observes its stop flag at the next
//! suspension point and exits on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::constants::{limits, registry as regcfg};
use crate::delivery::{FrameHandle, FramePool, PoolStats};
use crate::errors::{RegistryError, RegistryResult};
use crate::interrupt::InterruptChannel;
use crate::logging::CameraLogger;
use crate::media::MediaBackend;
use crate::media::ffmpeg::FfmpegBackend;
use crate::pipeline::{CameraPipeline, PipelineShared};
use crate::types::{CameraConfig, CameraId, FrameCallback, PipelineStats, StatusCallback};

struct PipelineHandle {
    shared: Arc<PipelineShared>,
    join: JoinHandle<()>,
}

struct RegistryInner {
    backend: Arc<dyn MediaBackend>,
    logger: CameraLogger,
    pool: FramePool,
    channel: InterruptChannel,
    initialized: AtomicBool,
    pipelines: Mutex<HashMap<CameraId, PipelineHandle>>,
}

/// The one object a host needs: add cameras, stop cameras, shut down
pub struct CameraRegistry {
    inner: Arc<RegistryInner>,
}

impl CameraRegistry {
    /// Registry over the production ffmpeg backend.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(FfmpegBackend::new()), CameraLogger::new())
    }

    /// Registry over any backend; this is also the test seam.
    pub fn with_backend(backend: Arc<dyn MediaBackend>, logger: CameraLogger) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                logger,
                pool: FramePool::new(),
                channel: InterruptChannel::new(),
                initialized: AtomicBool::new(false),
                pipelines: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bring the registry up. Idempotent; a second call is a no-op.
    pub fn initialize(&self) -> RegistryResult<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.pool.initialize(limits::FRAME_POOL_SIZE);
        self.inner.channel.drain();
        info!(pool_size = limits::FRAME_POOL_SIZE, "camera registry initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Register a camera and start its worker.
    pub fn add_camera(
        &self,
        config: CameraConfig,
        status_cb: StatusCallback,
        frame_cb: FrameCallback,
    ) -> RegistryResult<()> {
        if !self.is_initialized() {
            return Err(RegistryError::NotInitialized);
        }
        if config.url.trim().is_empty() {
            return Err(RegistryError::InvalidUrl(config.url));
        }

        let id = config.id;
        let mut pipelines = self.inner.pipelines.lock().unwrap();
        if pipelines.contains_key(&id) {
            return Err(RegistryError::CameraInUse(id));
        }
        if pipelines.len() >= limits::MAX_CAMERAS {
            return Err(RegistryError::AllocationFailed(format!(
                "camera capacity ({}) reached",
                limits::MAX_CAMERAS
            )));
        }

        // A wakeup aimed at an earlier camera must not abort this one's
        // first blocking call.
        self.inner.channel.drain();

        let shared = Arc::new(PipelineShared::new());
        let watch = self.inner.channel.watch(shared.stop_flag());
        let pipeline = CameraPipeline::new(
            config.clone(),
            Arc::clone(&self.inner.backend),
            self.inner.pool.clone(),
            self.inner.logger.clone(),
            status_cb,
            frame_cb,
            Arc::clone(&shared),
            watch,
        );

        let join = thread::Builder::new()
            .name(format!("camera-{}", id))
            .spawn(move || pipeline.run())
            .map_err(|e| RegistryError::WorkerSpawnFailed(e.to_string()))?;

        pipelines.insert(id, PipelineHandle { shared, join });
        info!(camera = %id, url = %config.url, "camera added");
        Ok(())
    }

    /// Stop a camera. The id is reusable as soon as the mapping entry is
    /// gone, which happens before the bounded wait.
    pub fn stop_camera(&self, id: CameraId) -> RegistryResult<()> {
        if !self.is_initialized() {
            return Err(RegistryError::NotInitialized);
        }

        let handle = {
            let mut pipelines = self.inner.pipelines.lock().unwrap();
            let Some(handle) = pipelines.remove(&id) else {
                return Err(RegistryError::CameraNotFound(id));
            };
            handle.shared.request_stop();
            self.inner.channel.notify();
            handle
        };

        self.join_bounded(id, handle);
        self.inner.logger.remove(id);
        // Clear the wakeup token so surviving pipelines stop aborting
        // their reads.
        self.inner.channel.drain();
        info!(camera = %id, "camera stopped");
        Ok(())
    }

    /// Stop everything and tear the registry down.
    pub fn shutdown(&self) {
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<(CameraId, PipelineHandle)> = {
            let mut pipelines = self.inner.pipelines.lock().unwrap();
            let snapshot: Vec<_> = pipelines.drain().collect();
            snapshot
        };

        // One token wakes every blocked read: the hook polls for
        // presence without consuming.
        for (_, handle) in &handles {
            handle.shared.request_stop();
        }
        self.inner.channel.notify();

        for (id, handle) in handles {
            self.join_bounded(id, handle);
            self.inner.logger.remove(id);
        }

        self.inner.channel.drain();
        self.inner.pool.destroy();
        info!("camera registry shut down");
    }

    /// Return a delivered frame's slot through its handle. Binding layers
    /// that cannot consume a [`crate::delivery::FrameLease`] route their
    /// releases here.
    pub fn release_frame(&self, handle: FrameHandle) {
        self.inner.pool.release(handle);
    }

    /// Counters for one running camera.
    pub fn stats(&self, id: CameraId) -> Option<PipelineStats> {
        let pipelines = self.inner.pipelines.lock().unwrap();
        pipelines.get(&id).map(|handle| handle.shared.stats())
    }

    /// Usage counters of the shared delivery pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Ids currently registered, unordered.
    pub fn cameras(&self) -> Vec<CameraId> {
        self.inner.pipelines.lock().unwrap().keys().copied().collect()
    }

    /// The logger shared with every pipeline, for host-side queries.
    pub fn logger(&self) -> &CameraLogger {
        &self.inner.logger
    }

    /// Wait up to the join budget for a worker, polling in short slices;
    /// a worker that overruns is detached with a warning.
    fn join_bounded(&self, id: CameraId, handle: PipelineHandle) {
        let deadline = Instant::now() + regcfg::JOIN_TIMEOUT;
        while !handle.join.is_finished() && Instant::now() < deadline {
            thread::sleep(crate::constants::reconnect::STOP_POLL_INTERVAL);
        }
        if handle.join.is_finished() {
            if handle.join.join().is_err() {
                warn!(camera = %id, "worker panicked");
            }
        } else {
            // std threads cannot be cancelled from outside; the worker
            // still holds its stop flag and exits at the next suspension
            // point.
            warn!(camera = %id, "worker did not exit within {:?}; detaching", regcfg::JOIN_TIMEOUT);
            drop(handle.join);
        }
        debug!(camera = %id, "worker slot released");
    }
}

impl Default for CameraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        if self.is_initialized() {
            debug!("registry dropped while initialized; shutting down");
            self.shutdown();
        }
    }
}
