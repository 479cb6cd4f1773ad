// SPDX-License-Identifier: GPL-3.0-only

//! Bounded frame delivery pool
//!
//! The pool bounds how many decoded frames can be in flight to the host at
//! once. Pipelines acquire a slot, copy the converted pixels into it and
//! hand the resulting [`FrameLease`] to the frame callback; the host keeps
//! the lease for as long as it needs the pixels and releases it exactly
//! once. A slot whose lease is dropped without an explicit release is
//! reclaimed automatically.
//!
//! Slots are addressed by [`FrameHandle`] (index plus generation), so a
//! stale or foreign handle can never free somebody else's frame: the
//! generation moves on every release and a mismatch is a logged no-op.
//!
//! Locking is deliberately narrow: the free list and slot accounting share
//! one mutex, while the per-delivery pixel copy runs outside it.

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::types::{BgrFrame, CameraId, PixelFormat};

/// Typed index into the pool's slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Stable identity of one delivered frame
///
/// `Copy`, cheap to stash, and safe to misuse: releasing through a handle
/// that is stale, foreign or already released does nothing but log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle {
    index: SlotIndex,
    generation: u64,
}

impl FrameHandle {
    pub fn index(&self) -> SlotIndex {
        self.index
    }
}

/// Metadata and pixels of one delivered frame
#[derive(Debug)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub pts: Option<i64>,
    pub camera_id: CameraId,
    /// Bytes per row of the packed buffer (`width * 3` for BGR24)
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Accounting record for one pool slot
struct Slot {
    generation: u64,
    leased: bool,
    camera_id: Option<CameraId>,
    byte_size: usize,
}

struct SlotTable {
    initialized: bool,
    slots: Vec<Slot>,
    free: Vec<usize>,
    acquired_total: u64,
    exhausted_total: u64,
}

/// Usage counters for the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub leased: usize,
    /// Successful acquisitions over the pool's lifetime
    pub acquired_total: u64,
    /// Acquisitions refused because every slot was leased
    pub exhausted_total: u64,
}

struct PoolShared {
    table: Mutex<SlotTable>,
}

/// Bounded pool of frame slots shared by every pipeline
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                table: Mutex::new(SlotTable {
                    initialized: false,
                    slots: Vec::new(),
                    free: Vec::new(),
                    acquired_total: 0,
                    exhausted_total: 0,
                }),
            }),
        }
    }

    /// Allocate `size` slots. Idempotent: a second call on a live pool is
    /// a no-op.
    pub fn initialize(&self, size: usize) {
        let mut table = self.shared.table.lock().unwrap();
        if table.initialized {
            debug!(size, "frame pool already initialized");
            return;
        }
        table.slots = (0..size)
            .map(|_| Slot {
                generation: 0,
                leased: false,
                camera_id: None,
                byte_size: 0,
            })
            .collect();
        table.free = (0..size).rev().collect();
        table.acquired_total = 0;
        table.exhausted_total = 0;
        table.initialized = true;
        debug!(size, "frame pool initialized");
    }

    /// Claim a slot and copy `frame` into it.
    ///
    /// Returns `None` when every slot is leased out (the caller drops the
    /// frame) or the pool is not initialized. The row copy tolerates a
    /// source stride wider than the packed row and runs outside the lock.
    pub fn acquire(&self, frame: &BgrFrame<'_>, camera_id: CameraId) -> Option<FrameLease> {
        let row_bytes = frame.width as usize * PixelFormat::Bgr24.bytes_per_pixel();
        let byte_size = row_bytes * frame.height as usize;

        let (index, generation) = {
            let mut table = self.shared.table.lock().unwrap();
            if !table.initialized {
                warn!(camera = %camera_id, "frame pool used before initialization");
                return None;
            }
            let Some(index) = table.free.pop() else {
                table.exhausted_total += 1;
                return None;
            };
            table.acquired_total += 1;
            let slot = &mut table.slots[index];
            slot.leased = true;
            slot.camera_id = Some(camera_id);
            slot.byte_size = byte_size;
            (index, slot.generation)
        };

        let mut data = Vec::with_capacity(byte_size);
        for row in 0..frame.height as usize {
            let start = row * frame.stride;
            data.extend_from_slice(&frame.data[start..start + row_bytes]);
        }

        Some(FrameLease {
            descriptor: FrameDescriptor {
                width: frame.width,
                height: frame.height,
                pixel_format: PixelFormat::Bgr24,
                pts: frame.pts,
                camera_id,
                stride: row_bytes,
                data,
            },
            handle: FrameHandle {
                index: SlotIndex(index),
                generation,
            },
            pool: Arc::clone(&self.shared),
            released: false,
        })
    }

    /// Return a slot to the free list.
    ///
    /// Safe with any handle: stale generations, double releases and
    /// handles from a destroyed pool all log a warning and do nothing.
    pub fn release(&self, handle: FrameHandle) {
        release_slot(&self.shared, handle);
    }

    /// Slots currently available, for observability and tests.
    pub fn available(&self) -> usize {
        self.shared.table.lock().unwrap().free.len()
    }

    /// Slots currently leased to the host.
    pub fn leased(&self) -> usize {
        let table = self.shared.table.lock().unwrap();
        table.slots.iter().filter(|slot| slot.leased).count()
    }

    /// Usage counters, for observability.
    pub fn stats(&self) -> PoolStats {
        let table = self.shared.table.lock().unwrap();
        PoolStats {
            size: table.slots.len(),
            available: table.free.len(),
            leased: table.slots.iter().filter(|slot| slot.leased).count(),
            acquired_total: table.acquired_total,
            exhausted_total: table.exhausted_total,
        }
    }

    /// Tear the pool down, reclaiming any slot the host never released.
    pub fn destroy(&self) {
        let mut table = self.shared.table.lock().unwrap();
        if !table.initialized {
            return;
        }
        for (index, slot) in table.slots.iter().enumerate() {
            if slot.leased {
                warn!(
                    index,
                    camera = ?slot.camera_id.map(|id| id.get()),
                    byte_size = slot.byte_size,
                    "destroying frame pool with slot still leased"
                );
            }
        }
        table.slots.clear();
        table.free.clear();
        table.initialized = false;
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

fn release_slot(shared: &Arc<PoolShared>, handle: FrameHandle) {
    let mut table = shared.table.lock().unwrap();
    if !table.initialized {
        warn!(index = handle.index.get(), "frame released after pool teardown");
        return;
    }
    let Some(slot) = table.slots.get_mut(handle.index.get()) else {
        warn!(index = handle.index.get(), "frame handle does not belong to this pool");
        return;
    };
    if !slot.leased || slot.generation != handle.generation {
        warn!(
            index = handle.index.get(),
            generation = handle.generation,
            "ignoring release of stale or already released frame handle"
        );
        return;
    }
    slot.leased = false;
    slot.generation += 1;
    slot.camera_id = None;
    slot.byte_size = 0;
    let index = handle.index.get();
    table.free.push(index);
}

/// The host's read ownership of one delivered frame
///
/// Created by [`FramePool::acquire`], handed to the frame callback, valid
/// until released. Dropping an unreleased lease reclaims the slot so a
/// forgetful host degrades to a log line instead of a leak.
pub struct FrameLease {
    descriptor: FrameDescriptor,
    handle: FrameHandle,
    pool: Arc<PoolShared>,
    released: bool,
}

impl FrameLease {
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> FrameHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn stride(&self) -> usize {
        self.descriptor.stride
    }

    pub fn pts(&self) -> Option<i64> {
        self.descriptor.pts
    }

    pub fn camera_id(&self) -> CameraId {
        self.descriptor.camera_id
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.descriptor.pixel_format
    }

    pub fn data(&self) -> &[u8] {
        &self.descriptor.data
    }

    /// Give the slot back. Exactly-once is enforced by consuming `self`;
    /// the handle-based [`FramePool::release`] path stays available for
    /// hosts that route releases through a binding layer.
    pub fn release(mut self) {
        self.released = true;
        release_slot(&self.pool, self.handle);
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if !self.released {
            debug!(
                index = self.handle.index.get(),
                camera = %self.descriptor.camera_id,
                "frame lease dropped without release; reclaiming slot"
            );
            release_slot(&self.pool, self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(data: &[u8], width: u32, height: u32, stride: usize) -> BgrFrame<'_> {
        BgrFrame {
            width,
            height,
            stride,
            data,
            pts: Some(90_000),
        }
    }

    fn camera(raw: i32) -> CameraId {
        CameraId::new(raw).unwrap()
    }

    #[test]
    fn acquire_copies_packed_rows() {
        let pool = FramePool::new();
        pool.initialize(2);

        // Two rows of 2 BGR pixels with 2 bytes of padding per row.
        let data = [
            1, 2, 3, 4, 5, 6, 0xAA, 0xAA, //
            7, 8, 9, 10, 11, 12, 0xBB, 0xBB,
        ];
        let lease = pool
            .acquire(&test_frame(&data, 2, 2, 8), camera(3))
            .expect("slot available");

        assert_eq!(lease.stride(), 6);
        assert_eq!(lease.data(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(lease.pts(), Some(90_000));
        assert_eq!(lease.camera_id(), camera(3));
        lease.release();
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = FramePool::new();
        pool.initialize(1);
        let data = [0u8; 3];

        let first = pool.acquire(&test_frame(&data, 1, 1, 3), camera(0));
        assert!(first.is_some());
        assert!(pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).is_none());

        first.unwrap().release();
        assert!(pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).is_some());
    }

    #[test]
    fn stale_handle_release_is_noop() {
        let pool = FramePool::new();
        pool.initialize(1);
        let data = [0u8; 3];

        let lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(1)).unwrap();
        let handle = lease.handle();
        lease.release();

        // The slot was recycled; the old handle's generation is gone.
        pool.release(handle);
        assert_eq!(pool.available(), 1);

        let lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(1)).unwrap();
        // Releasing the stale handle again must not free the new lease.
        pool.release(handle);
        assert_eq!(pool.available(), 0);
        lease.release();
    }

    #[test]
    fn dropped_lease_reclaims_slot() {
        let pool = FramePool::new();
        pool.initialize(1);
        let data = [0u8; 3];

        {
            let _lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(2));
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn stats_track_acquisitions_and_exhaustion() {
        let pool = FramePool::new();
        pool.initialize(1);
        let data = [0u8; 3];

        let lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).unwrap();
        assert!(pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).is_none());
        lease.release();

        let stats = pool.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.acquired_total, 1);
        assert_eq!(stats.exhausted_total, 1);
    }

    #[test]
    fn initialize_is_idempotent() {
        let pool = FramePool::new();
        pool.initialize(4);
        let data = [0u8; 3];
        let lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).unwrap();

        pool.initialize(16);
        assert_eq!(pool.available(), 3);
        lease.release();
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn release_after_destroy_is_noop() {
        let pool = FramePool::new();
        pool.initialize(1);
        let data = [0u8; 3];
        let lease = pool.acquire(&test_frame(&data, 1, 1, 3), camera(0)).unwrap();
        let handle = lease.handle();
        std::mem::forget(lease);

        pool.destroy();
        pool.release(handle);
        assert_eq!(pool.available(), 0);
    }
}
