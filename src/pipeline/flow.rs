// SPDX-License-Identifier: GPL-3.0-only

//! Frame-rate flow control: the per-frame skip decision and the windowed
//! rate measurement that feeds it

use std::time::Instant;

use crate::constants::{fps, pacing};

/// Decides, frame by frame, whether a decoded frame is forwarded or
/// skipped so the output approaches the requested rate.
///
/// Two modes, chosen per frame:
/// - timestamped frames compare the PTS delta since the last sent frame
///   against the target interval, which stays correct across wall-clock
///   gaps and variable-rate sources;
/// - untimestamped frames fall back to a fractional accumulator over the
///   measured source/target ratio.
#[derive(Debug)]
pub struct SkipGate {
    target_fps: f64,
    source_fps: f64,
    skip_ratio: f64,
    skip_count: u32,
    accumulator: f64,
}

impl SkipGate {
    pub fn new(target_fps: f64, source_fps: f64) -> Self {
        let mut gate = Self {
            target_fps,
            source_fps,
            skip_ratio: 1.0,
            skip_count: 1,
            accumulator: 0.0,
        };
        gate.recompute();
        gate
    }

    /// Adopt a new measured source rate and refresh the ratio.
    pub fn set_source_fps(&mut self, source_fps: f64) {
        self.source_fps = source_fps;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.skip_ratio = if self.target_fps > 0.0 && self.source_fps > self.target_fps {
            self.source_fps / self.target_fps.max(f64::EPSILON)
        } else {
            1.0
        };
        self.skip_count = self.skip_ratio.floor() as u32;
    }

    pub fn skip_ratio(&self) -> f64 {
        self.skip_ratio
    }

    /// Whole frames skipped per sent frame at the current ratio
    pub fn skip_count(&self) -> u32 {
        self.skip_count
    }

    /// Seconds between sent frames the gate is aiming for
    pub fn target_interval(&self) -> f64 {
        if self.target_fps > 0.0 {
            1.0 / self.target_fps
        } else if self.source_fps > 0.0 {
            1.0 / self.source_fps
        } else {
            pacing::DEFAULT_FRAME_INTERVAL_SEC
        }
    }

    /// Skip decision for a frame without a usable timestamp.
    pub fn should_send_unpaced(&mut self) -> bool {
        self.accumulator += 1.0;
        if self.skip_ratio <= 1.0 {
            self.accumulator = 0.0;
            return true;
        }
        if self.accumulator >= self.skip_ratio {
            self.accumulator -= self.skip_ratio;
            return true;
        }
        false
    }

    /// Skip decision for a timestamped frame. The first frame after a
    /// (re)connect always goes out.
    pub fn should_send_timestamped(
        &self,
        pts: i64,
        last_sent_pts: Option<i64>,
        time_base: f64,
    ) -> bool {
        let Some(last) = last_sent_pts else {
            return true;
        };
        let delta = (pts - last) as f64 * time_base;
        delta >= self.target_interval()
    }
}

/// Frame counter over a fixed measurement window
///
/// Two independent instances run per pipeline: the input window (decoder
/// output, drives skip-ratio adaptation) and the output window (delivered
/// frames, observability only).
#[derive(Debug)]
pub struct FpsWindow {
    count: u64,
    window_start: Instant,
    last_fps: f64,
}

impl FpsWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_fps: 0.0,
        }
    }

    /// Count one frame. Returns the measured rate when the window closed.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < fps::MEASURE_WINDOW {
            return None;
        }
        let measured = self.count as f64 / elapsed.as_secs_f64();
        self.last_fps = measured;
        self.count = 0;
        self.window_start = now;
        Some(measured)
    }

    pub fn last(&self) -> f64 {
        self.last_fps
    }
}

/// Clamp an implausible container frame-rate guess to the default.
pub fn sanitize_guessed_fps(guessed: f64) -> f64 {
    if (fps::MIN_PLAUSIBLE..=fps::MAX_PLAUSIBLE).contains(&guessed) {
        guessed
    } else {
        fps::DEFAULT_SOURCE
    }
}

/// Whether a fresh measurement should replace the current source rate.
pub fn should_adopt(measured: f64, current: f64, measured_before: bool) -> bool {
    !measured_before || (measured - current).abs() > fps::ADOPT_DELTA
}
