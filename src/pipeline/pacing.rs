// SPDX-License-Identifier: GPL-3.0-only

//! Presentation pacing
//!
//! Delivered frames are held back until their presentation instant. The
//! pacer pins the first sent PTS to a monotonic anchor and computes every
//! later target from that pair, so pacing is immune to wall-clock jumps
//! and decode jitter. A PTS discontinuity beyond the reset threshold
//! re-anchors instead of sleeping the gap away; a late frame is sent
//! immediately so the pipeline catches up instead of building a backlog.

use std::time::{Duration, Instant};

use crate::constants::pacing;

/// What to do with a frame that passed the skip gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDecision {
    /// Send right away; `late_by` tells how far behind schedule we are
    /// (zero for on-time and re-anchored frames)
    Immediate { late_by: Duration },
    /// Hold the frame until the given instant
    Hold(Instant),
}

#[derive(Debug)]
pub struct PtsPacer {
    time_base: f64,
    first_pts: Option<i64>,
    anchor: Option<Instant>,
    last_sent_pts_sec: f64,
}

impl PtsPacer {
    pub fn new(time_base: f64) -> Self {
        Self {
            time_base,
            first_pts: None,
            anchor: None,
            last_sent_pts_sec: 0.0,
        }
    }

    /// Plan the delivery of the frame with `pts`.
    ///
    /// State (anchor, last sent position) is updated up front; the
    /// caller's sleep may be cut short by a stop request without
    /// corrupting the clock.
    pub fn schedule(&mut self, pts: i64, now: Instant) -> PaceDecision {
        let (first_pts, anchor) = match (self.first_pts, self.anchor) {
            (Some(f), Some(a)) => (f, a),
            _ => {
                self.first_pts = Some(pts);
                self.anchor = Some(now);
                self.last_sent_pts_sec = 0.0;
                return PaceDecision::Immediate {
                    late_by: Duration::ZERO,
                };
            }
        };

        let pts_sec = (pts - first_pts) as f64 * self.time_base;
        if (pts_sec - self.last_sent_pts_sec).abs() > pacing::PTS_JUMP_RESET_THRESHOLD_SEC {
            self.first_pts = Some(pts);
            self.anchor = Some(now);
            self.last_sent_pts_sec = 0.0;
            return PaceDecision::Immediate {
                late_by: Duration::ZERO,
            };
        }

        self.last_sent_pts_sec = pts_sec;

        let elapsed = now.duration_since(anchor).as_secs_f64();
        let lateness = elapsed - pts_sec;
        if lateness < -pacing::EARLY_SLEEP_THRESHOLD_SEC {
            PaceDecision::Hold(now + Duration::from_secs_f64(-lateness))
        } else {
            PaceDecision::Immediate {
                late_by: Duration::from_secs_f64(lateness.max(0.0)),
            }
        }
    }

    /// Seconds into the stream of the last scheduled frame.
    pub fn last_sent_pts_sec(&self) -> f64 {
        self.last_sent_pts_sec
    }
}

/// Fallback pacing for untimestamped frames: hold the target interval
/// from the previous send, never sleep when already behind.
pub fn interval_sleep(
    target_interval_sec: f64,
    last_sent: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    let last = last_sent?;
    let since = now.duration_since(last).as_secs_f64();
    let remaining = target_interval_sec - since;
    (remaining > 0.0).then(|| Duration::from_secs_f64(remaining))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TB: f64 = 1.0 / 90_000.0; // 90 kHz

    fn hold_instant(decision: PaceDecision) -> Instant {
        match decision {
            PaceDecision::Hold(at) => at,
            other => panic!("expected Hold, got {other:?}"),
        }
    }

    fn assert_immediate(decision: PaceDecision) {
        assert!(
            matches!(decision, PaceDecision::Immediate { .. }),
            "expected Immediate, got {decision:?}"
        );
    }

    #[test]
    fn first_frame_is_immediate_and_anchors() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        assert_immediate(pacer.schedule(1_000_000, t0));
        assert_eq!(pacer.last_sent_pts_sec(), 0.0);
    }

    #[test]
    fn early_frame_sleeps_to_its_target() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        pacer.schedule(0, t0);

        // Frame due 200 ms in, planned immediately after the first.
        let due = hold_instant(pacer.schedule(18_000, t0 + Duration::from_millis(1)));
        let held = due.duration_since(t0 + Duration::from_millis(1));
        assert!((held.as_secs_f64() - 0.199).abs() < 0.001, "held {held:?}");
    }

    #[test]
    fn nearly_due_frame_is_not_held() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        pacer.schedule(0, t0);

        // Due in 30 ms: inside the early-sleep threshold.
        assert_immediate(pacer.schedule(2_700, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn late_frame_is_sent_immediately_with_lateness() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        pacer.schedule(0, t0);

        // Frame due at 100 ms arrives at 400 ms.
        match pacer.schedule(9_000, t0 + Duration::from_millis(400)) {
            PaceDecision::Immediate { late_by } => {
                assert!((late_by.as_secs_f64() - 0.300).abs() < 0.001, "late {late_by:?}");
            }
            other => panic!("expected Immediate, got {other:?}"),
        }
    }

    #[test]
    fn pts_jump_re_anchors() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        pacer.schedule(0, t0);
        pacer.schedule(9_000, t0 + Duration::from_millis(100));

        // 10 s discontinuity: no sleep, clock restarts at the new PTS.
        let t_jump = t0 + Duration::from_millis(200);
        assert_immediate(pacer.schedule(909_000, t_jump));
        assert_eq!(pacer.last_sent_pts_sec(), 0.0);

        // The frame after the jump paces off the new anchor.
        let due = hold_instant(pacer.schedule(909_000 + 18_000, t_jump + Duration::from_millis(1)));
        let held = due.duration_since(t_jump + Duration::from_millis(1));
        assert!((held.as_secs_f64() - 0.199).abs() < 0.001, "held {held:?}");
    }

    #[test]
    fn backward_jump_also_re_anchors() {
        let mut pacer = PtsPacer::new(TB);
        let t0 = Instant::now();
        pacer.schedule(900_000, t0);
        assert_immediate(pacer.schedule(0, t0 + Duration::from_millis(40)));
        assert_eq!(pacer.last_sent_pts_sec(), 0.0);
    }

    #[test]
    fn interval_sleep_only_when_ahead() {
        let now = Instant::now();
        assert_eq!(interval_sleep(0.1, None, now), None);

        let last = now - Duration::from_millis(40);
        let wait = interval_sleep(0.1, Some(last), now).expect("still ahead");
        assert!((wait.as_secs_f64() - 0.060).abs() < 0.002, "wait {wait:?}");

        let last = now - Duration::from_millis(500);
        assert_eq!(interval_sleep(0.1, Some(last), now), None);
    }
}
