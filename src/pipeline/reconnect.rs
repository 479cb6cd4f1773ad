// SPDX-License-Identifier: GPL-3.0-only

//! Reconnect backoff arithmetic

use std::time::Duration;

use crate::constants::reconnect;

/// Delay before reconnect attempt number `attempts` (1-based):
/// `clamp(base * attempts, min, max)`.
pub fn reconnect_delay(attempts: u32) -> Duration {
    let scaled = reconnect::BASE_DELAY.saturating_mul(attempts.max(1));
    scaled.clamp(reconnect::MIN_DELAY, reconnect::MAX_DELAY)
}

/// Delay between open-input retries: grows linearly, capped. The open
/// retry loop never gives up on its own; only a stop request ends it.
pub fn open_retry_delay(attempt: u32) -> Duration {
    let step = Duration::from_millis(500);
    step.saturating_mul(attempt.max(1))
        .min(reconnect::OPEN_RETRY_CAP)
}
