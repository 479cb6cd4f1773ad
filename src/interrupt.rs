// SPDX-License-Identifier: GPL-3.0-only

//! Cross-thread interruption primitive
//!
//! One channel is shared by every pipeline in the process. The registry
//! writes a token whenever it needs a blocked media call to bail out; each
//! pipeline's demuxer interrupt hook polls the channel (non-blocking)
//! together with its own stop flag. The channel is drainable so a stale
//! token from an earlier stop cannot abort a freshly added camera.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide notification channel owned by the registry
#[derive(Clone)]
pub struct InterruptChannel {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl InterruptChannel {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Wake every blocked media call. One token is enough: the hook only
    /// checks for presence, and stop flags decide who actually exits.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    /// Discard queued tokens. Called before a new worker starts so it does
    /// not observe interrupts aimed at its predecessors.
    pub fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Build the poll handle a single pipeline hands to the media facade.
    pub fn watch(&self, stop: Arc<AtomicBool>) -> InterruptWatch {
        InterruptWatch {
            stop,
            rx: self.rx.clone(),
        }
    }
}

impl Default for InterruptChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-pipeline poll handle
///
/// Cheap to clone and safe to poll from the demuxer's interrupt callback:
/// both checks are non-blocking.
#[derive(Clone)]
pub struct InterruptWatch {
    stop: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl InterruptWatch {
    /// True when the owning pipeline should abandon its current blocking
    /// call. Does not consume queued tokens; draining is the registry's
    /// call to make.
    pub fn triggered(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || !self.rx.is_empty()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
