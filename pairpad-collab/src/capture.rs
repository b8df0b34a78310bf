//! Local edit capture.
//!
//! Registered as a [`MutationObserver`] on the local [`Document`]. Every
//! mutation made while the suppression flag is clear becomes one outgoing
//! [`EditOperation`]; mutations made by the remote applier (flag set) are
//! counted and dropped so they never echo back to the room.
//!
//! [`Document`]: pairpad_core::Document

use pairpad_core::{EditOperation, Mutation, MutationObserver, Suppression};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capture counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub emitted: u64,
    pub suppressed: u64,
}

#[derive(Debug, Default)]
struct AtomicCaptureStats {
    emitted: AtomicU64,
    suppressed: AtomicU64,
}

/// Handle for reading capture counters after the observer moved into the
/// document.
#[derive(Debug, Clone, Default)]
pub struct CaptureCounters(Arc<AtomicCaptureStats>);

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            emitted: self.0.emitted.load(Ordering::Relaxed),
            suppressed: self.0.suppressed.load(Ordering::Relaxed),
        }
    }
}

pub struct EditCapture {
    suppression: Suppression,
    outbox: mpsc::UnboundedSender<EditOperation>,
    counters: CaptureCounters,
}

impl EditCapture {
    /// Create a capture bound to a document's suppression flag.
    ///
    /// Returns the observer and the receiving end of its outbox.
    pub fn new(suppression: Suppression) -> (Self, mpsc::UnboundedReceiver<EditOperation>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let capture = Self {
            suppression,
            outbox,
            counters: CaptureCounters::default(),
        };
        (capture, rx)
    }

    pub fn counters(&self) -> CaptureCounters {
        self.counters.clone()
    }
}

impl MutationObserver for EditCapture {
    fn on_mutation(&mut self, mutation: &Mutation<'_>) {
        if self.suppression.is_active() {
            self.counters.0.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let op = EditOperation::encode(mutation.range, mutation.text);
        if self.outbox.send(op).is_err() {
            log::debug!("edit outbox closed; local edit not queued");
            return;
        }
        self.counters.0.emitted.fetch_add(1, Ordering::Relaxed);
    }
}
