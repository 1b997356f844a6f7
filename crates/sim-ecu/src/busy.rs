//! Single-slot busy gate
//!
//! An ECU processes one request at a time. The gate is a compare-and-swap on
//! an atomic flag; the returned guard releases it when dropped, so the slot
//! is freed on every exit path including early returns and task abort.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct BusyGate {
    busy: AtomicBool,
}

/// Holds the busy slot until dropped
#[derive(Debug)]
pub struct BusyGuard<'a> {
    gate: &'a BusyGate,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if a request is already in progress
    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
