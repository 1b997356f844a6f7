//! Response-pending (NRC 0x78) scheduling

use std::time::Duration;

use tokio::time::Instant;

use crate::nrc::{negative_response, nrc};

/// Deadline-driven schedule for intermediate pending frames.
///
/// A pending frame is sent, then the loop sleeps for the shorter of the
/// remaining time and the interval. It repeats until the deadline is reached,
/// so 950 ms at a 100 ms interval yields ten frames.
#[derive(Debug, Clone, Copy)]
pub struct PendingSchedule {
    deadline: Instant,
    interval: Duration,
}

impl PendingSchedule {
    pub fn new(pending_for: Duration, interval: Duration) -> Self {
        Self::starting_at(Instant::now(), pending_for, interval)
    }

    pub fn starting_at(start: Instant, pending_for: Duration, interval: Duration) -> Self {
        // A zero interval degrades to one pending frame covering the whole wait
        let interval = if interval.is_zero() {
            pending_for
        } else {
            interval
        };
        Self {
            deadline: start + pending_for,
            interval,
        }
    }

    /// How long to sleep after the next pending frame, `None` once the
    /// deadline has passed
    pub fn next_wait(&self, now: Instant) -> Option<Duration> {
        if now >= self.deadline {
            return None;
        }
        Some((self.deadline - now).min(self.interval))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// `[0x7F, SID, 0x78]`
pub fn pending_frame(service_id: u8) -> Vec<u8> {
    negative_response(service_id, nrc::RESPONSE_PENDING)
}
