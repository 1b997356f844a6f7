//! Link from an ECU back to the entity hosting it

use std::time::Duration;

use async_trait::async_trait;

/// Reset operations an entity exposes to its ECUs
#[async_trait]
pub trait EntityControl: Send + Sync {
    /// Close every connection and socket, stay offline for `duration`, then
    /// rebind and announce again
    async fn hard_reset(&self, duration: Duration);

    /// Treat the ECU at `address` as unreachable for `duration`
    async fn hard_reset_ecu(&self, address: u16, duration: Duration);
}
