//! Test helpers for code built on the engine

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::SinkError;
use crate::sink::ResponseSink;

/// Sink that records every payload it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Wait until at least `count` payloads arrived, or `timeout` elapsed.
    /// Returns what was recorded either way.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.sent.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.sent()
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        self.sent.lock().push(payload);
        self.notify.notify_waiters();
        Ok(())
    }
}
