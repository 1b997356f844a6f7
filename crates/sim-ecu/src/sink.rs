//! Response delivery seam between the engine and the transport

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;

/// Destination for the UDS responses of one request.
///
/// The network layer implements this per diagnostic message, wrapping each
/// payload in a DoIP diagnostic message addressed back to the tester.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: ResponseSink + ?Sized> ResponseSink for Arc<T> {
    async fn send(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        (**self).send(payload).await
    }
}
