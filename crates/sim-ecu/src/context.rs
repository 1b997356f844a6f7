//! Per-request handler context

use std::sync::Arc;
use std::time::Duration;

use crate::ecu::SimEcu;
use crate::error::HandlerError;
use crate::matcher::RequestMatcher;
use crate::nrc::{negative_response, positive_response};
use crate::store::PropertyStore;

/// Callback run after the final response of a pending sequence is sent
pub type CompletionHandler = Box<dyn FnOnce(&SimEcu) + Send>;

/// What a hard reset takes offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Every connection and socket of the owning entity
    Entity,
    /// Only the ECU that staged the reset
    Ecu,
}

pub(crate) struct PendingResponse {
    pub pending_for: Duration,
    pub on_complete: Option<CompletionHandler>,
}

pub(crate) struct StagedResponse {
    pub payload: Vec<u8>,
    pub pending: Option<PendingResponse>,
}

/// Result of running the interceptor and matcher chain for one request
pub(crate) struct RequestOutcome {
    pub response: Option<StagedResponse>,
    pub resets: Vec<(ResetScope, Duration)>,
}

/// Handed to matchers and inbound interceptors.
///
/// A handler stages at most one response; staging again replaces it. The
/// engine sends it once the chain settles, so a handler that asks to
/// continue matching loses whatever it staged.
pub struct RequestContext<'a> {
    ecu: &'a SimEcu,
    request: &'a [u8],
    busy: bool,
    matcher: Option<Arc<RequestMatcher>>,
    staged: Option<StagedResponse>,
    continue_matching: bool,
    resets: Vec<(ResetScope, Duration)>,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(ecu: &'a SimEcu, request: &'a [u8], busy: bool) -> Self {
        Self {
            ecu,
            request,
            busy,
            matcher: None,
            staged: None,
            continue_matching: false,
            resets: Vec::new(),
        }
    }

    pub fn request(&self) -> &'a [u8] {
        self.request
    }

    /// First request byte. Empty requests never reach handlers.
    pub fn service_id(&self) -> u8 {
        self.request.first().copied().unwrap_or_default()
    }

    pub fn ecu(&self) -> &'a SimEcu {
        self.ecu
    }

    /// Set while another request holds the ECU's busy slot
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// ECU-wide property store
    pub fn store(&self) -> &'a PropertyStore {
        self.ecu.store()
    }

    /// Store of the matcher currently running, `None` inside interceptors
    pub fn matcher_store(&self) -> Option<&PropertyStore> {
        self.matcher.as_deref().map(RequestMatcher::store)
    }

    pub fn matcher_name(&self) -> Option<&str> {
        self.matcher.as_deref().map(RequestMatcher::name)
    }

    pub fn respond(&mut self, payload: impl Into<Vec<u8>>) {
        self.staged = Some(StagedResponse {
            payload: payload.into(),
            pending: None,
        });
    }

    /// Send response-pending frames for `pending_for`, then `payload`
    pub fn respond_pending(&mut self, payload: impl Into<Vec<u8>>, pending_for: Duration) {
        self.staged = Some(StagedResponse {
            payload: payload.into(),
            pending: Some(PendingResponse {
                pending_for,
                on_complete: None,
            }),
        });
    }

    /// Like [`respond_pending`](Self::respond_pending), running `on_complete`
    /// once the final response went out
    pub fn respond_pending_then<F>(
        &mut self,
        payload: impl Into<Vec<u8>>,
        pending_for: Duration,
        on_complete: F,
    ) where
        F: FnOnce(&SimEcu) + Send + 'static,
    {
        self.staged = Some(StagedResponse {
            payload: payload.into(),
            pending: Some(PendingResponse {
                pending_for,
                on_complete: Some(Box::new(on_complete)),
            }),
        });
    }

    /// Positive response echoing the configured number of leading request
    /// bytes
    pub fn ack(&mut self) -> Result<(), HandlerError> {
        self.ack_with(&[])
    }

    /// `[SID + 0x40, echoed bytes..., payload...]`
    pub fn ack_with(&mut self, payload: &[u8]) -> Result<(), HandlerError> {
        let length = self.ecu.config().ack_length(self.service_id());
        if length == 0 || length > self.request.len() {
            return Err(HandlerError::AckLength {
                length,
                request_len: self.request.len(),
            });
        }

        let mut data = Vec::with_capacity(length - 1 + payload.len());
        data.extend_from_slice(&self.request[1..length]);
        data.extend_from_slice(payload);
        self.respond(positive_response(self.service_id(), &data));
        Ok(())
    }

    /// `[0x7F, SID, code]`
    pub fn nrc(&mut self, code: u8) {
        self.respond(negative_response(self.service_id(), code));
    }

    /// Drop any staged response; the request is answered with silence
    pub fn no_response(&mut self) {
        self.staged = None;
    }

    pub fn staged_response(&self) -> Option<&[u8]> {
        self.staged.as_ref().map(|s| s.payload.as_slice())
    }

    /// Hand the request on to the next interceptor or matcher
    pub fn continue_matching(&mut self, value: bool) {
        self.continue_matching = value;
    }

    /// Take the owning entity offline for `duration` after this response
    pub fn hard_reset_entity(&mut self, duration: Duration) {
        self.resets.push((ResetScope::Entity, duration));
    }

    /// Make only this ECU unreachable for `duration` after this response
    pub fn hard_reset_ecu(&mut self, duration: Duration) {
        self.resets.push((ResetScope::Ecu, duration));
    }

    pub(crate) fn enter(&mut self, matcher: Option<Arc<RequestMatcher>>) {
        self.matcher = matcher;
        self.continue_matching = false;
    }

    pub(crate) fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_matching)
    }

    pub(crate) fn into_outcome(self) -> RequestOutcome {
        RequestOutcome {
            response: self.staged,
            resets: self.resets,
        }
    }
}
