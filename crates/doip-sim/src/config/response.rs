//! Canned responses turned into request matchers

use std::time::Duration;

use sim_ecu::nrc::negative_response;
use sim_ecu::{RequestMatcher, RequestPattern};
use tracing::Level;

/// What a canned response sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAction {
    /// Raw UDS payload
    Respond(Vec<u8>),
    /// Positive response echoing the leading request bytes
    Ack,
    Nrc(u8),
}

/// A declaratively configured matcher
#[derive(Debug, Clone)]
pub struct StaticResponse {
    pub name: String,
    pub pattern: RequestPattern,
    pub action: ResponseAction,
    /// Send response-pending frames for this long first
    pub pending: Option<Duration>,
    pub continue_matching: bool,
    pub log_level: Level,
}

impl StaticResponse {
    pub fn new(name: impl Into<String>, pattern: RequestPattern, action: ResponseAction) -> Self {
        Self {
            name: name.into(),
            pattern,
            action,
            pending: None,
            continue_matching: false,
            log_level: Level::DEBUG,
        }
    }

    pub fn to_matcher(&self) -> RequestMatcher {
        let action = self.action.clone();
        let pending = self.pending;
        let continue_matching = self.continue_matching;

        RequestMatcher::new(self.name.clone(), self.pattern.clone(), move |ctx| {
            let payload = match &action {
                ResponseAction::Respond(bytes) => bytes.clone(),
                ResponseAction::Ack => {
                    ctx.ack()?;
                    ctx.staged_response().map(<[u8]>::to_vec).unwrap_or_default()
                }
                ResponseAction::Nrc(code) => negative_response(ctx.service_id(), *code),
            };
            match pending {
                Some(duration) => ctx.respond_pending(payload, duration),
                None => ctx.respond(payload),
            }
            ctx.continue_matching(continue_matching);
            Ok(())
        })
        .with_log_level(self.log_level)
    }
}
