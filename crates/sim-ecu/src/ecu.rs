//! Simulated ECU and its request pipeline
//!
//! A request flows through:
//! 1. the busy gate (one request at a time per ECU)
//! 2. inbound interceptors, in insertion order
//! 3. matchers, in declaration order
//! 4. the pending-frame loop, when the handler asked for one
//! 5. outbound interceptors, for every payload sent

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn, Level};

use crate::busy::BusyGate;
use crate::config::EcuConfig;
use crate::context::{RequestContext, RequestOutcome, ResetScope, StagedResponse};
use crate::control::EntityControl;
use crate::error::{HandlerError, SinkError};
use crate::interceptor::{
    InboundInterceptor, Interceptor, InterceptorList, OutboundContext, OutboundInterceptor,
};
use crate::matcher::{MatcherList, RequestMatcher, RequestView};
use crate::nrc::{negative_response, nrc, NegativeResponseCode};
use crate::pending::{pending_frame, PendingSchedule};
use crate::sink::ResponseSink;
use crate::store::PropertyStore;
use crate::timer::TimerManager;

enum MatchOutcome {
    /// A matcher (or a failing handler) settled the response
    Handled,
    /// Matchers accepted the request but all of them continued
    AllContinued,
    NoMatch,
}

pub struct SimEcu {
    config: EcuConfig,
    matchers: RwLock<MatcherList>,
    inbound: Mutex<InterceptorList<InboundInterceptor>>,
    outbound: Mutex<InterceptorList<OutboundInterceptor>>,
    timers: TimerManager,
    busy: BusyGate,
    store: PropertyStore,
    entity: RwLock<Option<Weak<dyn EntityControl>>>,
}

impl SimEcu {
    pub fn new(config: EcuConfig) -> Arc<Self> {
        let matchers = MatcherList::new(config.use_prefix_index);
        Arc::new_cyclic(|me| Self {
            config,
            matchers: RwLock::new(matchers),
            inbound: Mutex::new(InterceptorList::default()),
            outbound: Mutex::new(InterceptorList::default()),
            timers: TimerManager::new(me.clone()),
            busy: BusyGate::new(),
            store: PropertyStore::new(),
            entity: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn physical_address(&self) -> u16 {
        self.config.physical_address
    }

    pub fn functional_address(&self) -> Option<u16> {
        self.config.functional_address
    }

    pub fn config(&self) -> &EcuConfig {
        &self.config
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    // ---- matchers ----

    pub fn add_matcher(&self, matcher: RequestMatcher) -> Arc<RequestMatcher> {
        self.matchers.write().push(matcher)
    }

    pub fn insert_matcher(&self, position: usize, matcher: RequestMatcher) -> Arc<RequestMatcher> {
        self.matchers.write().insert(position, matcher)
    }

    pub fn remove_matcher(&self, name: &str) -> bool {
        self.matchers.write().remove(name).is_some()
    }

    pub fn matcher(&self, name: &str) -> Option<Arc<RequestMatcher>> {
        self.matchers.read().get(name)
    }

    pub fn matcher_names(&self) -> Vec<String> {
        self.matchers.read().names()
    }

    // ---- interceptors ----

    pub fn add_inbound_interceptor(&self, interceptor: InboundInterceptor) {
        self.inbound.lock().insert(interceptor, Instant::now());
    }

    pub fn remove_inbound_interceptor(&self, name: &str) -> bool {
        self.inbound.lock().remove(name)
    }

    pub fn add_outbound_interceptor(&self, interceptor: OutboundInterceptor) {
        self.outbound.lock().insert(interceptor, Instant::now());
    }

    pub fn remove_outbound_interceptor(&self, name: &str) -> bool {
        self.outbound.lock().remove(name)
    }

    // ---- timers ----

    /// Run `handler` once after `delay`, replacing any timer of that name.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_or_replace_timer<F>(&self, name: &str, delay: Duration, handler: F)
    where
        F: FnOnce(&SimEcu) + Send + 'static,
    {
        debug!(ecu = %self.name(), timer = %name, delay_ms = delay.as_millis() as u64, "Timer armed");
        self.timers.add_or_replace(name, delay, Box::new(handler));
    }

    pub fn cancel_timer(&self, name: &str) -> bool {
        self.timers.cancel(name)
    }

    pub fn active_timers(&self) -> Vec<String> {
        self.timers.active()
    }

    // ---- entity link and reset ----

    /// Called by the hosting entity once it is wired up
    pub fn attach_entity(&self, entity: Weak<dyn EntityControl>) {
        *self.entity.write() = Some(entity);
    }

    /// Run a hard reset through the hosting entity and wait until the reset
    /// window is over. Called with the busy slot held, so the ECU answers
    /// nothing else until the entity is back.
    pub async fn hard_reset(&self, scope: ResetScope, duration: Duration) {
        let Some(entity) = self.attached_entity() else {
            warn!(ecu = %self.name(), "Hard reset requested but ECU is not attached to an entity");
            return;
        };
        info!(ecu = %self.name(), ?scope, duration_ms = duration.as_millis() as u64, "Hard reset");
        match scope {
            ResetScope::Entity => entity.hard_reset(duration).await,
            ResetScope::Ecu => entity.hard_reset_ecu(self.physical_address(), duration).await,
        }
    }

    fn attached_entity(&self) -> Option<Arc<dyn EntityControl>> {
        self.entity.read().as_ref().and_then(Weak::upgrade)
    }

    /// Forget runtime state: timers, interceptors and all stored properties.
    /// Matchers stay registered.
    pub fn reset(&self) {
        self.timers.cancel_all();
        self.inbound.lock().clear();
        self.outbound.lock().clear();
        self.store.clear();
        for matcher in self.matchers.read().iter() {
            matcher.store().clear();
        }
        info!(ecu = %self.name(), "ECU state reset");
    }

    // ---- request pipeline ----

    /// Handle one UDS request and send whatever it produces to `sink`
    pub async fn on_incoming_request(&self, request: &[u8], sink: &dyn ResponseSink) {
        if request.is_empty() {
            warn!(ecu = %self.name(), "Ignoring empty request");
            return;
        }
        debug!(ecu = %self.name(), request = %hex::encode_upper(request), "Request");

        match self.busy.try_acquire() {
            Some(_slot) => self.handle_request(request, sink).await,
            None => self.handle_busy_request(request, sink).await,
        }
    }

    async fn handle_request(&self, request: &[u8], sink: &dyn ResponseSink) {
        let mut ctx = RequestContext::new(self, request, false);
        if !self.run_inbound_interceptors(&mut ctx) {
            match self.run_matchers(&mut ctx) {
                MatchOutcome::Handled => {}
                MatchOutcome::AllContinued => {
                    debug!(ecu = %self.name(), "All matchers continued, no response");
                }
                MatchOutcome::NoMatch if self.config.nrc_on_no_match => {
                    debug!(ecu = %self.name(), "No matcher, answering requestOutOfRange");
                    ctx.nrc(nrc::REQUEST_OUT_OF_RANGE);
                }
                MatchOutcome::NoMatch => {
                    debug!(ecu = %self.name(), "No matcher, no response");
                }
            }
        }
        self.complete(ctx.into_outcome(), request, sink).await;
    }

    async fn handle_busy_request(&self, request: &[u8], sink: &dyn ResponseSink) {
        let mut ctx = RequestContext::new(self, request, true);
        if self.run_inbound_interceptors(&mut ctx) {
            return self.complete(ctx.into_outcome(), request, sink).await;
        }

        debug!(ecu = %self.name(), "Busy, rejecting request");
        let response = negative_response(request[0], self.config.busy_nrc);
        if let Err(err) = self.transmit(request, response, sink).await {
            debug!(ecu = %self.name(), error = %err, "Busy response not delivered");
        }
    }

    /// Returns true when an interceptor claimed the request
    fn run_inbound_interceptors(&self, ctx: &mut RequestContext<'_>) -> bool {
        let interceptors = self.inbound.lock().active(Instant::now());
        for interceptor in interceptors {
            if ctx.is_busy() && !interceptor.runs_while_busy() {
                continue;
            }
            ctx.enter(None);
            let handler = interceptor.handler();
            match guarded(|| handler(ctx)) {
                Ok(true) if ctx.take_continue() => ctx.no_response(),
                Ok(true) => {
                    trace!(ecu = %self.name(), interceptor = %interceptor.name(), "Request claimed");
                    return true;
                }
                Ok(false) => ctx.no_response(),
                Err(err) => {
                    self.stage_failure(ctx, interceptor.name(), &err);
                    return true;
                }
            }
        }
        false
    }

    fn run_matchers(&self, ctx: &mut RequestContext<'_>) -> MatchOutcome {
        let request = ctx.request();
        // Snapshot so handlers may add or remove matchers
        let candidates = self.matchers.read().candidates(request);
        let view = RequestView::new(request, self.config.regex_match_bytes);

        let mut matched = false;
        for matcher in candidates {
            if !matcher.matches(&view) {
                continue;
            }
            matched = true;
            log_match(matcher.log_level(), self.name(), matcher.name(), request);

            ctx.enter(Some(matcher.clone()));
            let handler = matcher.handler();
            match guarded(|| handler(ctx)) {
                Ok(()) if ctx.take_continue() => ctx.no_response(),
                Ok(()) => return MatchOutcome::Handled,
                Err(err) => {
                    self.stage_failure(ctx, matcher.name(), &err);
                    return MatchOutcome::Handled;
                }
            }
        }

        if matched {
            MatchOutcome::AllContinued
        } else {
            MatchOutcome::NoMatch
        }
    }

    fn stage_failure(&self, ctx: &mut RequestContext<'_>, source: &str, err: &HandlerError) {
        let code = failure_code(self.name(), source, err);
        ctx.nrc(code);
    }

    async fn complete(&self, outcome: RequestOutcome, request: &[u8], sink: &dyn ResponseSink) {
        let RequestOutcome { response, resets } = outcome;

        if let Some(staged) = response {
            if let Err(err) = self.deliver(request, staged, sink).await {
                debug!(ecu = %self.name(), error = %err, "Response not delivered");
            }
        }

        for (scope, duration) in resets {
            self.hard_reset(scope, duration).await;
        }
    }

    async fn deliver(
        &self,
        request: &[u8],
        staged: StagedResponse,
        sink: &dyn ResponseSink,
    ) -> Result<(), SinkError> {
        let mut on_complete = None;
        if let Some(pending) = staged.pending {
            self.send_pending(request, pending.pending_for, sink).await?;
            on_complete = pending.on_complete;
        }

        self.transmit(request, staged.payload, sink).await?;

        if let Some(callback) = on_complete {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
                error!(ecu = %self.name(), reason = %panic_message(&*panic), "Pending completion callback panicked");
            }
        }
        Ok(())
    }

    async fn send_pending(
        &self,
        request: &[u8],
        pending_for: Duration,
        sink: &dyn ResponseSink,
    ) -> Result<(), SinkError> {
        let schedule = PendingSchedule::new(pending_for, self.config.pending_interval);
        let frame = pending_frame(request[0]);
        while let Some(wait) = schedule.next_wait(Instant::now()) {
            self.transmit(request, frame.clone(), sink).await?;
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Run outbound interceptors, then hand the payload to the sink
    async fn transmit(
        &self,
        request: &[u8],
        response: Vec<u8>,
        sink: &dyn ResponseSink,
    ) -> Result<(), SinkError> {
        let Some(response) = self.run_outbound_interceptors(request, response) else {
            return Ok(());
        };
        debug!(ecu = %self.name(), response = %hex::encode_upper(&response), "Response");
        sink.send(response).await
    }

    /// `None` when an interceptor suppressed the payload
    fn run_outbound_interceptors(&self, request: &[u8], response: Vec<u8>) -> Option<Vec<u8>> {
        let interceptors = self.outbound.lock().active(Instant::now());
        if interceptors.is_empty() {
            return Some(response);
        }

        let mut ctx = OutboundContext::new(self, request, response);
        for interceptor in interceptors {
            let handler = interceptor.handler();
            let name = interceptor.name();
            match guarded(|| handler(&mut ctx)) {
                Ok(true) if ctx.take_continue() => {}
                Ok(true) => {
                    trace!(ecu = %self.name(), interceptor = %name, "Response suppressed");
                    return None;
                }
                Ok(false) => {
                    ctx.take_continue();
                }
                Err(err) => {
                    let code = failure_code(self.name(), name, &err);
                    return Some(negative_response(request[0], code));
                }
            }
        }
        Some(ctx.into_response())
    }
}

impl std::fmt::Debug for SimEcu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEcu")
            .field("name", &self.config.name)
            .field("physical_address", &format_args!("0x{:04X}", self.config.physical_address))
            .field("functional_address", &self.config.functional_address)
            .finish_non_exhaustive()
    }
}

/// Run a handler, turning a panic into a handler failure
fn guarded<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, HandlerError> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(HandlerError::Failed(panic_message(&*panic))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn failure_code(ecu: &str, source: &str, err: &HandlerError) -> u8 {
    match err {
        HandlerError::NegativeResponse(code) => {
            debug!(
                ecu = %ecu,
                handler = %source,
                nrc = %NegativeResponseCode::from(*code),
                "Handler answered with negative response"
            );
            *code
        }
        other => {
            error!(ecu = %ecu, handler = %source, error = %other, "Handler failed");
            nrc::GENERAL_PROGRAMMING_FAILURE
        }
    }
}

fn log_match(level: Level, ecu: &str, matcher: &str, request: &[u8]) {
    let request = hex::encode_upper(request);
    if level == Level::ERROR {
        error!(ecu = %ecu, matcher = %matcher, request = %request, "Matched");
    } else if level == Level::WARN {
        warn!(ecu = %ecu, matcher = %matcher, request = %request, "Matched");
    } else if level == Level::INFO {
        info!(ecu = %ecu, matcher = %matcher, request = %request, "Matched");
    } else if level == Level::DEBUG {
        debug!(ecu = %ecu, matcher = %matcher, request = %request, "Matched");
    } else {
        trace!(ecu = %ecu, matcher = %matcher, request = %request, "Matched");
    }
}
