//! Named inbound and outbound interceptors with optional expiry

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::RequestContext;
use crate::ecu::SimEcu;
use crate::error::HandlerError;

/// Returns `Ok(true)` to claim the request
pub type InboundHandler =
    Arc<dyn Fn(&mut RequestContext<'_>) -> Result<bool, HandlerError> + Send + Sync>;

/// Returns `Ok(true)` to claim the response, which suppresses it
pub type OutboundHandler =
    Arc<dyn Fn(&mut OutboundContext<'_>) -> Result<bool, HandlerError> + Send + Sync>;

/// Runs before the matchers, and optionally while the ECU is busy
#[derive(Clone)]
pub struct InboundInterceptor {
    name: String,
    handler: InboundHandler,
    lifetime: Option<Duration>,
    expires_at: Option<Instant>,
    also_while_busy: bool,
}

impl InboundInterceptor {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            lifetime: None,
            expires_at: None,
            also_while_busy: false,
        }
    }

    /// Drop the interceptor this long after it is added
    pub fn expires_after(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn also_while_busy(mut self, value: bool) -> Self {
        self.also_while_busy = value;
        self
    }

    pub fn runs_while_busy(&self) -> bool {
        self.also_while_busy
    }

    pub(crate) fn handler(&self) -> &InboundHandler {
        &self.handler
    }
}

/// Sees every outgoing response, pending frames included
#[derive(Clone)]
pub struct OutboundInterceptor {
    name: String,
    handler: OutboundHandler,
    lifetime: Option<Duration>,
    expires_at: Option<Instant>,
}

impl OutboundInterceptor {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut OutboundContext<'_>) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            lifetime: None,
            expires_at: None,
        }
    }

    pub fn expires_after(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub(crate) fn handler(&self) -> &OutboundHandler {
        &self.handler
    }
}

/// Common view the interceptor list needs
pub trait Interceptor: Clone {
    fn name(&self) -> &str;
    fn lifetime(&self) -> Option<Duration>;
    fn expires_at(&self) -> Option<Instant>;
    fn set_expires_at(&mut self, at: Option<Instant>);
}

macro_rules! impl_interceptor {
    ($ty:ty) => {
        impl Interceptor for $ty {
            fn name(&self) -> &str {
                &self.name
            }
            fn lifetime(&self) -> Option<Duration> {
                self.lifetime
            }
            fn expires_at(&self) -> Option<Instant> {
                self.expires_at
            }
            fn set_expires_at(&mut self, at: Option<Instant>) {
                self.expires_at = at;
            }
        }
    };
}

impl_interceptor!(InboundInterceptor);
impl_interceptor!(OutboundInterceptor);

/// Insertion-ordered, keyed by name. Replacing an entry keeps its position.
#[derive(Clone)]
pub struct InterceptorList<T> {
    entries: Vec<T>,
}

impl<T> Default for InterceptorList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Interceptor> InterceptorList<T> {
    /// Add or replace; the expiry clock starts now
    pub fn insert(&mut self, mut interceptor: T, now: Instant) {
        interceptor.set_expires_at(interceptor.lifetime().map(|l| now + l));
        match self
            .entries
            .iter_mut()
            .find(|e| e.name() == interceptor.name())
        {
            Some(existing) => *existing = interceptor,
            None => self.entries.push(interceptor),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name() != name);
        self.entries.len() != before
    }

    /// Prune expired entries and snapshot the rest in order
    pub fn active(&mut self, now: Instant) -> Vec<T> {
        self.entries
            .retain(|e| e.expires_at().map_or(true, |at| now < at));
        self.entries.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handed to outbound interceptors for each transmitted payload
pub struct OutboundContext<'a> {
    ecu: &'a SimEcu,
    request: &'a [u8],
    response: Vec<u8>,
    continue_matching: bool,
}

impl<'a> OutboundContext<'a> {
    pub(crate) fn new(ecu: &'a SimEcu, request: &'a [u8], response: Vec<u8>) -> Self {
        Self {
            ecu,
            request,
            response,
            continue_matching: false,
        }
    }

    pub fn ecu(&self) -> &'a SimEcu {
        self.ecu
    }

    pub fn request(&self) -> &'a [u8] {
        self.request
    }

    pub fn response(&self) -> &[u8] {
        &self.response
    }

    /// Replace the payload that will be sent
    pub fn set_response(&mut self, response: impl Into<Vec<u8>>) {
        self.response = response.into();
    }

    /// Let later interceptors see the response even after claiming it
    pub fn continue_matching(&mut self, value: bool) {
        self.continue_matching = value;
    }

    pub(crate) fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_matching)
    }

    pub(crate) fn into_response(self) -> Vec<u8> {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> InboundInterceptor {
        InboundInterceptor::new(name, |_| Ok(false))
    }

    #[test]
    fn test_replace_keeps_position() {
        let now = Instant::now();
        let mut list = InterceptorList::default();
        list.insert(named("a"), now);
        list.insert(named("b"), now);
        list.insert(named("c"), now);
        list.insert(named("a").also_while_busy(true), now);

        assert_eq!(list.names(), vec!["a", "b", "c"]);
        assert!(list.active(now)[0].runs_while_busy());
    }

    #[test]
    fn test_expired_entries_pruned() {
        let now = Instant::now();
        let mut list = InterceptorList::default();
        list.insert(named("short").expires_after(Duration::from_millis(100)), now);
        list.insert(named("forever"), now);

        assert_eq!(list.active(now + Duration::from_millis(99)).len(), 2);
        let active = list.active(now + Duration::from_millis(100));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name(), "forever");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove() {
        let now = Instant::now();
        let mut list = InterceptorList::default();
        list.insert(named("a"), now);
        assert!(list.remove("a"));
        assert!(!list.remove("a"));
        assert!(list.is_empty());
    }
}
