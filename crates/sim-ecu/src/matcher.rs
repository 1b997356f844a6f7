//! Ordered request matchers

use std::cell::OnceCell;
use std::sync::Arc;

use regex::Regex;
use tracing::Level;

use crate::context::RequestContext;
use crate::error::{HandlerError, MatcherError};
use crate::index::PrefixIndex;
use crate::store::PropertyStore;

/// Handler run when a matcher accepts a request
pub type RequestHandler =
    Arc<dyn Fn(&mut RequestContext<'_>) -> Result<(), HandlerError> + Send + Sync>;

/// What a matcher compares the request against
#[derive(Debug, Clone)]
pub enum RequestPattern {
    /// Byte-for-byte equality with the whole request
    Exact(Vec<u8>),
    /// Full match against the uppercase hex of the leading request bytes
    Regex(Regex),
}

impl RequestPattern {
    /// Compile a regex pattern anchored to the whole hex string
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern)).map(Self::Regex)
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

/// A request as seen by matchers, with the hex form computed on demand
pub struct RequestView<'a> {
    bytes: &'a [u8],
    hex_bytes: usize,
    hex: OnceCell<String>,
}

impl<'a> RequestView<'a> {
    pub fn new(bytes: &'a [u8], hex_bytes: usize) -> Self {
        Self {
            bytes,
            hex_bytes,
            hex: OnceCell::new(),
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Uppercase hex, no separators, of at most `hex_bytes` leading bytes
    pub fn hex(&self) -> &str {
        self.hex.get_or_init(|| {
            let len = self.bytes.len().min(self.hex_bytes);
            hex::encode_upper(&self.bytes[..len])
        })
    }
}

/// Named pattern plus handler, with its own property store
pub struct RequestMatcher {
    name: String,
    pattern: RequestPattern,
    handler: RequestHandler,
    log_level: Level,
    store: PropertyStore,
}

impl RequestMatcher {
    pub fn new<F>(name: impl Into<String>, pattern: RequestPattern, handler: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            pattern,
            handler: Arc::new(handler),
            log_level: Level::DEBUG,
            store: PropertyStore::new(),
        }
    }

    pub fn exact<F>(name: impl Into<String>, request: impl Into<Vec<u8>>, handler: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self::new(name, RequestPattern::Exact(request.into()), handler)
    }

    pub fn regex<F>(name: impl Into<String>, pattern: &str, handler: F) -> Result<Self, MatcherError>
    where
        F: Fn(&mut RequestContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        let pattern = RequestPattern::regex(pattern).map_err(|source| MatcherError::InvalidRegex {
            name: name.clone(),
            source,
        })?;
        Ok(Self::new(name, pattern, handler))
    }

    /// Level at which a match of this matcher is logged
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &RequestPattern {
        &self.pattern
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    pub(crate) fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn matches(&self, request: &RequestView<'_>) -> bool {
        match &self.pattern {
            RequestPattern::Exact(expected) => expected.as_slice() == request.bytes(),
            RequestPattern::Regex(regex) => regex.is_match(request.hex()),
        }
    }
}

impl std::fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMatcher")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Matchers in declaration order, optionally backed by a prefix index.
///
/// The index is rebuilt on every mutation, so lookups never observe a stale
/// view. Lookups return shared handles; callers drop the list lock before
/// running handlers.
#[derive(Debug, Clone, Default)]
pub struct MatcherList {
    matchers: Vec<Arc<RequestMatcher>>,
    index: Option<PrefixIndex>,
}

impl MatcherList {
    pub fn new(indexed: bool) -> Self {
        Self {
            matchers: Vec::new(),
            index: indexed.then(PrefixIndex::default),
        }
    }

    pub fn push(&mut self, matcher: RequestMatcher) -> Arc<RequestMatcher> {
        let matcher = Arc::new(matcher);
        self.matchers.push(matcher.clone());
        self.reindex();
        matcher
    }

    /// Insert at `position`, clamped to the end of the list
    pub fn insert(&mut self, position: usize, matcher: RequestMatcher) -> Arc<RequestMatcher> {
        let matcher = Arc::new(matcher);
        let position = position.min(self.matchers.len());
        self.matchers.insert(position, matcher.clone());
        self.reindex();
        matcher
    }

    /// Remove the first matcher with this name
    pub fn remove(&mut self, name: &str) -> Option<Arc<RequestMatcher>> {
        let position = self.matchers.iter().position(|m| m.name() == name)?;
        let removed = self.matchers.remove(position);
        self.reindex();
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RequestMatcher>> {
        self.matchers.iter().find(|m| m.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.matchers.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RequestMatcher>> {
        self.matchers.iter()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Matchers that may accept `request`, in declaration order.
    ///
    /// Without an index this is every matcher. With one, exact matchers
    /// whose prefix cannot equal the request are skipped.
    pub fn candidates(&self, request: &[u8]) -> Vec<Arc<RequestMatcher>> {
        match &self.index {
            Some(index) => index
                .candidate_positions(request)
                .into_iter()
                .filter_map(|pos| self.matchers.get(pos).cloned())
                .collect(),
            None => self.matchers.clone(),
        }
    }

    fn reindex(&mut self) {
        if self.index.is_some() {
            self.index = Some(PrefixIndex::build(&self.matchers));
        }
    }
}
