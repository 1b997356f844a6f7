//! Prefix index over exact matchers
//!
//! Exact matchers are bucketed by a key built from their first (up to) four
//! bytes together with that byte count. A request can only equal an exact
//! pattern that shares its key, so every other exact matcher is skipped.
//! Regex matchers are never indexed and stay candidates for every request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::matcher::{RequestMatcher, RequestPattern};

const PREFIX_BYTES: usize = 4;

/// Leading bytes packed big-endian into a `u32`, plus how many were used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixKey {
    len: u8,
    bits: u32,
}

impl PrefixKey {
    pub fn of(bytes: &[u8]) -> Self {
        let len = bytes.len().min(PREFIX_BYTES);
        let mut packed = [0u8; PREFIX_BYTES];
        packed[..len].copy_from_slice(&bytes[..len]);
        Self {
            len: len as u8,
            bits: u32::from_be_bytes(packed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrefixIndex {
    exact: HashMap<PrefixKey, Vec<usize>>,
    unindexed: Vec<usize>,
}

impl PrefixIndex {
    pub fn build(matchers: &[Arc<RequestMatcher>]) -> Self {
        let mut index = Self::default();
        for (position, matcher) in matchers.iter().enumerate() {
            match matcher.pattern() {
                RequestPattern::Exact(bytes) => index
                    .exact
                    .entry(PrefixKey::of(bytes))
                    .or_default()
                    .push(position),
                RequestPattern::Regex(_) => index.unindexed.push(position),
            }
        }
        index
    }

    /// Positions worth testing against `request`, ascending
    pub fn candidate_positions(&self, request: &[u8]) -> Vec<usize> {
        let exact = self
            .exact
            .get(&PrefixKey::of(request))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        merge_sorted(exact, &self.unindexed)
    }
}

fn merge_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            merged.push(a[i]);
            i += 1;
        } else {
            merged.push(b[j]);
            j += 1;
        }
    }
    merged.extend_from_slice(&a[i..]);
    merged.extend_from_slice(&b[j..]);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::error::HandlerError;

    fn noop(_: &mut RequestContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn test_key_includes_length() {
        assert_ne!(PrefixKey::of(&[0x10]), PrefixKey::of(&[0x10, 0x00]));
        assert_eq!(
            PrefixKey::of(&[0x22, 0xF1, 0x90, 0x00, 0x01]),
            PrefixKey::of(&[0x22, 0xF1, 0x90, 0x00, 0x02])
        );
        assert_eq!(PrefixKey::of(&[]), PrefixKey::of(&[]));
    }

    #[test]
    fn test_merge_sorted() {
        assert_eq!(merge_sorted(&[0, 3, 5], &[1, 4]), vec![0, 1, 3, 4, 5]);
        assert_eq!(merge_sorted(&[], &[2]), vec![2]);
    }

    #[test]
    fn test_candidates_keep_declaration_order() {
        let matchers = vec![
            Arc::new(RequestMatcher::regex("any", ".*", noop).unwrap()),
            Arc::new(RequestMatcher::exact("session", [0x10, 0x03], noop)),
            Arc::new(RequestMatcher::exact("reset", [0x11, 0x01], noop)),
            Arc::new(RequestMatcher::regex("rdbi", "22.*", noop).unwrap()),
            Arc::new(RequestMatcher::exact("session-again", [0x10, 0x03], noop)),
        ];
        let index = PrefixIndex::build(&matchers);
        assert_eq!(index.candidate_positions(&[0x10, 0x03]), vec![0, 1, 3, 4]);
        assert_eq!(index.candidate_positions(&[0x11, 0x01]), vec![0, 2, 3]);
        assert_eq!(index.candidate_positions(&[0x3E, 0x00]), vec![0, 3]);
    }
}
