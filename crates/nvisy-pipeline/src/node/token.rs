//! Structural node identity.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};

/// Process-wide counter for nodes whose behaviour cannot be hashed.
static CONSTRUCTION_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Identity token of a node, fixed when the node is constructed.
///
/// Tokens are derived from a node's kind, its construction parameters and
/// the tokens of its upstream nodes, never from a resolved value. The
/// per-row cache is keyed by this token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0:016x}")]
#[display("{_0:016x}")]
#[serde(transparent)]
pub struct NodeToken(u64);

impl NodeToken {
    /// Starts deriving a token for a node of the given kind.
    #[inline]
    pub fn derive(kind: &'static str) -> TokenHasher {
        TokenHasher::new(kind)
    }

    /// Returns the raw token value.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Returns a fresh construction serial.
///
/// Nodes wrapping opaque functions mix a serial into their token so that two
/// separately constructed closures never share a cache entry.
pub fn next_serial() -> u64 {
    CONSTRUCTION_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Incremental builder for [`NodeToken`]s.
#[derive(Debug, Clone)]
#[must_use = "call `finish` to obtain the token"]
pub struct TokenHasher {
    hasher: DefaultHasher,
}

impl TokenHasher {
    /// Creates a hasher seeded with the node kind.
    pub fn new(kind: &'static str) -> Self {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        Self { hasher }
    }

    /// Mixes a construction parameter into the token.
    pub fn with<T: Hash + ?Sized>(mut self, part: &T) -> Self {
        part.hash(&mut self.hasher);
        self
    }

    /// Mixes an upstream node's token into the token.
    pub fn with_parent(self, parent: NodeToken) -> Self {
        self.with(&parent.0)
    }

    /// Mixes a fresh construction serial into the token.
    pub fn with_serial(self) -> Self {
        self.with(&next_serial())
    }

    /// Finalizes the token.
    pub fn finish(self) -> NodeToken {
        NodeToken(self.hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_parameters_same_token() {
        let parent = NodeToken::from(7_u64);
        let a = NodeToken::derive("take").with_parent(parent).with("a").finish();
        let b = NodeToken::derive("take").with_parent(parent).with("a").finish();

        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_keys_distinct_tokens() {
        let parent = NodeToken::from(7_u64);
        let a = NodeToken::derive("take").with_parent(parent).with("a").finish();
        let b = NodeToken::derive("take").with_parent(parent).with("b").finish();

        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_and_parent_participate() {
        let a = NodeToken::derive("take").with_parent(1_u64.into()).with("a").finish();
        let b = NodeToken::derive("take").with_parent(2_u64.into()).with("a").finish();
        let c = NodeToken::derive("chain").with_parent(1_u64.into()).with("a").finish();

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serials_separate_identical_parameters() {
        let a = NodeToken::derive("computed").with("now").with_serial().finish();
        let b = NodeToken::derive("computed").with("now").with_serial().finish();

        assert_ne!(a, b);
    }

    #[test]
    fn test_token_display_is_hex() {
        assert_eq!(NodeToken::from(255_u64).to_string(), "00000000000000ff");
    }
}
