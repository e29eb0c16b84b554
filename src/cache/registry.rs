//! Bidirectional dependency index.
//!
//! Tracks the relationship between dependency tokens and cache keys so a
//! token removal can find every entry that depends on it. The index holds
//! no lock of its own: the store mutates it under the same write guard as
//! the entries, so the two never disagree.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::deps::DependencyToken;

#[derive(Debug, Default)]
pub struct TokenIndex {
    /// Maps tokens to all cache keys that depend on them
    token_to_keys: HashMap<DependencyToken, HashSet<String>>,
    /// Maps cache keys to all tokens they depend on
    key_to_tokens: HashMap<String, BTreeSet<DependencyToken>>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache key with its dependency tokens, replacing whatever
    /// was registered for that key before.
    pub fn register(&mut self, key: &str, tokens: BTreeSet<DependencyToken>) {
        self.unregister(key);

        for token in &tokens {
            self.token_to_keys
                .entry(token.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tokens.insert(key.to_string(), tokens);
    }

    /// Remove a cache key and clean up token mappings.
    pub fn unregister(&mut self, key: &str) {
        if let Some(tokens) = self.key_to_tokens.remove(key) {
            for token in tokens {
                if let Some(keys) = self.token_to_keys.get_mut(&token) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.token_to_keys.remove(&token);
                    }
                }
            }
        }
    }

    /// All cache keys depending on `token`.
    pub fn keys_for_token(&self, token: &DependencyToken) -> HashSet<String> {
        self.token_to_keys.get(token).cloned().unwrap_or_default()
    }

    /// All tokens a cache key depends on.
    pub fn tokens_for_key(&self, key: &str) -> BTreeSet<DependencyToken> {
        self.key_to_tokens.get(key).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.token_to_keys.clear();
        self.key_to_tokens.clear();
    }

    /// Number of distinct tracked tokens.
    pub fn token_count(&self) -> usize {
        self.token_to_keys.len()
    }

    /// Number of tracked cache keys.
    pub fn key_count(&self) -> usize {
        self.key_to_tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::deps::TokenScheme;

    fn scheme() -> TokenScheme {
        TokenScheme::new("t")
    }

    #[test]
    fn register_and_lookup() {
        let mut index = TokenIndex::new();
        let token = scheme().class("widget");

        index.register("k1", BTreeSet::from([token.clone()]));

        assert!(index.keys_for_token(&token).contains("k1"));
        assert!(index.tokens_for_key("k1").contains(&token));
    }

    #[test]
    fn unregister_cleans_up_mappings() {
        let mut index = TokenIndex::new();
        index.register("k1", BTreeSet::from([scheme().class("widget")]));
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.token_count(), 1);

        index.unregister("k1");
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.token_count(), 0);
    }

    #[test]
    fn reregister_replaces_previous_tokens() {
        let mut index = TokenIndex::new();
        let old = scheme().class("widget");
        let new = scheme().class("gadget");

        index.register("k1", BTreeSet::from([old.clone()]));
        index.register("k1", BTreeSet::from([new.clone()]));

        assert!(index.keys_for_token(&old).is_empty());
        assert!(index.keys_for_token(&new).contains("k1"));
        assert_eq!(index.token_count(), 1);
    }

    #[test]
    fn multiple_keys_for_same_token() {
        let mut index = TokenIndex::new();
        let token = scheme().content();

        index.register("k1", BTreeSet::from([token.clone()]));
        index.register("k2", BTreeSet::from([token.clone()]));

        let keys = index.keys_for_token(&token);
        assert_eq!(keys.len(), 2);

        index.unregister("k1");
        assert_eq!(index.keys_for_token(&token), HashSet::from(["k2".to_string()]));
    }

    #[test]
    fn clear_removes_all_mappings() {
        let mut index = TokenIndex::new();
        index.register("k1", BTreeSet::from([scheme().metadata()]));
        index.clear();
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.token_count(), 0);
    }
}
