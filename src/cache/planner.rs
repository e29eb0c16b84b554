//! Invalidation plan generation.
//!
//! Merges many invalidation messages into one set of token removals.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::deps::{DependencyToken, TokenScheme};
use super::events::{CacheCategory, InvalidationMessage};

/// Token removals for a batch of messages.
///
/// `clear_all` supersedes everything else: once any message asks for a
/// full flush, the individual tokens are dropped from the plan.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub clear_all: bool,
    pub tokens: BTreeSet<DependencyToken>,
    /// Distinct messages merged into this plan.
    pub message_count: usize,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ messages: {}, clear_all: {}, tokens: {} }}",
            self.message_count,
            self.clear_all,
            self.tokens.len(),
        )
    }
}

impl InvalidationPlan {
    /// Merge messages into a plan.
    ///
    /// - Deduplicates by message ID
    /// - `ALL` short-circuits to a full flush
    /// - `METADATA` / `CONTENT` map to their bucket tokens
    /// - every target and related record maps to its instance and class tokens
    pub fn from_messages<I>(messages: I, scheme: &TokenScheme) -> Self
    where
        I: IntoIterator<Item = InvalidationMessage>,
    {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for message in messages {
            if !seen_ids.insert(message.id) {
                continue;
            }
            plan.message_count += 1;

            if plan.clear_all {
                continue;
            }
            if message.category.contains(CacheCategory::ALL) {
                plan.clear_all = true;
                plan.tokens.clear();
                continue;
            }

            if message.category.contains(CacheCategory::METADATA) {
                plan.tokens.insert(scheme.metadata());
            }
            if message.category.contains(CacheCategory::CONTENT) {
                plan.tokens.insert(scheme.content());
            }
            for record in message.records() {
                plan.tokens.extend(scheme.entity(record));
            }
        }

        plan
    }

    /// Tokens to remove, in order. A full flush is the single "all" token.
    pub fn removals(&self, scheme: &TokenScheme) -> Vec<DependencyToken> {
        if self.clear_all {
            vec![scheme.all()]
        } else {
            self.tokens.iter().cloned().collect()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_all && self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityRef;

    fn scheme() -> TokenScheme {
        TokenScheme::new("t")
    }

    fn plan(messages: Vec<InvalidationMessage>) -> InvalidationPlan {
        InvalidationPlan::from_messages(messages, &scheme())
    }

    #[test]
    fn record_maps_to_instance_and_class() {
        let plan = plan(vec![InvalidationMessage::for_record(EntityRef::new("widget", "42"))]);

        assert_eq!(
            plan.tokens,
            BTreeSet::from([scheme().class("widget"), scheme().instance("widget", &"42".into())])
        );
        assert!(!plan.clear_all);
    }

    #[test]
    fn class_only_record_maps_to_class_token() {
        let plan = plan(vec![InvalidationMessage::for_record(EntityRef::class("widget"))]);
        assert_eq!(plan.tokens, BTreeSet::from([scheme().class("widget")]));
    }

    #[test]
    fn categories_map_to_buckets() {
        let plan = plan(vec![
            InvalidationMessage::new(CacheCategory::METADATA),
            InvalidationMessage::new(CacheCategory::CONTENT),
        ]);

        assert_eq!(
            plan.tokens,
            BTreeSet::from([scheme().metadata(), scheme().content()])
        );
    }

    #[test]
    fn related_records_are_included() {
        let message = InvalidationMessage::new(CacheCategory::METADATA)
            .with_target(EntityRef::new("account", "a1"))
            .with_related([EntityRef::new("contact", "c1"), EntityRef::new("contact", "c2")]);
        let plan = plan(vec![message]);

        assert!(plan.tokens.contains(&scheme().metadata()));
        assert!(plan.tokens.contains(&scheme().instance("account", &"a1".into())));
        assert!(plan.tokens.contains(&scheme().instance("contact", &"c2".into())));
        assert!(plan.tokens.contains(&scheme().class("contact")));
    }

    #[test]
    fn all_short_circuits() {
        let plan = plan(vec![
            InvalidationMessage::new(CacheCategory::METADATA),
            InvalidationMessage::new(CacheCategory::ALL | CacheCategory::CONTENT),
            InvalidationMessage::for_record(EntityRef::new("widget", "1")),
        ]);

        assert!(plan.clear_all);
        assert!(plan.tokens.is_empty());
        assert_eq!(plan.message_count, 3);
        assert_eq!(plan.removals(&scheme()), vec![scheme().all()]);
    }

    #[test]
    fn dedupe_by_message_id() {
        let message = InvalidationMessage::for_record(EntityRef::new("widget", "1"));
        let plan = plan(vec![message.clone(), message]);
        assert_eq!(plan.message_count, 1);
    }

    #[test]
    fn display_format() {
        let plan = InvalidationPlan::default();
        let display = format!("{}", plan);
        assert!(display.contains("InvalidationPlan"));
        assert!(display.contains("tokens: 0"));
    }

    #[test]
    fn is_empty() {
        assert!(InvalidationPlan::default().is_empty());
        assert!(plan(vec![InvalidationMessage::new(CacheCategory::empty())]).is_empty());
        assert!(!plan(vec![InvalidationMessage::new(CacheCategory::CONTENT)]).is_empty());
    }
}
