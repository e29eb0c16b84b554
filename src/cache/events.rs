//! Invalidation messages.
//!
//! Messages describe what changed (a category bitset, a target record and
//! related records) and may arrive from another process as JSON. Hosts that
//! receive them asynchronously can park them in an [`InvalidationQueue`] and
//! apply them in batches.

use std::collections::VecDeque;
use std::sync::Mutex;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::EntityRef;
use crate::error::MessageError;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

bitflags! {
    /// Coarse groups of cached data a message flushes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CacheCategory: u8 {
        /// Flush everything.
        const ALL = 0b0000_0001;
        /// Flush every entry depending on the metadata bucket.
        const METADATA = 0b0000_0010;
        /// Flush every entry depending on the content bucket.
        const CONTENT = 0b0000_0100;
    }
}

/// A structured invalidation notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Unique identifier for idempotency (UUIDv4).
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub timestamp: OffsetDateTime,
    #[serde(default = "CacheCategory::empty")]
    pub category: CacheCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<EntityRef>,
}

impl InvalidationMessage {
    pub fn new(category: CacheCategory) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            category,
            target: None,
            related: Vec::new(),
        }
    }

    /// A message naming one changed record and no category.
    pub fn for_record(target: EntityRef) -> Self {
        Self::new(CacheCategory::empty()).with_target(target)
    }

    pub fn with_target(mut self, target: EntityRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_related(mut self, related: impl IntoIterator<Item = EntityRef>) -> Self {
        self.related.extend(related);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(MessageError::Decode)
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(MessageError::Encode)
    }

    /// Records this message names, target first.
    pub fn records(&self) -> impl Iterator<Item = &EntityRef> {
        self.target.iter().chain(self.related.iter())
    }
}

/// In-memory FIFO of pending invalidation messages.
///
/// Contention is expected to be low, so a plain mutex guards the queue.
#[derive(Default)]
pub struct InvalidationQueue {
    queue: Mutex<VecDeque<InvalidationMessage>>,
}

impl InvalidationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, message: InvalidationMessage) {
        info!(
            message_id = %message.id,
            category = ?message.category,
            target = ?message.target,
            related = message.related.len(),
            "Invalidation message enqueued"
        );
        mutex_lock(&self.queue, SOURCE, "publish").push_back(message);
    }

    /// Decode and enqueue a JSON message.
    pub fn publish_json(&self, text: &str) -> Result<(), MessageError> {
        self.publish(InvalidationMessage::from_json(text)?);
        Ok(())
    }

    /// Drain up to `limit` messages in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<InvalidationMessage> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}
