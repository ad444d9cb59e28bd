//! Publish/subscribe event bus for cross-component notification.
//!
//! The bus is an explicit service passed by reference (`Arc`) to the
//! components that need it, with lifecycle tied to application start and
//! stop. There is no ambient global state.
//!
//! Subscribers of a topic are invoked in registration order. Payloads are
//! [`serde_json::Value`], matching the wire-level data the rest of the
//! crate already speaks.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use console_link::EventBus;
//! use serde_json::json;
//!
//! let bus = Arc::new(EventBus::new());
//! let id = bus.subscribe("terminal", |payload| {
//!     println!("terminal line: {payload}");
//! });
//!
//! bus.publish("terminal", &json!("connection established"));
//! bus.unsubscribe(id);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

// ============================================================================
// Types
// ============================================================================

/// Subscriber callback type.
type Subscriber = Arc<dyn Fn(&Value) + Send + Sync>;

/// Topic registry: subscribers kept per topic in registration order.
type TopicMap = FxHashMap<String, Vec<(SubscriptionId, Subscriber)>>;

// ============================================================================
// SubscriptionId
// ============================================================================

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Topic-keyed publish/subscribe service.
///
/// Thread-safe; subscribers are invoked outside the registry lock so a
/// subscriber may subscribe or unsubscribe from within its own callback.
#[derive(Default)]
pub struct EventBus {
    /// Subscribers by topic.
    topics: RwLock<TopicMap>,
    /// Next subscription id.
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for a topic.
    ///
    /// Subscribers of the same topic are invoked in registration order.
    pub fn subscribe<F>(&self, topic: impl Into<String>, subscriber: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut topics = self.topics.write();
        topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(subscriber)));

        trace!(%id, topic = %topic, "subscriber registered");
        id
    }

    /// Removes a subscription.
    ///
    /// Returns `true` if the subscription existed. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut removed = false;

        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });

        if removed {
            trace!(%id, "subscriber removed");
        }
        removed
    }

    /// Publishes a payload to every current subscriber of a topic.
    ///
    /// Returns the number of subscribers invoked.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        // snapshot under the read lock, invoke outside it
        let subscribers: Vec<Subscriber> = {
            let topics = self.topics.read();
            topics
                .get(topic)
                .map(|subs| subs.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default()
        };

        for subscriber in &subscribers {
            subscriber(payload);
        }

        trace!(topic, delivered = subscribers.len(), "event published");
        subscribers.len()
    }

    /// Returns the number of subscribers currently registered for a topic.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.read().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
