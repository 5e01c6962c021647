//! # relay-events
//!
//! In-process topic event bus over `tokio::sync::broadcast`. Producers
//! publish typed events to a named topic; consumers subscribe and receive a
//! live stream. Events are transient: nothing is persisted and a topic with
//! no subscribers simply drops what is published to it.

#![deny(unsafe_code)]

use std::collections::HashMap;

use parking_lot::RwLock;
use relay_core::EventId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

/// Topic the broadcast hub subscribes to at startup.
pub const BROADCAST_TOPIC: &str = "broadcast";

/// Per-topic channel buffer. Slow subscribers observe `Lagged` past this.
const TOPIC_BUFFER: usize = 256;

/// An event published on the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    /// Unique event id.
    pub id: EventId,
    /// Type tag chosen by the producer.
    pub event_type: String,
    /// Free-form payload.
    pub data: Map<String, Value>,
}

impl BusEvent {
    /// Build an event with a fresh id.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            data,
        }
    }
}

/// Errors from publishing.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The topic has no subscribers; the event went nowhere.
    #[error("no subscribers on topic {topic}")]
    NoSubscribers {
        /// The topic that was published to.
        topic: String,
    },
}

/// Topic registry. Topics are created lazily on first use.
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `topic`, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusEvent> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.subscribe();
        }

        let mut topics = self.topics.write();
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .subscribe()
    }

    /// Publish `event` to `topic`, returning the subscriber count reached.
    ///
    /// Publishing never blocks. An unknown or drained topic yields
    /// [`BusError::NoSubscribers`]; producers of best-effort notifications
    /// may ignore it.
    pub fn publish(&self, topic: &str, event: BusEvent) -> Result<usize, BusError> {
        let topics = self.topics.read();
        let Some(sender) = topics.get(topic) else {
            return Err(BusError::NoSubscribers {
                topic: topic.to_owned(),
            });
        };

        match sender.send(event) {
            Ok(count) => {
                debug!(topic, subscribers = count, "event published");
                Ok(count)
            }
            Err(_) => Err(BusError::NoSubscribers {
                topic: topic.to_owned(),
            }),
        }
    }

    /// Number of live subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}
