// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Work queue between the HTTP edge and the enrichment worker.
//!
//! Pub/sub with at-least-once delivery: every subscription of a topic gets
//! its own copy of each message, and a delivery dropped without
//! [`Delivery::ack`] is handed out again after the redelivery delay.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uriteller_core::VisitEvent;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Subscription {subscription} on {topic} already has a consumer")]
    SubscriptionTaken { topic: String, subscription: String },

    #[error("Queue closed")]
    Closed,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish `event` to every subscription of `topic`.
    async fn publish(&self, topic: &str, event: VisitEvent) -> Result<(), QueueError>;

    /// Attach to `subscription` on `topic`, creating both if needed.
    async fn subscribe(&self, topic: &str, subscription: &str) -> Result<Subscription, QueueError>;
}

struct Message {
    event: VisitEvent,
    attempt: u32,
}

/// Stream of deliveries for one subscription.
pub struct Subscription {
    name: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    redeliver: mpsc::WeakUnboundedSender<Message>,
    delay: Duration,
}

impl Subscription {
    /// Next delivery, or `None` once the queue is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        let message = self.receiver.recv().await?;
        Some(Delivery {
            event: message.event,
            attempt: message.attempt,
            redeliver: self.redeliver.upgrade().map(|sender| Redelivery {
                sender,
                delay: self.delay,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Redelivery {
    sender: mpsc::UnboundedSender<Message>,
    delay: Duration,
}

/// One message handed to a consumer.
///
/// Dropping it without calling [`Delivery::ack`] is a nack.
pub struct Delivery {
    event: VisitEvent,
    attempt: u32,
    redeliver: Option<Redelivery>,
}

impl Delivery {
    pub fn event(&self) -> &VisitEvent {
        &self.event
    }

    /// 1 for the first delivery, incremented on each redelivery
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ack(mut self) {
        self.redeliver = None;
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(Redelivery { sender, delay }) = self.redeliver.take() else {
            return;
        };
        let message = Message {
            event: self.event.clone(),
            attempt: self.attempt + 1,
        };
        debug!(target = %message.event.target, attempt = message.attempt, "Scheduling redelivery");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(message);
                });
            }
            Err(_) => {
                let _ = sender.send(message);
            }
        }
    }
}

/// In-process [`WorkQueue`].
pub struct MemoryQueue {
    /// topic -> subscription -> sender
    topics: Mutex<HashMap<String, HashMap<String, mpsc::UnboundedSender<Message>>>>,
    redelivery_delay: Duration,
}

impl MemoryQueue {
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            redelivery_delay,
        }
    }

    /// Live subscriptions on `topic`.
    pub fn subscriptions(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.values().filter(|s| !s.is_closed()).count())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, topic: &str, event: VisitEvent) -> Result<(), QueueError> {
        let mut topics = self.topics.lock();
        let subscriptions = topics.entry(topic.to_string()).or_default();
        subscriptions.retain(|_, sender| !sender.is_closed());

        if subscriptions.is_empty() {
            warn!(topic, target = %event.target, "No subscriptions, dropping message");
            return Ok(());
        }
        for sender in subscriptions.values() {
            let _ = sender.send(Message {
                event: event.clone(),
                attempt: 1,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, subscription: &str) -> Result<Subscription, QueueError> {
        let mut topics = self.topics.lock();
        let subscriptions = topics.entry(topic.to_string()).or_default();

        if let Some(existing) = subscriptions.get(subscription) {
            if !existing.is_closed() {
                return Err(QueueError::SubscriptionTaken {
                    topic: topic.to_string(),
                    subscription: subscription.to_string(),
                });
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let redeliver = sender.downgrade();
        subscriptions.insert(subscription.to_string(), sender);
        debug!(topic, subscription, "Subscribed");

        Ok(Subscription {
            name: subscription.to_string(),
            receiver,
            redeliver,
            delay: self.redelivery_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(target: &str) -> VisitEvent {
        VisitEvent {
            target: target.into(),
            timestamp: 1,
            info: json!({"ip": "127.0.0.1"}),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscriptions_drops() {
        let queue = MemoryQueue::new(Duration::ZERO);
        queue.publish("topic", event("lost")).await.unwrap();

        let mut sub = queue.subscribe("topic", "sub").await.unwrap();
        queue.publish("topic", event("kept")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().event().target, "kept");
    }

    #[tokio::test]
    async fn test_every_subscription_gets_a_copy() {
        let queue = MemoryQueue::new(Duration::ZERO);
        let mut a = queue.subscribe("topic", "a").await.unwrap();
        let mut b = queue.subscribe("topic", "b").await.unwrap();

        queue.publish("topic", event("t")).await.unwrap();
        a.next().await.unwrap().ack();
        b.next().await.unwrap().ack();
        assert_eq!(queue.subscriptions("topic"), 2);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let queue = MemoryQueue::new(Duration::from_millis(5));
        let mut sub = queue.subscribe("topic", "sub").await.unwrap();
        queue.publish("topic", event("t")).await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.attempt(), 1);
        drop(first);

        let second = sub.next().await.unwrap();
        assert_eq!(second.event().target, "t");
        assert_eq!(second.attempt(), 2);
        second.ack();

        queue.publish("topic", event("next")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().event().target, "next");
    }

    #[tokio::test]
    async fn test_subscription_name_is_exclusive_while_alive() {
        let queue = MemoryQueue::new(Duration::ZERO);
        let sub = queue.subscribe("topic", "sub").await.unwrap();
        assert_eq!(sub.name(), "sub");

        assert!(matches!(
            queue.subscribe("topic", "sub").await,
            Err(QueueError::SubscriptionTaken { .. })
        ));

        drop(sub);
        assert!(queue.subscribe("topic", "sub").await.is_ok());
    }
}
