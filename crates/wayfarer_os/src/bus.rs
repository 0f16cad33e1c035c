#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use wayfarer_kernel_contracts::metric::MetricRecord;
use wayfarer_kernel_contracts::policy::PolicyRecord;

use crate::subscription::Subscription;

pub const TOPIC_METRICS: &str = "metrics";
pub const TOPIC_POLICY_UPDATED: &str = "policy.updated";

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Metric(MetricRecord),
    /// Carries the full new policy row.
    PolicyUpdated(PolicyRecord),
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync + 'static>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusTopics {
    next_id: u64,
    topics: BTreeMap<String, Vec<Subscriber>>,
}

/// In-process fan-out. Nothing is retained after delivery.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusTopics>>,
}

fn lock_topics(inner: &Mutex<BusTopics>) -> MutexGuard<'_, BusTopics> {
    // handlers run outside the lock, so a poisoned guard still holds a consistent table
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: &str,
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut topics = lock_topics(&self.inner);
            let id = topics.next_id;
            topics.next_id += 1;
            topics
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    handler: Arc::new(handler),
                });
            id
        };
        let weak: Weak<Mutex<BusTopics>> = Arc::downgrade(&self.inner);
        let topic = topic.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut topics = lock_topics(&inner);
                if let Some(subscribers) = topics.topics.get_mut(&topic) {
                    subscribers.retain(|sub| sub.id != id);
                }
            }
        })
    }

    /// Delivers synchronously in subscription order; returns how many handlers ran.
    pub fn publish(&self, topic: &str, event: &BusEvent) -> usize {
        let handlers = {
            let topics = lock_topics(&self.inner);
            match topics.topics.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|sub| sub.handler.clone())
                    .collect::<Vec<_>>(),
                None => Vec::new(),
            }
        };
        for handler in &handlers {
            handler(event);
        }
        tracing::trace!(topic, delivered = handlers.len(), "bus publish");
        handlers.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock_topics(&self.inner)
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfarer_kernel_contracts::agent::AgentId;
    use wayfarer_kernel_contracts::metric::{MetricId, MetricInput};
    use wayfarer_kernel_contracts::UnixTimeMs;

    fn metric_event(value: f64) -> BusEvent {
        let input = MetricInput::v1(
            AgentId::new("bot_a").unwrap(),
            UnixTimeMs(1),
            "movement.reward".to_string(),
            value,
            json!({}),
        )
        .unwrap();
        BusEvent::Metric(MetricRecord::from_input(MetricId(1), input))
    }

    #[test]
    fn at_bus_01_fan_out_in_order_then_unsubscribe() {
        let bus = MessageBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first_seen = seen.clone();
        let mut first = bus.subscribe(TOPIC_METRICS, move |_| {
            first_seen.lock().unwrap().push("first");
        });
        let second_seen = seen.clone();
        let _second = bus.subscribe(TOPIC_METRICS, move |_| {
            second_seen.lock().unwrap().push("second");
        });

        assert_eq!(bus.publish(TOPIC_METRICS, &metric_event(0.5)), 2);
        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(bus.publish(TOPIC_METRICS, &metric_event(0.6)), 1);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first", "second", "second"]
        );
    }

    #[test]
    fn at_bus_02_topics_are_isolated() {
        let bus = MessageBus::new();
        let hits = Arc::new(Mutex::new(0));
        let counted = hits.clone();
        let _sub = bus.subscribe(TOPIC_POLICY_UPDATED, move |_| {
            *counted.lock().unwrap() += 1;
        });
        assert_eq!(bus.publish(TOPIC_METRICS, &metric_event(0.1)), 0);
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn at_bus_03_dropped_subscription_detaches() {
        let bus = MessageBus::new();
        {
            let _sub = bus.subscribe(TOPIC_METRICS, |_| {});
            assert_eq!(bus.subscriber_count(TOPIC_METRICS), 1);
        }
        assert_eq!(bus.subscriber_count(TOPIC_METRICS), 0);
    }

    #[test]
    fn at_bus_04_handler_may_subscribe_during_delivery() {
        let bus = MessageBus::new();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let bus_for_handler = bus.clone();
        let nested_for_handler = nested.clone();
        let _sub = bus.subscribe(TOPIC_METRICS, move |_| {
            let sub = bus_for_handler.subscribe(TOPIC_METRICS, |_| {});
            nested_for_handler.lock().unwrap().push(sub);
        });
        assert_eq!(bus.publish(TOPIC_METRICS, &metric_event(0.1)), 1);
        assert_eq!(bus.subscriber_count(TOPIC_METRICS), 2);
    }
}
