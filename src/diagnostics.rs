//! # Diagnostics
//!
//! Explicit metrics port handed to the producer and the consumption path.
//! [`PorterMetrics`] keeps per-topic atomic counters that tests and health
//! endpoints can read, and mirrors every event into OpenTelemetry
//! instruments from the global meter provider.

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::naming::TopicId;

static PORTER_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    PORTER_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("porter"))
}

/// Metrics sink for message lifecycle events
pub trait Diagnostics: Send + Sync + 'static {
    fn record_retrieved(&self, topic: &TopicId, count: usize);
    fn record_produced(&self, topic: &TopicId);
    fn record_consumed(&self, topic: &TopicId, elapsed: Duration);
    fn record_ignored(&self, topic: &TopicId, elapsed: Duration);
    fn record_failed(&self, topic: &TopicId, elapsed: Duration);
}

/// Point-in-time copy of one topic's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub retrieved: u64,
    pub consumed: u64,
    pub ignored: u64,
    pub produced: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct TopicCounters {
    retrieved: AtomicU64,
    consumed: AtomicU64,
    ignored: AtomicU64,
    produced: AtomicU64,
    failed: AtomicU64,
}

struct Instruments {
    retrieved: Counter<u64>,
    consumed: Counter<u64>,
    ignored: Counter<u64>,
    produced: Counter<u64>,
    failed: Counter<u64>,
    consume_duration: Histogram<f64>,
}

impl Instruments {
    fn new() -> Self {
        let counter = |name: &'static str, description: &'static str| {
            meter().u64_counter(name).with_description(description).build()
        };
        Self {
            retrieved: counter("retrieved_messages", "Messages received from queues"),
            consumed: counter("consumed_messages", "Messages handled successfully"),
            ignored: counter("ignored_messages", "Messages ignored by consumers"),
            produced: counter("produced_messages", "Messages published to topics"),
            failed: counter("failed_messages", "Messages whose consumer failed"),
            consume_duration: meter()
                .f64_histogram("message_consume_duration")
                .with_description("Consumer execution time in milliseconds")
                .with_unit("ms")
                .build(),
        }
    }
}

impl std::fmt::Debug for Instruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruments").finish_non_exhaustive()
    }
}

/// Default [`Diagnostics`] implementation
#[derive(Debug, Clone)]
pub struct PorterMetrics {
    topics: Arc<DashMap<String, Arc<TopicCounters>>>,
    instruments: Arc<Instruments>,
}

impl Default for PorterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PorterMetrics {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            instruments: Arc::new(Instruments::new()),
        }
    }

    /// Counters for a fan-out topic name, zero when nothing was recorded
    pub fn snapshot(&self, topic_name: &str) -> MetricsSnapshot {
        self.topics
            .get(topic_name)
            .map(|c| MetricsSnapshot {
                retrieved: c.retrieved.load(Ordering::Relaxed),
                consumed: c.consumed.load(Ordering::Relaxed),
                ignored: c.ignored.load(Ordering::Relaxed),
                produced: c.produced.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    fn counters(&self, topic: &TopicId) -> Arc<TopicCounters> {
        self.topics
            .entry(topic.topic_name().to_string())
            .or_default()
            .clone()
    }

    fn attributes(topic: &TopicId) -> [KeyValue; 2] {
        [
            KeyValue::new("topic", topic.topic_name().to_string()),
            KeyValue::new("queue", topic.queue_name().to_string()),
        ]
    }

    fn record_duration(&self, topic: &TopicId, elapsed: Duration, outcome: &'static str) {
        let [topic_attr, queue_attr] = Self::attributes(topic);
        self.instruments.consume_duration.record(
            elapsed.as_secs_f64() * 1000.0,
            &[topic_attr, queue_attr, KeyValue::new("outcome", outcome)],
        );
    }
}

impl Diagnostics for PorterMetrics {
    fn record_retrieved(&self, topic: &TopicId, count: usize) {
        if count == 0 {
            return;
        }
        self.counters(topic)
            .retrieved
            .fetch_add(count as u64, Ordering::Relaxed);
        self.instruments
            .retrieved
            .add(count as u64, &Self::attributes(topic));
    }

    fn record_produced(&self, topic: &TopicId) {
        self.counters(topic).produced.fetch_add(1, Ordering::Relaxed);
        self.instruments.produced.add(1, &Self::attributes(topic));
    }

    fn record_consumed(&self, topic: &TopicId, elapsed: Duration) {
        self.counters(topic).consumed.fetch_add(1, Ordering::Relaxed);
        self.instruments.consumed.add(1, &Self::attributes(topic));
        self.record_duration(topic, elapsed, "consumed");
    }

    fn record_ignored(&self, topic: &TopicId, elapsed: Duration) {
        self.counters(topic).ignored.fetch_add(1, Ordering::Relaxed);
        self.instruments.ignored.add(1, &Self::attributes(topic));
        self.record_duration(topic, elapsed, "ignored");
    }

    fn record_failed(&self, topic: &TopicId, elapsed: Duration) {
        self.counters(topic).failed.fetch_add(1, Ordering::Relaxed);
        self.instruments.failed.add(1, &Self::attributes(topic));
        self.record_duration(topic, elapsed, "failed");
    }
}
