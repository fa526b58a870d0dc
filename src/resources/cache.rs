//! Process-wide queue metadata cache with upsert semantics.

use dashmap::DashMap;
use std::sync::Arc;

use crate::messaging::QueueInfo;

/// Last known state of each queue, keyed by queue name
#[derive(Debug, Clone, Default)]
pub struct QueueCache {
    entries: Arc<DashMap<String, QueueInfo>>,
}

impl QueueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, queue_name: &str) -> Option<QueueInfo> {
        self.entries.get(queue_name).map(|entry| entry.clone())
    }

    /// Insert or replace the entry for `info.queue_name`
    pub fn upsert(&self, info: QueueInfo) {
        self.entries.insert(info.queue_name.clone(), info);
    }

    pub fn remove(&self, queue_name: &str) -> Option<QueueInfo> {
        self.entries.remove(queue_name).map(|(_, info)| info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info(visibility: u64) -> QueueInfo {
        QueueInfo {
            queue_name: "orders_my_topic".to_string(),
            queue_ref: "memory://queues/orders_my_topic".to_string(),
            visibility_timeout: Duration::from_secs(visibility),
        }
    }

    #[test]
    fn test_upsert_replaces() {
        let cache = QueueCache::new();
        cache.upsert(info(30));
        cache.upsert(info(60));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("orders_my_topic").map(|i| i.visibility_timeout),
            Some(Duration::from_secs(60))
        );
        assert!(cache.remove("orders_my_topic").is_some());
        assert!(cache.is_empty());
    }
}
