//! In-memory message bus with dead-letter topics and failure injection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pos_events::{dlt_topic, BusError, BusRecord, DltConsumer, MessageBus};

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, Vec<BusRecord>>,
    /// After this many more publishes, every publish fails (until cleared).
    fail_after: Option<usize>,
    publishes: usize,
}

/// Cloneable handle over shared bus state.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records currently on a topic.
    pub fn records(&self, topic: &str) -> Vec<BusRecord> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Seed a dead-letter topic directly, as the production driver would
    /// after terminal delivery failure.
    pub fn seed_dlt(&self, original_topic: &str, records: Vec<BusRecord>) {
        let mut g = self.lock();
        g.topics
            .entry(dlt_topic(original_topic))
            .or_default()
            .extend(records);
    }

    /// Let the next `n` publishes succeed, then fail all further ones.
    pub fn fail_publish_after(&self, n: usize) {
        let mut g = self.lock();
        g.publishes = 0;
        g.fail_after = Some(n);
    }

    pub fn clear_failure(&self) {
        self.lock().fail_after = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().expect("memory bus lock poisoned")
    }
}

#[async_trait::async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, record: BusRecord) -> Result<(), BusError> {
        let mut g = self.lock();
        if let Some(limit) = g.fail_after {
            if g.publishes >= limit {
                return Err(BusError::Unavailable("injected publish failure".to_string()));
            }
        }
        g.publishes += 1;
        g.topics.entry(record.topic.clone()).or_default().push(record);
        Ok(())
    }

    fn dlt_consumer(&self, original_topic: &str) -> Box<dyn DltConsumer> {
        Box::new(MemDltConsumer {
            inner: Arc::clone(&self.inner),
            topic: dlt_topic(original_topic),
            cursor: 0,
            uncommitted: 0,
        })
    }
}

struct MemDltConsumer {
    inner: Arc<Mutex<BusInner>>,
    topic: String,
    /// Read position within the topic vec.
    cursor: usize,
    /// Records delivered since the last commit.
    uncommitted: usize,
}

#[async_trait::async_trait]
impl DltConsumer for MemDltConsumer {
    async fn poll(&mut self, max: usize) -> Result<Vec<BusRecord>, BusError> {
        let g = self.inner.lock().expect("memory bus lock poisoned");
        let records = g.topics.get(&self.topic).cloned().unwrap_or_default();
        let batch: Vec<BusRecord> = records
            .iter()
            .skip(self.cursor)
            .take(max)
            .cloned()
            .collect();
        self.cursor += batch.len();
        self.uncommitted += batch.len();
        Ok(batch)
    }

    async fn commit(&mut self) -> Result<(), BusError> {
        let mut g = self.inner.lock().expect("memory bus lock poisoned");
        if let Some(records) = g.topics.get_mut(&self.topic) {
            let n = self.uncommitted.min(records.len());
            records.drain(0..n);
        }
        self.cursor -= self.uncommitted;
        self.uncommitted = 0;
        Ok(())
    }
}
