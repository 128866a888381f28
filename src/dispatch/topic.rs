//! Topic transport seam and an in-process topic with named subscriptions.

use crate::error::TransportError;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Messages queued for one send. Capacity is bounded by message count and bytes.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    max_messages: usize,
    max_bytes: usize,
    size_bytes: usize,
    messages: Vec<Vec<u8>>,
}

impl MessageBatch {
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_bytes,
            size_bytes: 0,
            messages: Vec::new(),
        }
    }

    /// Hands the message back when it would push the batch past either limit.
    pub fn try_add(&mut self, message: Vec<u8>) -> Result<(), Vec<u8>> {
        if self.messages.len() >= self.max_messages
            || self.size_bytes + message.len() > self.max_bytes
        {
            return Err(message);
        }
        self.size_bytes += message.len();
        self.messages.push(message);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }
}

pub trait Transport: Send + Sync {
    fn topic(&self) -> &str;
    /// Empty batch sized to the transport's limits.
    fn create_batch(&self) -> MessageBatch;
    /// All-or-nothing: on error no message of the batch was accepted.
    fn send_batch(&self, batch: &MessageBatch) -> Result<(), TransportError>;
}

/// One consumer's queue on a topic.
pub struct Subscription {
    name: String,
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl Subscription {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Up to `max` messages, oldest first.
    pub fn receive(&self, max: usize) -> Vec<Vec<u8>> {
        let Ok(mut q) = self.queue.lock() else {
            return Vec::new();
        };
        let n = max.min(q.len());
        q.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_all(&self, messages: &[Vec<u8>]) -> Result<(), TransportError> {
        let mut q = self.queue.lock().map_err(|_| TransportError::Poisoned)?;
        q.extend(messages.iter().cloned());
        Ok(())
    }
}

/// Every sent batch is copied to every subscription.
pub struct InMemoryTopic {
    name: String,
    max_messages: usize,
    max_bytes: usize,
    subscriptions: RwLock<BTreeMap<String, Arc<Subscription>>>,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>, max_messages: usize, max_bytes: usize) -> Self {
        Self {
            name: name.into(),
            max_messages,
            max_bytes,
            subscriptions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get or create the named subscription. Messages sent before it existed are not replayed.
    pub fn subscribe(&self, name: &str) -> Arc<Subscription> {
        if let Some(existing) = self.subscription(name) {
            return existing;
        }
        let mut subs = match self.subscriptions.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.entry(name.to_string())
            .or_insert_with(|| Arc::new(Subscription::new(name)))
            .clone()
    }

    pub fn subscription(&self, name: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.read().ok()?.get(name).cloned()
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Transport for InMemoryTopic {
    fn topic(&self) -> &str {
        &self.name
    }

    fn create_batch(&self) -> MessageBatch {
        MessageBatch::new(self.max_messages, self.max_bytes)
    }

    fn send_batch(&self, batch: &MessageBatch) -> Result<(), TransportError> {
        let subs = self.subscriptions.read().map_err(|_| TransportError::Poisoned)?;
        for sub in subs.values() {
            sub.push_all(batch.messages())?;
        }
        Ok(())
    }
}
