//! Fan-out: wrap events as `{rule, log}` envelopes and publish them to a topic in
//! transport-sized batches.
//!
//! Delivery is at-least-once. A send is retried a bounded number of times; if it
//! still fails, publishing stops and the split between sent and unsent events is
//! reported. Earlier batches are not rolled back.

mod topic;

use crate::config::DispatchConfig;
use crate::error::{Fault, TransportError};
use crate::event::CanonicalEvent;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use topic::{InMemoryTopic, MessageBatch, Subscription, Transport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub rule: String,
    pub log: CanonicalEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// Nothing to send
    Skipped,
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub status: PublishStatus,
    /// Messages the transport accepted
    pub accepted: usize,
    pub not_sent: usize,
    /// Successful batch sends
    pub sends: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishResult {
    fn skipped() -> Self {
        Self {
            status: PublishStatus::Skipped,
            accepted: 0,
            not_sent: 0,
            sends: 0,
            error: None,
        }
    }

    /// The partial-success fault, when some but not all messages went out.
    pub fn fault(&self) -> Option<Fault> {
        (self.status == PublishStatus::Partial).then(|| Fault::PublishPartial {
            succeeded: self.accepted,
            not_sent: self.not_sent,
        })
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    max_attempts: u32,
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &DispatchConfig) -> Self {
        Self {
            transport,
            chunk_size: config.chunk_size.max(1),
            max_attempts: config.max_send_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn topic(&self) -> &str {
        self.transport.topic()
    }

    pub fn publish(&self, events: &[CanonicalEvent], rule: &str) -> PublishResult {
        let messages = events
            .iter()
            .map(|log| {
                serde_json::to_vec(&Envelope {
                    rule: rule.to_string(),
                    log: log.clone(),
                })
                .map_err(TransportError::from)
            })
            .collect();
        let result = self.publish_encoded(messages);
        info!(
            topic = %self.topic(),
            rule,
            accepted = result.accepted,
            not_sent = result.not_sent,
            status = ?result.status,
            "published batch"
        );
        result
    }

    /// Publish arbitrary serializable messages (alerts, for instance).
    pub fn publish_items<T: Serialize>(&self, items: &[T]) -> PublishResult {
        self.publish_encoded(
            items
                .iter()
                .map(|item| serde_json::to_vec(item).map_err(TransportError::from))
                .collect(),
        )
    }

    fn publish_encoded(&self, messages: Vec<Result<Vec<u8>, TransportError>>) -> PublishResult {
        let total = messages.len();
        if total == 0 {
            return PublishResult::skipped();
        }

        let mut accepted = 0;
        let mut sends = 0;
        let mut error = None;

        'chunks: for chunk in messages.chunks(self.chunk_size) {
            let mut batch = self.transport.create_batch();
            for encoded in chunk {
                let message = match encoded {
                    Ok(m) => m.clone(),
                    Err(e) => {
                        warn!(error = %e, "dropping message that failed to encode");
                        continue;
                    }
                };
                let Err(message) = batch.try_add(message) else {
                    continue;
                };
                if batch.is_empty() {
                    warn!(error = %oversized(&message, &batch), "dropping message");
                    continue;
                }
                match self.send_with_retry(&batch) {
                    Ok(()) => {
                        accepted += batch.len();
                        sends += 1;
                    }
                    Err(e) => {
                        error = Some(e.to_string());
                        break 'chunks;
                    }
                }
                batch = self.transport.create_batch();
                if let Err(message) = batch.try_add(message) {
                    warn!(error = %oversized(&message, &batch), "dropping message");
                }
            }
            if batch.is_empty() {
                continue;
            }
            match self.send_with_retry(&batch) {
                Ok(()) => {
                    accepted += batch.len();
                    sends += 1;
                }
                Err(e) => {
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let not_sent = total - accepted;
        let status = if not_sent == 0 {
            PublishStatus::Success
        } else if accepted == 0 {
            PublishStatus::Failed
        } else {
            PublishStatus::Partial
        };
        let result = PublishResult {
            status,
            accepted,
            not_sent,
            sends,
            error,
        };
        if let Some(fault) = result.fault() {
            warn!(topic = %self.topic(), error = %fault, "publish incomplete");
        }
        result
    }

    fn send_with_retry(&self, batch: &MessageBatch) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match self.transport.send_batch(batch) {
                Ok(()) => {
                    debug!(topic = %self.topic(), messages = batch.len(), attempt, "batch sent");
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(topic = %self.topic(), attempt, error = %e, "batch send failed, retrying");
                    std::thread::sleep(self.retry_delay(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff * attempt;
        let jitter_ms = self.backoff.as_millis() as u64 / 4;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

fn oversized(message: &[u8], batch: &MessageBatch) -> TransportError {
    TransportError::MessageTooLarge {
        size: message.len(),
        capacity: batch.max_bytes(),
    }
}
