use super::traits::{Bus, Message, MessageCallback, SubscriberId, TopicPublisher};
use crate::error::{EasyNodeError, EasyNodeResult};
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const LOG_TARGET: &str = "easynode::bus";

/// Lock-free counters for one advertised topic
#[derive(Debug, Default)]
pub struct AtomicTopicMetrics {
    pub messages_sent: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_dropped: AtomicU64,
}

impl AtomicTopicMetrics {
    pub fn snapshot(&self) -> TopicMetrics {
        TopicMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicMetrics {
    pub messages_sent: u64,
    /// Enqueued for a subscriber
    pub messages_delivered: u64,
    /// Rejected because a subscriber queue was full or the type tag did not match
    pub messages_dropped: u64,
}

struct TopicEntry {
    type_tag: String,
    latched: Option<Message>,
    subscribers: Vec<SubscriberId>,
    metrics: Arc<AtomicTopicMetrics>,
}

struct SubscriberEntry {
    topic: String,
    tx: Sender<Message>,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicEntry>,
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
}

impl BusState {
    fn topic_entry(&mut self, topic: &str, type_tag: &str) -> EasyNodeResult<&mut TopicEntry> {
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                type_tag: type_tag.to_string(),
                latched: None,
                subscribers: Vec::new(),
                metrics: Arc::new(AtomicTopicMetrics::default()),
            });
        if entry.type_tag != type_tag {
            return Err(EasyNodeError::communication(format!(
                "topic '{}' carries '{}', not '{}'",
                topic, entry.type_tag, type_tag
            )));
        }
        Ok(entry)
    }
}

/// In-process bus.
///
/// Every subscriber gets a bounded queue sized by its queue depth and a
/// dedicated delivery thread, so callbacks for one subscriber never overlap.
/// When a queue is full the newest message is dropped.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<TopicMetrics> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.metrics.snapshot())
    }

    fn spawn_delivery(
        topic: &str,
        rx: channel::Receiver<Message>,
        on_message: MessageCallback,
    ) -> EasyNodeResult<()> {
        let topic_name = topic.to_string();
        thread::Builder::new()
            .name(format!("easynode-bus{}", topic))
            .spawn(move || {
                for msg in rx.iter() {
                    match panic::catch_unwind(AssertUnwindSafe(|| on_message(msg))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::error!(
                                target: LOG_TARGET,
                                "callback on '{}' failed: {}",
                                topic_name,
                                e
                            )
                        }
                        Err(_) => {
                            log::error!(target: LOG_TARGET, "callback on '{}' panicked", topic_name)
                        }
                    }
                }
                log::debug!(target: LOG_TARGET, "delivery thread for '{}' finished", topic_name);
            })
            .map_err(|e| {
                EasyNodeError::communication(format!(
                    "failed to start delivery thread for '{}': {}",
                    topic, e
                ))
            })?;
        Ok(())
    }
}

impl Bus for LocalBus {
    fn subscribe(
        &self,
        topic: &str,
        type_tag: &str,
        queue_depth: usize,
        on_message: MessageCallback,
    ) -> EasyNodeResult<SubscriberId> {
        let (tx, rx) = channel::bounded(queue_depth.max(1));
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let mut state = self.state.lock();
            let entry = state.topic_entry(topic, type_tag)?;
            if let Some(latched) = &entry.latched {
                let _ = tx.try_send(latched.clone());
            }
            entry.subscribers.push(id);
            state.subscribers.insert(
                id,
                SubscriberEntry {
                    topic: topic.to_string(),
                    tx,
                },
            );
        }

        if let Err(e) = Self::spawn_delivery(topic, rx, on_message) {
            self.unsubscribe(id);
            return Err(e);
        }

        log::debug!(target: LOG_TARGET, "subscriber {:?} attached to '{}'", id, topic);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let mut state = self.state.lock();
        if let Some(sub) = state.subscribers.remove(&id) {
            if let Some(topic) = state.topics.get_mut(&sub.topic) {
                topic.subscribers.retain(|s| *s != id);
            }
            // dropping the sender ends the delivery thread once its queue drains
        }
    }

    fn publisher(
        &self,
        topic: &str,
        type_tag: &str,
        _queue_depth: usize,
        latch: bool,
    ) -> EasyNodeResult<Arc<dyn TopicPublisher>> {
        let metrics = {
            let mut state = self.state.lock();
            Arc::clone(&state.topic_entry(topic, type_tag)?.metrics)
        };
        Ok(Arc::new(LocalPublisher {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            type_tag: type_tag.to_string(),
            latch,
            metrics,
        }))
    }
}

struct LocalPublisher {
    state: Arc<Mutex<BusState>>,
    topic: String,
    type_tag: String,
    latch: bool,
    metrics: Arc<AtomicTopicMetrics>,
}

impl TopicPublisher for LocalPublisher {
    fn publish(&self, msg: Message) {
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        if msg.type_tag() != self.type_tag {
            self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                target: LOG_TARGET,
                "dropping '{}' message published on '{}' (expects '{}')",
                msg.type_tag(),
                self.topic,
                self.type_tag
            );
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.topics.get_mut(&self.topic) else {
            return;
        };
        if self.latch {
            entry.latched = Some(msg.clone());
        }
        for id in &entry.subscribers {
            let Some(sub) = state.subscribers.get(id) else {
                continue;
            };
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => {
                    self.metrics.messages_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
