use super::traits::{Message, TopicPublisher};
use crate::core::log::LogSink;
use crate::error::{EasyNodeError, EasyNodeResult};
use log::Level;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A named output of the node, fixed after initialization
pub struct Publisher {
    name: String,
    topic: String,
    type_tag: String,
    queue_depth: usize,
    latch: bool,
    handle: Arc<dyn TopicPublisher>,
    published: AtomicU64,
}

impl Publisher {
    pub fn new(
        name: &str,
        topic: &str,
        type_tag: &str,
        queue_depth: usize,
        latch: bool,
        handle: Arc<dyn TopicPublisher>,
    ) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            type_tag: type_tag.to_string(),
            queue_depth,
            latch,
            handle,
            published: AtomicU64::new(0),
        }
    }

    /// Fire-and-forget
    pub fn publish(&self, msg: Message) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.handle.publish(msg);
    }

    /// Wrap `payload` under this publisher's type tag and publish it
    pub fn send<T: Any + Send + Sync>(&self, payload: T) {
        self.publish(Message::new(&self.type_tag, payload));
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn topic(&self) -> &str {
        &self.topic
    }
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
    pub fn latch(&self) -> bool {
        self.latch
    }
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("type_tag", &self.type_tag)
            .field("latch", &self.latch)
            .finish()
    }
}

/// Every publisher of a node, looked up by name
pub struct Publishers {
    node_name: String,
    by_name: BTreeMap<String, Publisher>,
    log: Arc<dyn LogSink>,
}

impl Publishers {
    pub fn new(node_name: &str, log: Arc<dyn LogSink>) -> Self {
        Self {
            node_name: node_name.to_string(),
            by_name: BTreeMap::new(),
            log,
        }
    }

    pub(crate) fn insert(&mut self, publisher: Publisher) {
        self.by_name.insert(publisher.name.clone(), publisher);
    }

    pub fn get(&self, name: &str) -> Option<&Publisher> {
        self.by_name.get(name)
    }

    /// Like [`Publishers::get`], failing with `UnknownPublisher`
    pub fn require(&self, name: &str) -> EasyNodeResult<&Publisher> {
        self.by_name
            .get(name)
            .ok_or_else(|| EasyNodeError::UnknownPublisher(name.to_string()))
    }

    /// Publish on the named output; an unknown name is logged, never returned
    pub fn publish(&self, name: &str, msg: Message) {
        match self.by_name.get(name) {
            Some(publisher) => publisher.publish(msg),
            None => self.log.emit(
                Level::Warn,
                &format!("{} | No publisher {:?} declared.", self.node_name, name),
            ),
        }
    }

    pub fn send<T: Any + Send + Sync>(&self, name: &str, payload: T) {
        match self.by_name.get(name) {
            Some(publisher) => publisher.send(payload),
            None => self.log.emit(
                Level::Warn,
                &format!("{} | No publisher {:?} declared.", self.node_name, name),
            ),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log::MemoryLogSink;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<Message>>,
    }

    impl TopicPublisher for RecordingPublisher {
        fn publish(&self, msg: Message) {
            self.sent.lock().push(msg);
        }
        fn topic(&self) -> &str {
            "/detector/segment_list"
        }
    }

    #[test]
    fn test_send_uses_type_tag() {
        let handle = Arc::new(RecordingPublisher::default());
        let publisher = Publisher::new(
            "segment_list",
            "/detector/segment_list",
            "SegmentList",
            1,
            false,
            handle.clone(),
        );
        publisher.send(vec![1u8, 2, 3]);

        let sent = handle.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_tag(), "SegmentList");
        assert_eq!(publisher.published_count(), 1);
    }

    #[test]
    fn test_unknown_publisher_is_logged() {
        let sink = MemoryLogSink::new();
        let publishers = Publishers::new("detector", Arc::new(sink.clone()));
        publishers.send("nowhere", 1u32);
        assert!(sink.contains(Level::Warn, "No publisher \"nowhere\""));
        assert!(publishers.is_empty());
        assert!(matches!(
            publishers.require("nowhere"),
            Err(EasyNodeError::UnknownPublisher(ref name)) if name == "nowhere"
        ));
    }
}
