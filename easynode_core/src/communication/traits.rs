//! Abstraction over the publish/subscribe transport
//!
//! The runtime never talks to a transport directly: it registers subscriptions
//! and obtains publishers through a [`Bus`], so the in-process [`LocalBus`]
//! and any middleware adapter can be used interchangeably.
//!
//! [`LocalBus`]: crate::communication::LocalBus

use crate::error::EasyNodeResult;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-tagged, type-erased message payload.
///
/// Cloning is cheap: the payload is shared, never copied.
#[derive(Clone)]
pub struct Message {
    type_tag: Arc<str>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Message {
    /// Wrap `payload` under the message type tag `type_tag` (e.g. `"sensor_msgs/CompressedImage"`)
    pub fn new<T: Any + Send + Sync>(type_tag: &str, payload: T) -> Self {
        Self {
            type_tag: Arc::from(type_tag),
            payload: Arc::new(payload),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Borrow the payload as `T`, `None` if it holds something else
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Callback the bus invokes for every delivered message.
///
/// An error returned here belongs to the bus: it decides whether to log it,
/// count it or tear the connection down.
pub type MessageCallback = Arc<dyn Fn(Message) -> EasyNodeResult<()> + Send + Sync>;

/// Handle returned by [`Bus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Outbound side of an advertised topic
pub trait TopicPublisher: Send + Sync {
    /// Fire-and-forget send; delivery failures are never reported to the caller
    fn publish(&self, msg: Message);

    fn topic(&self) -> &str;
}

/// Publish/subscribe capability consumed by the node runtime
pub trait Bus: Send + Sync {
    /// Register `on_message` for `topic`
    ///
    /// `queue_depth` is a hint for how many undelivered messages the transport may buffer.
    fn subscribe(
        &self,
        topic: &str,
        type_tag: &str,
        queue_depth: usize,
        on_message: MessageCallback,
    ) -> EasyNodeResult<SubscriberId>;

    /// Stop delivering to a subscriber; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriberId);

    /// Advertise `topic` and return its publisher
    fn publisher(
        &self,
        topic: &str,
        type_tag: &str,
        queue_depth: usize,
        latch: bool,
    ) -> EasyNodeResult<Arc<dyn TopicPublisher>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct BoolStamped {
        data: bool,
    }

    #[test]
    fn test_message_downcast() {
        let msg = Message::new("BoolStamped", BoolStamped { data: true });
        assert_eq!(msg.type_tag(), "BoolStamped");
        assert!(msg.is::<BoolStamped>());
        assert_eq!(msg.downcast_ref::<BoolStamped>(), Some(&BoolStamped { data: true }));
        assert!(msg.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_message_clone_shares_payload() {
        let msg = Message::new("String", String::from("segments"));
        let copy = msg.clone();
        let a = msg.downcast_ref::<String>().unwrap() as *const String;
        let b = copy.downcast_ref::<String>().unwrap() as *const String;
        assert_eq!(a, b);
    }
}
