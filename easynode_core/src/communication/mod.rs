//! # Communication layer
//!
//! - **Bus**: the publish/subscribe capability the node runtime consumes
//! - **LocalBus**: in-process bus with per-subscriber delivery threads
//! - **Publishers**: the named outputs of a node

pub mod local;
pub mod publisher;
pub mod traits;

pub use local::{LocalBus, TopicMetrics};
pub use publisher::{Publisher, Publishers};
pub use traits::{Bus, Message, MessageCallback, SubscriberId, TopicPublisher};

/// Resolve a topic name against the node's private namespace.
///
/// `~image` on node `detector` becomes `/detector/image`; absolute names are
/// kept, relative names are rooted.
pub fn resolve_topic(node_name: &str, topic: &str) -> String {
    if let Some(private) = topic.strip_prefix('~') {
        format!("/{}/{}", node_name, private.trim_start_matches('/'))
    } else if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{}", topic)
    }
}
