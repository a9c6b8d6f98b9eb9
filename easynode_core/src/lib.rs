//! # EasyNode Core
//!
//! Runtime for declarative message-processing nodes.
//!
//! A node is described by a [`NodeConfiguration`]: typed parameters,
//! subscriptions and publishers. The runtime provides:
//!
//! - **Dispatch**: per-subscription policies, inline or threaded with drop-on-busy
//! - **Parameters**: initial load with write-back, periodic reconciliation
//! - **Timing**: named phase timings and per-subscription statistics
//! - **Communication**: a pluggable [`Bus`] with an in-process [`LocalBus`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use easynode_core::{EasyNode, EasyNodeResult, LocalBus, MemoryParamServer, NodeConfiguration};
//! use std::sync::Arc;
//!
//! fn main() -> EasyNodeResult<()> {
//!     let config = NodeConfiguration::from_yaml_str(
//!         "subscriptions:\n  switch: {topic: ~switch, type: bool}\n",
//!     )?;
//!     let mut node = EasyNode::new(
//!         "switcher",
//!         config,
//!         Arc::new(LocalBus::new()),
//!         Arc::new(MemoryParamServer::new()),
//!     );
//!     node.on_received_typed::<bool, _>("switch", |ctx, on| {
//!         ctx.node().info(&format!("switch is {}", on));
//!         Ok(())
//!     })?;
//!     node.spin()
//! }
//! ```

pub mod communication;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod params;
pub mod timing;

// Re-export commonly used types for easy access
pub use crate::core::{
    DefaultHooks, EasyNode, LogCrateSink, LogSink, MemoryLogSink, NodeContext, NodeHooks,
    NodeState,
};
pub use communication::{Bus, LocalBus, Message, Publisher, Publishers, TopicPublisher};
pub use config::{NodeConfiguration, ParameterSpec, PublisherSpec, SubscriptionSpec};
pub use dispatch::{
    typed_handler, DispatchOutcome, Dispatcher, MessageHandler, ProcessingContext,
    ProcessingPolicy, SkipReason, Subscription, SubscriptionState, SubscriptionStats,
};
pub use error::{exit_status, run_main, EasyNodeError, EasyNodeResult};
pub use params::{
    MemoryParamServer, ParamChanges, ParamServer, ParamType, Parameter, ParameterStore,
};
pub use timing::{PhaseGuard, PhaseStats, PhaseTimer};
