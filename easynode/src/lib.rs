//! # EasyNode
//!
//! Declarative message-driven nodes: describe parameters, subscriptions and
//! publishers in YAML, bind a handler per subscription, and let the runtime
//! do dispatch, parameter reconciliation and timing statistics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use easynode::prelude::*;
//!
//! struct Detector;
//!
//! impl NodeHooks for Detector {
//!     fn on_parameters_changed(&self, ctx: &NodeContext, first: bool, changed: &ParamChanges) {
//!         if !first {
//!             ctx.info(&format!("reloaded {} parameter(s)", changed.len()));
//!         }
//!     }
//! }
//!
//! fn main() -> EasyNodeResult<()> {
//!     let config = NodeConfiguration::from_yaml_str(
//!         "parameters:\n  verbose: {type: bool, default: false}\n\
//!          subscriptions:\n  image: {topic: ~image, type: Image, process: threaded}\n",
//!     )?;
//!     let mut node = EasyNode::new(
//!         "line_detector",
//!         config,
//!         Arc::new(LocalBus::new()),
//!         Arc::new(MemoryParamServer::new()),
//!     )
//!     .with_hooks(Arc::new(Detector));
//!
//!     node.on_received("image", |ctx, _msg| {
//!         let _decoding = ctx.phase("decoding")?;
//!         Ok(())
//!     })?;
//!     node.spin()
//! }
//! ```
//!
//! ## Features
//!
//! - **Per-subscription policies**: inline, or threaded with drop-on-busy
//! - **Hot-reloadable parameters** with change notification
//! - **Phase timings** for latency breakdowns

// Re-export core components
pub use easynode_core::{self, *};

// Re-export the logging facade the default sink forwards to
pub use log;

/// The EasyNode prelude - everything you need to get started
pub mod prelude {
    // Node runtime
    pub use easynode_core::core::{EasyNode, NodeContext, NodeHooks, NodeState};
    pub use easynode_core::config::NodeConfiguration;

    // Dispatch
    pub use easynode_core::dispatch::{
        typed_handler, DispatchOutcome, ProcessingContext, ProcessingPolicy, SubscriptionStats,
    };

    // Communication and parameters
    pub use easynode_core::communication::{Bus, LocalBus, Message};
    pub use easynode_core::params::{MemoryParamServer, ParamChanges, ParamServer};

    // Error types
    pub use easynode_core::error::{run_main, EasyNodeError, EasyNodeResult};
    pub type Result<T> = EasyNodeResult<T>;

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};

    // Common traits
    pub use serde::{Deserialize, Serialize};

    // Logging macros for handler code
    pub use log::{debug, error, info, warn};

    // Re-export anyhow for error handling
    pub use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get EasyNode version
pub fn version() -> &'static str {
    VERSION
}
