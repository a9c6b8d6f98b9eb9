//! # Node runtime
//!
//! - **EasyNode**: lifecycle owner; declares, starts and shuts a node down
//! - **NodeContext**: shared view of a started node handed to handlers and hooks
//! - **NodeHooks**: init, parameter-change and shutdown callbacks
//! - **LogSink**: where node log lines go
//!
//! ## Node Lifecycle
//!
//! 1. **Uninitialized** - configuration and handlers are bound
//! 2. **Initializing** - `start()` loads parameters and registers with the bus
//! 3. **Running** - messages are dispatched, parameters reconciled periodically
//! 4. **ShuttingDown** / **Terminated** - `shutdown()` drains and runs `on_shutdown`

pub mod context;
pub mod log;
pub mod node;
pub mod reconcile;

pub use context::NodeContext;
pub use self::log::{LogCrateSink, LogSink, MemoryLogSink};
pub use node::{DefaultHooks, EasyNode, NodeHooks, NodeState};
pub use reconcile::{reconcile_and_notify, ReconcileTimer};
