//! # Message dispatch
//!
//! Routes every inbound message to the handler bound to its subscription,
//! under that subscription's [`ProcessingPolicy`]:
//!
//! - **Synchronous**: the handler runs inline on the delivery path and its
//!   failure is returned to the caller.
//! - **ThreadedDrop**: the handler runs on a detached worker thread. While a
//!   worker is in flight every new message for the same subscription is
//!   dropped and counted as skipped; nothing is queued.
//!
//! Subscriptions never share a lock with each other.

pub mod context;
pub mod state;

pub use context::{ContextPhase, ProcessingContext};
pub use state::{ProcessingGuard, ProcessingPolicy, SubscriptionState, SubscriptionStats};

use crate::communication::Message;
use crate::core::context::NodeContext;
use crate::error::{EasyNodeError, EasyNodeResult};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A named input of the node, fixed after initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub name: String,
    pub topic: String,
    pub type_tag: String,
    pub queue_depth: usize,
    pub policy: ProcessingPolicy,
}

impl Subscription {
    pub fn new(
        name: &str,
        topic: &str,
        type_tag: &str,
        queue_depth: usize,
        policy: ProcessingPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            type_tag: type_tag.to_string(),
            queue_depth,
            policy,
        }
    }
}

/// Callback bound to one subscription
pub trait MessageHandler: Send + Sync {
    fn handle(&self, ctx: &ProcessingContext, msg: &Message) -> EasyNodeResult<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&ProcessingContext, &Message) -> EasyNodeResult<()> + Send + Sync,
{
    fn handle(&self, ctx: &ProcessingContext, msg: &Message) -> EasyNodeResult<()> {
        self(ctx, msg)
    }
}

/// Adapt a handler over a concrete payload type.
///
/// Messages carrying another payload type fail with a `Handler` error.
pub fn typed_handler<T, F>(
    f: F,
) -> impl Fn(&ProcessingContext, &Message) -> EasyNodeResult<()> + Send + Sync
where
    T: Any,
    F: Fn(&ProcessingContext, &T) -> EasyNodeResult<()> + Send + Sync,
{
    move |ctx: &ProcessingContext, msg: &Message| match msg.downcast_ref::<T>() {
        Some(payload) => f(ctx, payload),
        None => Err(EasyNodeError::handler(format!(
            "subscription '{}' received '{}', which is not a {}",
            ctx.subscription().name,
            msg.type_tag(),
            std::any::type_name::<T>()
        ))),
    }
}

/// Why a message was not handed to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No handler is bound to the subscription
    NoHandler,
    /// A threaded invocation is still in flight
    Busy,
    /// The dispatcher was closed for shutdown
    Closed,
}

/// What `dispatch` did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler ran inline and returned successfully
    Processed,
    /// Handler was started on a worker thread
    Spawned,
    Skipped(SkipReason),
}

struct Route {
    subscription: Arc<Subscription>,
    state: Arc<SubscriptionState>,
    handler: Option<Arc<dyn MessageHandler>>,
}

/// Routes inbound messages to their handlers
pub struct Dispatcher {
    node: Arc<NodeContext>,
    routes: BTreeMap<String, Route>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(node: Arc<NodeContext>) -> Self {
        Self {
            node,
            routes: BTreeMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind `subscription` to `handler` (or to nothing). Only possible before
    /// the dispatcher is shared.
    pub fn add_route(
        &mut self,
        subscription: Subscription,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> EasyNodeResult<()> {
        if self.routes.contains_key(&subscription.name) {
            return Err(EasyNodeError::config(format!(
                "subscription '{}' declared twice",
                subscription.name
            )));
        }
        let state = Arc::new(SubscriptionState::new(&subscription.name, subscription.policy));
        self.routes.insert(
            subscription.name.clone(),
            Route {
                subscription: Arc::new(subscription),
                state,
                handler,
            },
        );
        Ok(())
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.routes.values().map(|r| r.subscription.as_ref())
    }

    pub fn state(&self, name: &str) -> Option<&Arc<SubscriptionState>> {
        self.routes.get(name).map(|r| &r.state)
    }

    /// Hand `msg` to the handler of `subscription`.
    ///
    /// Skips are not errors. A synchronous handler's failure is returned; a
    /// threaded handler's failure is logged by its worker.
    pub fn dispatch(&self, subscription: &str, msg: Message) -> EasyNodeResult<DispatchOutcome> {
        let route = self
            .routes
            .get(subscription)
            .ok_or_else(|| EasyNodeError::UnknownSubscription(subscription.to_string()))?;
        let state = &route.state;
        state.record_received();

        if self.closed.load(Ordering::Acquire) {
            state.record_skipped();
            return Ok(DispatchOutcome::Skipped(SkipReason::Closed));
        }

        let Some(handler) = &route.handler else {
            state.record_skipped();
            self.node
                .info(&format!("No callback defined for subscription {:?}.", subscription));
            return Ok(DispatchOutcome::Skipped(SkipReason::NoHandler));
        };

        match route.subscription.policy {
            ProcessingPolicy::Synchronous => {
                state.record_processed();
                let ctx = ProcessingContext::new(
                    Arc::clone(&self.node),
                    Arc::clone(&route.subscription),
                    Arc::clone(state),
                );
                handler.handle(&ctx, &msg).map_err(|e| {
                    state.record_failed();
                    e
                })?;
                Ok(DispatchOutcome::Processed)
            }
            ProcessingPolicy::ThreadedDrop => {
                let Some(guard) = state.try_acquire() else {
                    state.record_skipped();
                    return Ok(DispatchOutcome::Skipped(SkipReason::Busy));
                };
                self.spawn_worker(route, Arc::clone(handler), guard, msg)?;
                Ok(DispatchOutcome::Spawned)
            }
        }
    }

    fn spawn_worker(
        &self,
        route: &Route,
        handler: Arc<dyn MessageHandler>,
        guard: ProcessingGuard,
        msg: Message,
    ) -> EasyNodeResult<()> {
        let node = Arc::clone(&self.node);
        let subscription = Arc::clone(&route.subscription);
        let state = Arc::clone(&route.state);
        let thread_name = format!("easynode-{}", subscription.name);

        // The guard lives inside the closure, so it is released when the
        // worker ends or, if the thread cannot be started, when the closure is dropped.
        let worker = move || {
            let _guard = guard;
            state.record_processed();
            let ctx = ProcessingContext::new(Arc::clone(&node), subscription, Arc::clone(&state));
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, &msg)))
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            if let Some(reason) = failure {
                state.record_failed();
                let phase = ctx
                    .last_phase()
                    .map(|p| format!(" (last phase {:?})", p))
                    .unwrap_or_default();
                node.error(&format!(
                    "Handler for subscription {:?} failed{}: {}",
                    ctx.subscription().name,
                    phase,
                    reason
                ));
            }
        };

        thread::Builder::new()
            .name(thread_name)
            .spawn(worker)
            .map_err(|e| {
                EasyNodeError::Internal(format!(
                    "failed to start worker for subscription '{}': {}",
                    route.subscription.name, e
                ))
            })?;
        Ok(())
    }

    /// Stop accepting messages; later dispatches are skipped
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of threaded workers currently running
    pub fn in_flight(&self) -> usize {
        self.routes.values().filter(|r| r.state.is_busy()).count()
    }

    /// Wait until no worker is in flight; `false` if `timeout` expired first
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn stats(&self) -> BTreeMap<String, SubscriptionStats> {
        self.routes
            .iter()
            .map(|(name, r)| (name.clone(), r.state.stats()))
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
