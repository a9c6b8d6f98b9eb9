use super::state::{SubscriptionState, SubscriptionStats};
use super::Subscription;
use crate::communication::Publishers;
use crate::core::context::NodeContext;
use crate::error::{EasyNodeError, EasyNodeResult};
use crate::params::ParameterStore;
use crate::timing::PhaseGuard;
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-message view handed to a handler.
///
/// Built fresh for every dispatched message and dropped when the handler
/// returns. Phase names must be unique among the phases open at the same
/// time: opening a phase that is already open is rejected with
/// [`EasyNodeError::PhaseReentered`].
pub struct ProcessingContext {
    node: Arc<NodeContext>,
    subscription: Arc<Subscription>,
    state: Arc<SubscriptionState>,
    open_phases: Mutex<Vec<String>>,
    last_phase: Mutex<Option<String>>,
}

impl ProcessingContext {
    pub(crate) fn new(
        node: Arc<NodeContext>,
        subscription: Arc<Subscription>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            node,
            subscription,
            state,
            open_phases: Mutex::new(Vec::new()),
            last_phase: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &NodeContext {
        &self.node
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn params(&self) -> &ParameterStore {
        self.node.params()
    }

    pub fn publishers(&self) -> &Publishers {
        self.node.publishers()
    }

    /// Open a timed phase; it closes when the returned guard drops
    pub fn phase(&self, name: &str) -> EasyNodeResult<ContextPhase<'_>> {
        {
            let mut open = self.open_phases.lock();
            if open.iter().any(|p| p == name) {
                return Err(EasyNodeError::PhaseReentered(name.to_string()));
            }
            open.push(name.to_string());
        }
        *self.last_phase.lock() = Some(name.to_string());
        Ok(ContextPhase {
            ctx: self,
            guard: self.state.timer().scoped_phase(name),
        })
    }

    /// Run `f` inside the phase `name`
    pub fn time_phase<R>(
        &self,
        name: &str,
        f: impl FnOnce() -> EasyNodeResult<R>,
    ) -> EasyNodeResult<R> {
        let _phase = self.phase(name)?;
        f()
    }

    /// Most recently opened phase of this invocation
    pub fn last_phase(&self) -> Option<String> {
        self.last_phase.lock().clone()
    }

    /// Statistics of the owning subscription
    pub fn stats(&self) -> SubscriptionStats {
        self.state.stats()
    }
}

/// An open phase of a [`ProcessingContext`]
#[must_use = "the phase is measured until this guard is dropped"]
pub struct ContextPhase<'a> {
    ctx: &'a ProcessingContext,
    guard: PhaseGuard<'a>,
}

impl Drop for ContextPhase<'_> {
    fn drop(&mut self) {
        let name = self.guard.name();
        let mut open = self.ctx.open_phases.lock();
        if let Some(pos) = open.iter().rposition(|p| p == name) {
            open.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log::MemoryLogSink;
    use crate::dispatch::ProcessingPolicy;

    fn context() -> ProcessingContext {
        let node = Arc::new(NodeContext::standalone(
            "detector",
            Arc::new(MemoryLogSink::new()),
        ));
        let subscription = Arc::new(Subscription::new(
            "image",
            "/detector/image",
            "CompressedImage",
            1,
            ProcessingPolicy::ThreadedDrop,
        ));
        let state = Arc::new(SubscriptionState::new("image", ProcessingPolicy::ThreadedDrop));
        ProcessingContext::new(node, subscription, state)
    }

    #[test]
    fn test_nested_distinct_phases() {
        let ctx = context();
        {
            let _decoding = ctx.phase("decoding").unwrap();
            let _inner = ctx.phase("resizing").unwrap();
        }
        let stats = ctx.stats();
        assert_eq!(stats.phases["decoding"].count, 1);
        assert_eq!(stats.phases["resizing"].count, 1);
        assert_eq!(ctx.last_phase().as_deref(), Some("resizing"));
    }

    #[test]
    fn test_reentrant_phase_rejected() {
        let ctx = context();
        let outer = ctx.phase("detection").unwrap();
        let err = ctx.phase("detection").err().unwrap();
        assert!(matches!(err, EasyNodeError::PhaseReentered(ref name) if name == "detection"));
        drop(outer);

        // Closed phases can be opened again.
        drop(ctx.phase("detection").unwrap());
        assert_eq!(ctx.stats().phases["detection"].count, 2);
    }

    #[test]
    fn test_time_phase_returns_value() {
        let ctx = context();
        let n = ctx.time_phase("counting", || Ok(3)).unwrap();
        assert_eq!(n, 3);
        let err = ctx
            .time_phase("failing", || -> EasyNodeResult<()> {
                Err(EasyNodeError::handler("decode"))
            })
            .unwrap_err();
        assert!(matches!(err, EasyNodeError::Handler(_)));
        assert_eq!(ctx.stats().phases["failing"].count, 1);
    }
}
