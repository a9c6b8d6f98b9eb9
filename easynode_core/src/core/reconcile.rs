//! Periodic parameter reconciliation

use super::context::NodeContext;
use super::node::NodeHooks;
use crate::error::{EasyNodeError, EasyNodeResult};
use crate::params::ParamChanges;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Run one reconciliation pass and notify `hooks` when something changed.
///
/// The hook receives the previous values of the changed parameters; the new
/// ones are already visible through `ctx.params()`.
pub fn reconcile_and_notify(ctx: &NodeContext, hooks: &dyn NodeHooks) -> ParamChanges {
    let changed = ctx.params().reconcile();
    if !changed.is_empty() {
        let names: Vec<&str> = changed.keys().map(String::as_str).collect();
        ctx.debug(&format!("Parameters changed: {}", names.join(", ")));
        hooks.on_parameters_changed(ctx, false, &changed);
    }
    changed
}

/// Background thread running [`reconcile_and_notify`] at a fixed interval
pub struct ReconcileTimer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileTimer {
    pub fn start(
        interval: Duration,
        ctx: Arc<NodeContext>,
        hooks: Arc<dyn NodeHooks>,
    ) -> EasyNodeResult<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let thread_name = format!("easynode-params-{}", ctx.name());

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let tick = panic::catch_unwind(AssertUnwindSafe(|| {
                            reconcile_and_notify(&ctx, hooks.as_ref());
                        }));
                        if tick.is_err() {
                            ctx.error("on_parameters_changed panicked; reconciliation continues");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| {
                EasyNodeError::Internal(format!("failed to start parameter timer: {}", e))
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for a running pass to finish
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReconcileTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::Publishers;
    use crate::core::log::MemoryLogSink;
    use crate::params::{MemoryParamServer, ParamServer, ParamType, Parameter, ParameterStore};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<(bool, ParamChanges)>>,
    }

    impl NodeHooks for RecordingHooks {
        fn on_parameters_changed(
            &self,
            _ctx: &NodeContext,
            first_time: bool,
            changed: &ParamChanges,
        ) {
            self.calls.lock().push((first_time, changed.clone()));
        }
    }

    fn context(server: &MemoryParamServer) -> Arc<NodeContext> {
        let log = Arc::new(MemoryLogSink::new());
        let mut params = ParameterStore::new("detector", Arc::new(server.clone()), log.clone());
        params
            .declare(Parameter::with_default("verbose", ParamType::Bool, json!(false)))
            .unwrap();
        params.load_initial().unwrap();
        let publishers = Publishers::new("detector", log.clone());
        Arc::new(NodeContext::new(
            "detector",
            Arc::new(params),
            Arc::new(publishers),
            log,
        ))
    }

    #[test]
    fn test_notifies_only_on_change() {
        let server = MemoryParamServer::new();
        let ctx = context(&server);
        let hooks = RecordingHooks::default();

        assert!(reconcile_and_notify(&ctx, &hooks).is_empty());
        assert!(hooks.calls.lock().is_empty());

        server.set("/detector/verbose", json!(true)).unwrap();
        let changed = reconcile_and_notify(&ctx, &hooks);
        assert_eq!(changed["verbose"], json!(false));
        assert_eq!(
            *hooks.calls.lock(),
            vec![(false, ParamChanges::from([("verbose".to_string(), json!(false))]))]
        );
        assert!(ctx.params().get_bool("verbose", false));
    }

    #[test]
    fn test_timer_ticks_and_stops() {
        let server = MemoryParamServer::new();
        let ctx = context(&server);
        let hooks = Arc::new(RecordingHooks::default());
        let mut timer =
            ReconcileTimer::start(Duration::from_millis(5), ctx.clone(), hooks.clone()).unwrap();

        server.set("/detector/verbose", json!(true)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while hooks.calls.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        timer.stop();

        assert_eq!(hooks.calls.lock().len(), 1);
        server.set("/detector/verbose", json!(false)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hooks.calls.lock().len(), 1);
    }
}
