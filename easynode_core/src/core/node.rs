use super::context::NodeContext;
use super::log::{LogCrateSink, LogSink};
use super::reconcile::{reconcile_and_notify, ReconcileTimer};
use crate::communication::{resolve_topic, Bus, Message, Publisher, Publishers, SubscriberId};
use crate::config::{NodeConfiguration, UPDATE_PARAMS_INTERVAL};
use crate::dispatch::{
    typed_handler, DispatchOutcome, Dispatcher, MessageHandler, ProcessingContext, Subscription,
    SubscriptionStats,
};
use crate::error::{EasyNodeError, EasyNodeResult};
use crate::params::{ParamChanges, ParamServer, ParameterStore};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Node lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
    Failed(String),
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Uninitialized => write!(f, "Uninitialized"),
            NodeState::Initializing => write!(f, "Initializing"),
            NodeState::Running => write!(f, "Running"),
            NodeState::ShuttingDown => write!(f, "ShuttingDown"),
            NodeState::Terminated => write!(f, "Terminated"),
            NodeState::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}

/// Lifecycle callbacks of a node. Every method has a default body that only
/// logs, so implementors override what they need.
pub trait NodeHooks: Send + Sync {
    /// Runs once after parameters, publishers and subscriptions are in place
    fn on_init(&self, ctx: &NodeContext) -> EasyNodeResult<()> {
        ctx.info("on_init (default)");
        Ok(())
    }

    /// `first_time` is true exactly once, right after the initial load, with
    /// every current value. Afterwards `changed` maps each changed parameter
    /// to its previous value.
    fn on_parameters_changed(&self, ctx: &NodeContext, first_time: bool, changed: &ParamChanges) {
        let names: Vec<&str> = changed.keys().map(String::as_str).collect();
        ctx.info(&format!(
            "on_parameters_changed (default). First: {}. Parameters changed: {}",
            first_time,
            names.join(", ")
        ));
    }

    fn on_shutdown(&self, ctx: &NodeContext) {
        ctx.info("on_shutdown (default)");
    }
}

/// Hooks that keep every default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl NodeHooks for DefaultHooks {}

struct NodeRuntime {
    context: Arc<NodeContext>,
    dispatcher: Arc<Dispatcher>,
    subscriber_ids: Vec<SubscriberId>,
    timer: Option<ReconcileTimer>,
}

impl NodeRuntime {
    fn detach(&mut self, bus: &dyn Bus) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        for id in self.subscriber_ids.drain(..) {
            bus.unsubscribe(id);
        }
        self.dispatcher.close();
    }
}

/// A declarative node: configuration in, handlers bound by subscription name.
///
/// ```rust,ignore
/// let mut node = EasyNode::new("line_detector", config, bus, params);
/// node.on_received_typed::<CompressedImage, _>("image", |ctx, img| {
///     let _p = ctx.phase("decoding")?;
///     decode(img)
/// })?;
/// node.spin()?;
/// ```
pub struct EasyNode {
    name: String,
    configuration: NodeConfiguration,
    bus: Arc<dyn Bus>,
    param_server: Arc<dyn ParamServer>,
    hooks: Arc<dyn NodeHooks>,
    log: Arc<dyn LogSink>,
    handlers: BTreeMap<String, Arc<dyn MessageHandler>>,
    shutdown_grace: Duration,
    state: NodeState,
    runtime: Option<NodeRuntime>,
}

impl EasyNode {
    pub fn new(
        name: &str,
        configuration: NodeConfiguration,
        bus: Arc<dyn Bus>,
        param_server: Arc<dyn ParamServer>,
    ) -> Self {
        Self {
            name: name.to_string(),
            configuration,
            bus,
            param_server,
            hooks: Arc::new(DefaultHooks),
            log: Arc::new(LogCrateSink::new(name)),
            handlers: BTreeMap::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            state: NodeState::Uninitialized,
            runtime: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn NodeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// How long shutdown waits for in-flight threaded handlers
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bind a handler to the subscription `name`
    pub fn on_received<F>(&mut self, name: &str, handler: F) -> EasyNodeResult<&mut Self>
    where
        F: Fn(&ProcessingContext, &Message) -> EasyNodeResult<()> + Send + Sync + 'static,
    {
        self.bind(name, Arc::new(handler))
    }

    /// Bind a handler over the concrete payload type `T`
    pub fn on_received_typed<T, F>(&mut self, name: &str, handler: F) -> EasyNodeResult<&mut Self>
    where
        T: Any,
        F: Fn(&ProcessingContext, &T) -> EasyNodeResult<()> + Send + Sync + 'static,
    {
        self.bind(name, Arc::new(typed_handler::<T, F>(handler)))
    }

    fn bind(&mut self, name: &str, handler: Arc<dyn MessageHandler>) -> EasyNodeResult<&mut Self> {
        if self.state != NodeState::Uninitialized {
            return Err(EasyNodeError::invalid_state(format!(
                "cannot bind handler '{}' while {}",
                name, self.state
            )));
        }
        if self.handlers.insert(name.to_string(), handler).is_some() {
            return Err(EasyNodeError::config(format!(
                "handler for subscription '{}' bound twice",
                name
            )));
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == NodeState::Running
    }

    /// Context of the running node
    pub fn context(&self) -> Option<&Arc<NodeContext>> {
        self.runtime.as_ref().map(|r| &r.context)
    }

    pub fn dispatcher(&self) -> Option<&Arc<Dispatcher>> {
        self.runtime.as_ref().map(|r| &r.dispatcher)
    }

    fn emit(&self, level: log::Level, message: &str) {
        self.log.emit(level, &format!("{} | {}", self.name, message));
    }

    /// Declare everything, load parameters, register with the bus and start
    /// the reconciliation timer
    pub fn start(&mut self) -> EasyNodeResult<()> {
        if self.state != NodeState::Uninitialized {
            return Err(EasyNodeError::invalid_state(format!(
                "cannot start node '{}' while {}",
                self.name, self.state
            )));
        }
        self.state = NodeState::Initializing;

        match self.initialize() {
            Ok(runtime) => {
                self.runtime = Some(runtime);
                self.state = NodeState::Running;
                self.emit(log::Level::Info, "Node is running.");
                Ok(())
            }
            Err(e) => {
                self.emit(log::Level::Error, &format!("Failed to start: {}", e));
                self.state = NodeState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn initialize(&self) -> EasyNodeResult<NodeRuntime> {
        let config = NodeConfiguration::runtime_defaults().merge(self.configuration.clone());
        config.validate()?;
        if !config.description.is_empty() {
            self.emit(log::Level::Info, &config.description);
        }

        for name in self.handlers.keys() {
            if !config.subscriptions.contains_key(name) {
                return Err(EasyNodeError::config(format!(
                    "handler bound to undeclared subscription '{}'",
                    name
                )));
            }
        }

        let mut params =
            ParameterStore::new(&self.name, Arc::clone(&self.param_server), Arc::clone(&self.log));
        for decl in config.parameter_declarations() {
            params.declare(decl)?;
        }
        let initial = params.load_initial()?;

        let secs = params.get_f64(UPDATE_PARAMS_INTERVAL, 0.0);
        let interval = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                EasyNodeError::config(format!(
                    "parameter '{}' must be a positive number of seconds, got {}",
                    UPDATE_PARAMS_INTERVAL, secs
                ))
            })?;

        let mut publishers = Publishers::new(&self.name, Arc::clone(&self.log));
        for (name, spec) in &config.publishers {
            let topic = resolve_topic(&self.name, &spec.topic);
            let handle = self
                .bus
                .publisher(&topic, &spec.type_tag, spec.queue_size, spec.latch)?;
            publishers.insert(Publisher::new(
                name,
                &topic,
                &spec.type_tag,
                spec.queue_size,
                spec.latch,
                handle,
            ));
        }

        let context = Arc::new(NodeContext::new(
            &self.name,
            Arc::new(params),
            Arc::new(publishers),
            Arc::clone(&self.log),
        ));
        self.hooks.on_parameters_changed(&context, true, &initial);

        let mut dispatcher = Dispatcher::new(Arc::clone(&context));
        for (name, spec) in &config.subscriptions {
            let subscription = Subscription::new(
                name,
                &resolve_topic(&self.name, &spec.topic),
                &spec.type_tag,
                spec.queue_size,
                spec.process,
            );
            dispatcher.add_route(subscription, self.handlers.get(name).cloned())?;
        }

        let mut runtime = NodeRuntime {
            context,
            dispatcher: Arc::new(dispatcher),
            subscriber_ids: Vec::new(),
            timer: None,
        };
        if let Err(e) = self.attach(&mut runtime, interval) {
            runtime.detach(self.bus.as_ref());
            return Err(e);
        }
        Ok(runtime)
    }

    fn attach(&self, runtime: &mut NodeRuntime, interval: Duration) -> EasyNodeResult<()> {
        let subscriptions: Vec<Subscription> =
            runtime.dispatcher.subscriptions().cloned().collect();
        for sub in subscriptions {
            let dispatcher = Arc::clone(&runtime.dispatcher);
            let name = sub.name.clone();
            let id = self.bus.subscribe(
                &sub.topic,
                &sub.type_tag,
                sub.queue_depth,
                Arc::new(move |msg: Message| dispatcher.dispatch(&name, msg).map(|_| ())),
            )?;
            runtime.subscriber_ids.push(id);
        }

        runtime.timer = Some(ReconcileTimer::start(
            interval,
            Arc::clone(&runtime.context),
            Arc::clone(&self.hooks),
        )?);

        self.hooks.on_init(&runtime.context)
    }

    /// Stop delivery and the timer, give in-flight threaded handlers the grace
    /// period to finish, then run `on_shutdown`
    pub fn shutdown(&mut self) -> EasyNodeResult<()> {
        match self.state {
            NodeState::Running => {}
            NodeState::Terminated => return Ok(()),
            _ => {
                return Err(EasyNodeError::invalid_state(format!(
                    "cannot shut down node '{}' while {}",
                    self.name, self.state
                )))
            }
        }
        self.state = NodeState::ShuttingDown;
        self.emit(log::Level::Info, "Shutting down.");

        if let Some(mut runtime) = self.runtime.take() {
            runtime.detach(self.bus.as_ref());
            if !runtime.dispatcher.wait_idle(self.shutdown_grace) {
                self.emit(
                    log::Level::Warn,
                    &format!(
                        "Abandoning {} handler(s) still running after {:?}.",
                        runtime.dispatcher.in_flight(),
                        self.shutdown_grace
                    ),
                );
            }
            self.hooks.on_shutdown(&runtime.context);
            // Keep the context and statistics readable after termination.
            self.runtime = Some(runtime);
        }

        self.state = NodeState::Terminated;
        Ok(())
    }

    /// `start`, block until Ctrl-C, then `shutdown`
    pub fn spin(&mut self) -> EasyNodeResult<()> {
        let (tx, rx) = crossbeam::channel::bounded::<()>(1);
        ctrlc::set_handler(move || {
            let _ = tx.try_send(());
        })
        .map_err(|e| EasyNodeError::Internal(format!("failed to install Ctrl-C handler: {}", e)))?;
        self.run_until(rx)
    }

    /// `start`, block until `stop` fires or disconnects, then `shutdown`
    pub fn run_until(&mut self, stop: crossbeam::channel::Receiver<()>) -> EasyNodeResult<()> {
        self.start()?;
        let _ = stop.recv();
        self.shutdown()
    }

    /// Inject a message as if the bus had delivered it to `subscription`
    pub fn dispatch(&self, subscription: &str, msg: Message) -> EasyNodeResult<DispatchOutcome> {
        let runtime = self.running_runtime()?;
        runtime.dispatcher.dispatch(subscription, msg)
    }

    /// One reconciliation pass outside the timer; returns previous values of
    /// the changed parameters
    pub fn reconcile_now(&self) -> EasyNodeResult<ParamChanges> {
        let runtime = self.running_runtime()?;
        Ok(reconcile_and_notify(&runtime.context, self.hooks.as_ref()))
    }

    /// Statistics of every subscription, empty before `start`
    pub fn stats(&self) -> BTreeMap<String, SubscriptionStats> {
        self.runtime
            .as_ref()
            .map(|r| r.dispatcher.stats())
            .unwrap_or_default()
    }

    /// Human-readable report of [`EasyNode::stats`]
    pub fn stats_report(&self) -> String {
        let mut report = format!("node '{}' ({})\n", self.name, self.state);
        for stats in self.stats().values() {
            report.push_str(&stats.to_string());
            report.push('\n');
        }
        report
    }

    fn running_runtime(&self) -> EasyNodeResult<&NodeRuntime> {
        match (&self.state, &self.runtime) {
            (NodeState::Running, Some(runtime)) => Ok(runtime),
            _ => Err(EasyNodeError::invalid_state(format!(
                "node '{}' is not running ({})",
                self.name, self.state
            ))),
        }
    }
}

impl Drop for EasyNode {
    fn drop(&mut self) {
        if self.state == NodeState::Running {
            let _ = self.shutdown();
        }
    }
}
