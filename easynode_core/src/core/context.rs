use crate::communication::Publishers;
use crate::core::log::LogSink;
use crate::params::{MemoryParamServer, ParameterStore};
use log::Level;
use std::any::Any;
use std::sync::Arc;

/// Shared view of a started node, handed to handlers and hooks
pub struct NodeContext {
    name: String,
    instance_id: String,
    params: Arc<ParameterStore>,
    publishers: Arc<Publishers>,
    log: Arc<dyn LogSink>,
}

impl NodeContext {
    pub fn new(
        name: &str,
        params: Arc<ParameterStore>,
        publishers: Arc<Publishers>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            params,
            publishers,
            log,
        }
    }

    /// Context with no parameters and no publishers, for driving a
    /// [`Dispatcher`](crate::dispatch::Dispatcher) on its own
    pub fn standalone(name: &str, log: Arc<dyn LogSink>) -> Self {
        let params = ParameterStore::new(name, Arc::new(MemoryParamServer::new()), log.clone());
        let publishers = Publishers::new(name, log.clone());
        Self::new(name, Arc::new(params), Arc::new(publishers), log)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique per start of the node
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn publishers(&self) -> &Publishers {
        &self.publishers
    }

    /// Publish `payload` on the named output, tagged with that output's type
    pub fn send<T: Any + Send + Sync>(&self, publisher: &str, payload: T) {
        self.publishers.send(publisher, payload);
    }

    pub fn log(&self, level: Level, message: &str) {
        self.log.emit(level, &format!("{} | {}", self.name, message));
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}
