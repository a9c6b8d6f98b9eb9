//! Declared, typed, hot-reloadable node parameters
//!
//! Parameters are declared while the node is being built, loaded once from the
//! external [`ParamServer`] and then kept in sync by periodic reconciliation.
//! Handlers read them at any time; each value sits behind its own lock, so a
//! reader sees either the old or the new value, never a mix.

pub mod server;

pub use server::{MemoryParamServer, ParamServer};

use crate::core::log::LogSink;
use crate::error::{EasyNodeError, EasyNodeResult};
use log::Level;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Parameter name -> value. Depending on the call this holds current values
/// or the values that were replaced.
pub type ParamChanges = BTreeMap<String, Value>;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Bool,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "double")]
    Float,
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "sequence")]
    List,
    #[serde(alias = "map")]
    Dict,
    Any,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "str",
            ParamType::List => "list",
            ParamType::Dict => "dict",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

impl ParamType {
    /// Convert `value` to this type; ints widen to float, integral floats narrow to int
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::Any, v) => Some(v.clone()),
            (ParamType::Bool, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Int, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }
            }
            (ParamType::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (ParamType::Str, Value::String(_)) => Some(value.clone()),
            (ParamType::List, Value::Array(_)) => Some(value.clone()),
            (ParamType::Dict, Value::Object(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Declaration of one parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    /// `None` makes the parameter required
    pub default: Option<Value>,
    pub desc: Option<String>,
}

impl Parameter {
    pub fn required(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            default: None,
            desc: None,
        }
    }

    pub fn with_default(name: &str, param_type: ParamType, default: Value) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            default: Some(default),
            desc: None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

struct DeclaredParameter {
    spec: Parameter,
    current: RwLock<Option<Value>>,
}

/// The node's view of its parameters
pub struct ParameterStore {
    node_name: String,
    server: Arc<dyn ParamServer>,
    params: BTreeMap<String, DeclaredParameter>,
    log: Arc<dyn LogSink>,
    // Held for a whole reconcile pass; readers never take it.
    reconciling: Mutex<()>,
}

impl ParameterStore {
    pub fn new(node_name: &str, server: Arc<dyn ParamServer>, log: Arc<dyn LogSink>) -> Self {
        Self {
            node_name: node_name.to_string(),
            server,
            params: BTreeMap::new(),
            log,
            reconciling: Mutex::new(()),
        }
    }

    /// Declare a parameter. Only possible before the store is shared with running code.
    pub fn declare(&mut self, spec: Parameter) -> EasyNodeResult<()> {
        if self.params.contains_key(&spec.name) {
            return Err(EasyNodeError::config(format!(
                "parameter '{}' declared twice",
                spec.name
            )));
        }
        self.params.insert(
            spec.name.clone(),
            DeclaredParameter {
                spec,
                current: RwLock::new(None),
            },
        );
        Ok(())
    }

    /// Fully-qualified name of a parameter on the external server
    pub fn server_key(&self, name: &str) -> String {
        format!("/{}/{}", self.node_name, name)
    }

    pub fn declared(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values().map(|p| &p.spec)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn read_external(&self, spec: &Parameter) -> EasyNodeResult<Value> {
        let key = self.server_key(&spec.name);
        let raw = match &spec.default {
            Some(default) => self.server.get_or(&key, default)?,
            None => self.server.get(&key)?,
        };
        spec.param_type.coerce(&raw).ok_or_else(|| {
            EasyNodeError::config(format!(
                "parameter '{}' expects {}, got {}",
                spec.name, spec.param_type, raw
            ))
        })
    }

    /// Load every declared parameter and mirror the result back to the server.
    ///
    /// Returns all loaded values. Fails on the first required parameter the
    /// server does not hold, or on a value of the wrong type.
    pub fn load_initial(&self) -> EasyNodeResult<ParamChanges> {
        self.emit(Level::Info, &format!("Loading {} parameters", self.params.len()));
        let mut values = ParamChanges::new();
        for (name, param) in &self.params {
            let value = self.read_external(&param.spec).map_err(|e| match e {
                EasyNodeError::MissingParameter(_) => EasyNodeError::config(format!(
                    "Could not load required parameter '{}'",
                    name
                )),
                other => other,
            })?;

            self.server.set(&self.server_key(name), value.clone())?;
            *param.current.write() = Some(value.clone());
            self.emit(Level::Info, &format!("Read {:?} = {}", name, value));
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    /// Current in-process value of `name`
    pub fn get(&self, name: &str) -> EasyNodeResult<Value> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| EasyNodeError::UnknownParameter(name.to_string()))?;
        let value = param.current.read().clone();
        value.ok_or_else(|| {
            EasyNodeError::invalid_state(format!("parameter '{}' has not been loaded yet", name))
        })
    }

    /// Current value of `name` deserialized as `T`
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> EasyNodeResult<T> {
        Ok(serde_json::from_value(self.get(name)?)?)
    }

    /// Get parameter with default
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.get_as(name).unwrap_or(default)
    }

    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        self.get_or(name, default)
    }

    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get_or(name, default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get_or(name, default)
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        self.get_or(name, default.to_string())
    }

    /// Every loaded value
    pub fn snapshot(&self) -> ParamChanges {
        self.params
            .iter()
            .filter_map(|(name, p)| p.current.read().clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Poll the server and adopt every value that changed.
    ///
    /// Returns the *previous* value of each changed parameter; the newly
    /// observed value becomes the baseline, so an unchanged server makes the
    /// next pass a no-op.
    ///
    /// Passes are serialized, so overlapping callers never report the same
    /// change twice or adopt an older observation over a newer one.
    pub fn reconcile(&self) -> ParamChanges {
        let _pass = self.reconciling.lock();
        let mut changed = ParamChanges::new();
        for (name, param) in &self.params {
            let observed = match self.read_external(&param.spec) {
                Ok(v) => v,
                Err(e) => {
                    self.emit(
                        Level::Warn,
                        &format!("Keeping current value of {:?}: {}", name, e),
                    );
                    continue;
                }
            };

            let mut current = param.current.write();
            let differs = match current.as_ref() {
                Some(v) => v.to_string() != observed.to_string(),
                None => true,
            };
            if differs {
                if let Some(previous) = current.replace(observed) {
                    changed.insert(name.clone(), previous);
                } else {
                    changed.insert(name.clone(), Value::Null);
                }
            }
        }
        changed
    }

    fn emit(&self, level: Level, msg: &str) {
        self.log.emit(level, &format!("{} | {}", self.node_name, msg));
    }
}
