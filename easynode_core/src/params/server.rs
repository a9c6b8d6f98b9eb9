//! External parameter store
//!
//! The authoritative copy of every parameter lives outside the node. The node
//! reads it at startup, mirrors its in-process values back into it, and polls
//! it for changes made by operators.

use crate::error::{EasyNodeError, EasyNodeResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Key-value parameter store shared with the outside world
pub trait ParamServer: Send + Sync {
    /// Current value of `name`, `MissingParameter` when unset
    fn get(&self, name: &str) -> EasyNodeResult<Value>;

    /// Current value of `name`, or `default` when unset
    fn get_or(&self, name: &str, default: &Value) -> EasyNodeResult<Value> {
        match self.get(name) {
            Err(EasyNodeError::MissingParameter(_)) => Ok(default.clone()),
            other => other,
        }
    }

    fn set(&self, name: &str, value: Value) -> EasyNodeResult<()>;
}

/// In-process parameter server.
///
/// Clones share the same storage, so a test or an operator tool can keep a
/// handle and edit values while a node polls them.
#[derive(Debug, Clone, Default)]
pub struct MemoryParamServer {
    /// Parameter storage - BTreeMap maintains sorted order
    params: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryParamServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server pre-populated with `values`
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let params = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            params: Arc::new(RwLock::new(params)),
        }
    }

    /// Parse a flat YAML mapping of fully-qualified names to values
    pub fn from_yaml_str(yaml: &str) -> EasyNodeResult<Self> {
        let loaded: BTreeMap<String, Value> = serde_yaml::from_str(yaml)?;
        Ok(Self {
            params: Arc::new(RwLock::new(loaded)),
        })
    }

    /// Check if a parameter exists
    pub fn has(&self, name: &str) -> bool {
        self.params.read().contains_key(name)
    }

    /// Remove a parameter
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.params.write().remove(name)
    }

    /// List all parameter keys
    pub fn list_keys(&self) -> Vec<String> {
        self.params.read().keys().cloned().collect()
    }

    /// Get all parameters
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        self.params.read().clone()
    }

    /// Save parameters to YAML file
    pub fn save_to_disk(&self, path: &Path) -> EasyNodeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(&*self.params.read())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Merge parameters from a YAML file; a missing file is not an error
    pub fn load_from_disk(&self, path: &Path) -> EasyNodeResult<()> {
        if path.exists() {
            let yaml_str = std::fs::read_to_string(path)?;
            let loaded: BTreeMap<String, Value> = serde_yaml::from_str(&yaml_str)?;
            self.params.write().extend(loaded);
        }
        Ok(())
    }
}

impl ParamServer for MemoryParamServer {
    fn get(&self, name: &str) -> EasyNodeResult<Value> {
        self.params
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EasyNodeError::MissingParameter(name.to_string()))
    }

    fn set(&self, name: &str, value: Value) -> EasyNodeResult<()> {
        self.params.write().insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let server = MemoryParamServer::new();
        assert!(matches!(
            server.get("/detector/verbose"),
            Err(EasyNodeError::MissingParameter(_))
        ));
        assert_eq!(
            server.get_or("/detector/verbose", &json!(false)).unwrap(),
            json!(false)
        );

        server.set("/detector/verbose", json!(true)).unwrap();
        assert_eq!(server.get("/detector/verbose").unwrap(), json!(true));
        assert_eq!(
            server.get_or("/detector/verbose", &json!(false)).unwrap(),
            json!(true)
        );

        // Test overwrite
        server.set("/detector/verbose", json!(false)).unwrap();
        assert_eq!(server.get("/detector/verbose").unwrap(), json!(false));
        assert_eq!(server.remove("/detector/verbose"), Some(json!(false)));
        assert!(!server.has("/detector/verbose"));
    }

    #[test]
    fn test_clones_share_storage() {
        let server = MemoryParamServer::with_values([("/n/x", json!(1))]);
        let operator = server.clone();
        operator.set("/n/x", json!(2)).unwrap();
        assert_eq!(server.get("/n/x").unwrap(), json!(2));
    }

    #[test]
    fn test_yaml_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("params.yaml");

        let server = MemoryParamServer::from_yaml_str(
            "/detector/img_size: [120, 160]\n/detector/top_cutoff: 40\n",
        )
        .unwrap();
        server.save_to_disk(&path).unwrap();

        let restored = MemoryParamServer::new();
        restored.set("/other/flag", json!(true)).unwrap();
        restored.load_from_disk(&path).unwrap();
        assert_eq!(restored.get("/detector/img_size").unwrap(), json!([120, 160]));
        assert_eq!(restored.get("/detector/top_cutoff").unwrap(), json!(40));
        assert_eq!(restored.list_keys().len(), 3);

        restored.load_from_disk(&dir.path().join("absent.yaml")).unwrap();
    }
}
