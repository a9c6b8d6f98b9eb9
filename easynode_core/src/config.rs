//! Declarative node configuration
//!
//! A node describes its parameters, subscriptions and publishers in YAML:
//!
//! ```yaml
//! description: Detects line segments in camera images
//! parameters:
//!   verbose: {type: bool, default: false}
//!   img_size: {type: list, desc: "height and width after resizing"}
//! subscriptions:
//!   image: {topic: ~image, type: CompressedImage, queue_size: 1, process: threaded}
//! publishers:
//!   segment_list: {topic: ~segment_list, type: SegmentList, queue_size: 1}
//! ```
//!
//! The runtime merges this over [`NodeConfiguration::runtime_defaults`].

use crate::dispatch::ProcessingPolicy;
use crate::error::{EasyNodeError, EasyNodeResult};
use crate::params::{ParamType, Parameter};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Parameter driving the reconciliation timer, in seconds
pub const UPDATE_PARAMS_INTERVAL: &str = "en_update_params_interval";

const DEFAULT_UPDATE_INTERVAL_SECS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Present (even as `null`) for defaulted parameters, absent for required ones
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub topic: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub process: ProcessingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherSpec {
    pub topic: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub latch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

fn default_queue_size() -> usize {
    1
}

// A key that is present always yields `Some`, even for an explicit `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Everything a node declares
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionSpec>,
    #[serde(default)]
    pub publishers: BTreeMap<String, PublisherSpec>,
}

impl NodeConfiguration {
    pub fn from_yaml_str(yaml: &str) -> EasyNodeResult<Self> {
        let config = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EasyNodeResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            EasyNodeError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml).map_err(|e| match e {
            EasyNodeError::Yaml(err) => {
                EasyNodeError::config(format!("invalid configuration {}: {}", path.display(), err))
            }
            other => other,
        })
    }

    /// Parameters every node carries
    pub fn runtime_defaults() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            UPDATE_PARAMS_INTERVAL.to_string(),
            ParameterSpec {
                param_type: ParamType::Float,
                default: Some(Value::from(DEFAULT_UPDATE_INTERVAL_SECS)),
                desc: Some("Seconds between parameter reconciliation passes".to_string()),
            },
        );
        Self {
            description: String::new(),
            parameters,
            subscriptions: BTreeMap::new(),
            publishers: BTreeMap::new(),
        }
    }

    /// Overlay `other` on top of `self`; same-named entries are replaced
    pub fn merge(mut self, other: NodeConfiguration) -> Self {
        if !other.description.is_empty() {
            self.description = other.description;
        }
        self.parameters.extend(other.parameters);
        self.subscriptions.extend(other.subscriptions);
        self.publishers.extend(other.publishers);
        self
    }

    /// Reject defaults that do not match their declared type
    pub fn validate(&self) -> EasyNodeResult<()> {
        for (name, spec) in &self.parameters {
            if let Some(default) = &spec.default {
                if spec.param_type.coerce(default).is_none() {
                    return Err(EasyNodeError::config(format!(
                        "default of parameter '{}' is not a {}: {}",
                        name, spec.param_type, default
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parameter declarations in name order
    pub fn parameter_declarations(&self) -> Vec<Parameter> {
        self.parameters
            .iter()
            .map(|(name, spec)| Parameter {
                name: name.clone(),
                param_type: spec.param_type,
                default: spec.default.clone(),
                desc: spec.desc.clone(),
            })
            .collect()
    }
}
