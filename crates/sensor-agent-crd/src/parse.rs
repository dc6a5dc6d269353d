use kube::api::DynamicObject;

use crate::{SensorAgent, SensorAgentSpec, SensorAgentStatus};

/// A sensor agent that can never be turned into a workload, no matter how often it is retried.
#[derive(Debug, thiserror::Error)]
pub enum MalformedSpec {
    #[error("Sensor agent has no name.")]
    MissingName,

    #[error("Sensor agent {name} is missing required field {field}.")]
    MissingField { name: String, field: &'static str },

    #[error("Sensor agent {name} does not match the schema: {source}")]
    Schema {
        name: String,
        source: serde_json::Error,
    },

    #[error("Sensor agent {name} requests a negative replica count of {replicas}.")]
    NegativeReplicas { name: String, replicas: i32 },

    #[error("Sensor agent {name} declares an unusable environment variable {key:?}.")]
    InvalidEnv { name: String, key: String },
}

impl MalformedSpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::MissingName => None,
            Self::MissingField { name, .. }
            | Self::Schema { name, .. }
            | Self::NegativeReplicas { name, .. }
            | Self::InvalidEnv { name, .. } => Some(name),
        }
    }
}

/// Parses a raw watch object into a typed sensor agent.
///
/// An unreadable `status` is ignored, since it is owned by the operator and will be rewritten.
pub fn parse_agent(object: DynamicObject) -> Result<SensorAgent, MalformedSpec> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or(MalformedSpec::MissingName)?;

    let spec = object
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| MalformedSpec::MissingField {
            name: name.clone(),
            field: "spec",
        })?;

    let spec: SensorAgentSpec =
        serde_json::from_value(spec).map_err(|source| MalformedSpec::Schema { name, source })?;

    Ok(SensorAgent {
        status: parse_status(&object),
        metadata: object.metadata,
        spec,
    })
}

pub fn parse_status(object: &DynamicObject) -> Option<SensorAgentStatus> {
    object
        .data
        .get("status")
        .cloned()
        .and_then(|status| serde_json::from_value(status).ok())
}
