mod parse;

use std::collections::BTreeMap;

use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use parse::{MalformedSpec, parse_agent, parse_status};

/// Declares a simulated sensor that should run as a deployment in the same namespace.
#[derive(Debug, Default, Clone, PartialEq, CustomResource, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "digitaltwin.example.com",
    version = "v1",
    kind = "SensorAgent",
    namespaced,
    status = SensorAgentStatus,
    printcolumn = r#"{"name":"Sensor", "type":"string", "jsonPath":".spec.sensorType"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[0].type"}"#,
    printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.conditions[0].message"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct SensorAgentSpec {
    pub sensor_type: String,
    pub image: String,

    /// Defaults to a single replica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_location_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sitewise_asset_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sitewise_property_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Additional environment passed to the agent container as is.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorAgentStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub last_transition_time: Time,
    pub observed_generation: Option<i64>,
    pub status: Status,
    #[serde(rename = "type")]
    pub type_: Type,
    pub reason: Reason,
    pub message: String,
}

impl Condition {
    #[must_use]
    pub fn new(generation: Option<i64>, reason: Reason, type_: Type, message: String) -> Self {
        Self {
            last_transition_time: Time(Timestamp::now()),
            observed_generation: generation,
            status: Status::True,
            type_,
            reason,
            message,
        }
    }

    /// Whether both conditions describe the same outcome for the same generation.
    #[must_use]
    pub fn is_equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.reason == other.reason
            && self.status == other.status
            && self.observed_generation == other.observed_generation
            && self.message == other.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Reason {
    Reconciled,
    MalformedSpec,
    ForeignWorkload,
    Rejected,
    RetriesExhausted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Status {
    True,
    False,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Type {
    Ready,
    Error,
    #[serde(other)]
    Unknown,
}
