use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{Resource as _, api::ObjectMeta};
use sensor_agent_crd::{MalformedSpec, SensorAgent};
use tracing::{Level, instrument};

use crate::k8s::managed::{selector_labels, workload_labels};

const DEFAULT_REPLICAS: i32 = 1;

const SENSOR_TYPE: &str = "SENSOR_TYPE";
const SENSOR_ID: &str = "SENSOR_ID";
const SENSOR_LOCATION_ID: &str = "SENSOR_LOCATION_ID";
const SITEWISE_ASSET_ID: &str = "SITEWISE_ASSET_ID";
const SITEWISE_PROPERTY_ID: &str = "SITEWISE_PROPERTY_ID";
const SENSOR_PROTOCOL: &str = "SENSOR_PROTOCOL";

const INJECTED: [&str; 6] = [
    SENSOR_TYPE,
    SENSOR_ID,
    SENSOR_LOCATION_ID,
    SITEWISE_ASSET_ID,
    SITEWISE_PROPERTY_ID,
    SENSOR_PROTOCOL,
];

/// Computes the workload that should be running for a declared object.
pub trait WorkloadTemplate {
    fn translate(&self) -> Result<Deployment, MalformedSpec>;
}

impl WorkloadTemplate for SensorAgent {
    #[instrument(
        skip_all,
        fields(name = self.metadata.name),
        err(level = Level::WARN),
    )]
    fn translate(&self) -> Result<Deployment, MalformedSpec> {
        let name = self
            .metadata
            .name
            .clone()
            .ok_or(MalformedSpec::MissingName)?;

        let spec = &self.spec;
        let missing = |field| MalformedSpec::MissingField {
            name: name.clone(),
            field,
        };

        if spec.image.trim().is_empty() {
            return Err(missing("image"));
        }

        if spec.sensor_type.trim().is_empty() {
            return Err(missing("sensorType"));
        }

        let replicas = spec.replicas.unwrap_or(DEFAULT_REPLICAS);
        if replicas < 0 {
            return Err(MalformedSpec::NegativeReplicas { name, replicas });
        }

        let container = Container {
            name: name.clone(),
            image: Some(spec.image.clone()),
            env: Some(environment(self, &name)?),
            ..Default::default()
        };

        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(selector_labels(&name)),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                ..Default::default()
            }),
        };

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: self.metadata.namespace.clone(),
                labels: Some(workload_labels(&name)),
                owner_references: self.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(selector_labels(&name)),
                    ..Default::default()
                },
                template,
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(deployment)
    }
}

fn environment(agent: &SensorAgent, name: &str) -> Result<Vec<EnvVar>, MalformedSpec> {
    let spec = &agent.spec;

    let injected = [
        (SENSOR_TYPE, Some(&spec.sensor_type)),
        (SENSOR_ID, spec.sensor_id.as_ref()),
        (SENSOR_LOCATION_ID, spec.sensor_location_id.as_ref()),
        (SITEWISE_ASSET_ID, spec.sitewise_asset_id.as_ref()),
        (SITEWISE_PROPERTY_ID, spec.sitewise_property_id.as_ref()),
        (SENSOR_PROTOCOL, spec.protocol.as_ref()),
    ];

    let mut env: Vec<EnvVar> = injected
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| env_var(key, value)))
        .collect();

    for (key, value) in &spec.env {
        if key.trim().is_empty() || key.contains('=') || INJECTED.contains(&key.as_str()) {
            return Err(MalformedSpec::InvalidEnv {
                name: name.to_owned(),
                key: key.clone(),
            });
        }

        env.push(env_var(key, value));
    }

    Ok(env)
}

fn env_var(key: &str, value: &str) -> EnvVar {
    EnvVar {
        name: key.to_owned(),
        value: Some(value.to_owned()),
        ..Default::default()
    }
}
