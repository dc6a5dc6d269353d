//! In-memory stand-ins for the cluster, used to drive reconciliation and the controller loop.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{StreamExt as _, stream};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    ResourceExt as _,
    api::{ApiResource, DynamicObject},
};
use sensor_agent_crd::{Condition, SensorAgent, SensorAgentSpec};
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::k8s::{
    status::{StatusError, StatusReporter},
    watch::{Notification, NotificationStream, WatchError, WatchSource},
    workload::{ClientError, Lookup, WorkloadClient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call(pub Op, pub String);

/// A namespace of deployments with scripted failures and latency.
#[derive(Default)]
pub struct FakeCluster {
    deployments: Mutex<BTreeMap<String, Deployment>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<(Op, ClientError)>>,
    delays: Mutex<HashMap<Op, VecDeque<Duration>>>,
    racing: Mutex<Option<Deployment>>,
}

impl FakeCluster {
    pub fn with(deployments: impl IntoIterator<Item = Deployment>) -> Self {
        let cluster = Self::default();
        for deployment in deployments {
            cluster.insert(deployment);
        }
        cluster
    }

    pub fn insert(&self, deployment: Deployment) {
        self.deployments
            .lock()
            .unwrap()
            .insert(deployment.name_any(), deployment);
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.deployments.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.deployments.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|call| call.0 == op).count()
    }

    /// Fails the next call of `op` with `error`.
    pub fn fail(&self, op: Op, error: ClientError) {
        self.failures.lock().unwrap().push_back((op, error));
    }

    /// Delays the next call of `op` by `delay`.
    pub fn delay(&self, op: Op, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    /// Lets someone else create `deployment` right before the next create.
    pub fn race_create(&self, deployment: Deployment) {
        *self.racing.lock().unwrap() = Some(deployment);
    }

    async fn record(&self, op: Op, name: &str) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(Call(op, name.to_owned()));

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.iter().position(|(failing, _)| *failing == op) {
            Some(index) => Err(failures.remove(index).unwrap().1),
            None => Ok(()),
        }
    }
}

impl WorkloadClient for FakeCluster {
    async fn get(&self, name: &str) -> Result<Lookup<Deployment>, ClientError> {
        self.record(Op::Get, name).await?;

        Ok(match self.deployment(name) {
            Some(deployment) => Lookup::Found(deployment),
            None => Lookup::NotFound,
        })
    }

    async fn create(&self, deployment: &Deployment) -> Result<Deployment, ClientError> {
        let name = deployment.name_any();
        self.record(Op::Create, &name).await?;

        if let Some(winner) = self.racing.lock().unwrap().take() {
            self.insert(winner);
        }

        let mut deployments = self.deployments.lock().unwrap();
        if deployments.contains_key(&name) {
            return Err(ClientError::AlreadyExists(name));
        }

        deployments.insert(name, deployment.clone());
        Ok(deployment.clone())
    }

    async fn update(&self, name: &str, deployment: &Deployment) -> Result<Deployment, ClientError> {
        self.record(Op::Update, name).await?;

        let mut deployments = self.deployments.lock().unwrap();
        match deployments.get_mut(name) {
            Some(current) => {
                *current = deployment.clone();
                Ok(deployment.clone())
            }
            None => Err(ClientError::NotFound(name.to_owned())),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.record(Op::Delete, name).await?;

        match self.deployments.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(name.to_owned())),
        }
    }
}

/// Keeps every condition written, in order.
#[derive(Default)]
pub struct RecordingStatus {
    reports: Mutex<Vec<(String, Condition)>>,
}

impl RecordingStatus {
    pub fn reports(&self) -> Vec<(String, Condition)> {
        self.reports.lock().unwrap().clone()
    }
}

impl StatusReporter for RecordingStatus {
    async fn report(&self, name: &str, condition: Condition) -> Result<(), StatusError> {
        self.reports
            .lock()
            .unwrap()
            .push((name.to_owned(), condition));
        Ok(())
    }
}

type Script = VecDeque<Result<Vec<Result<Notification, WatchError>>, WatchError>>;

/// Replays one scripted subscription per call. Once the script is exhausted it cancels
/// `shutdown` and hangs, so the controller under test stops on its own.
#[derive(Clone)]
pub struct ScriptedWatch {
    script: Arc<Mutex<Script>>,
    cursors: Arc<Mutex<Vec<Option<String>>>>,
    shutdown: CancellationToken,
}

impl ScriptedWatch {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            script: Arc::default(),
            cursors: Arc::default(),
            shutdown,
        }
    }

    /// Adds a subscription that yields `items` and then closes.
    pub fn stream(self, items: Vec<Result<Notification, WatchError>>) -> Self {
        self.script.lock().unwrap().push_back(Ok(items));
        self
    }

    /// Adds a subscription that cannot be opened.
    pub fn refuse(self, error: WatchError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// The cursor passed to every subscription so far.
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

impl WatchSource for ScriptedWatch {
    async fn subscribe(&self, cursor: Option<&str>) -> Result<NotificationStream, WatchError> {
        self.cursors.lock().unwrap().push(cursor.map(str::to_owned));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(items)) => Ok(stream::iter(items).boxed()),
            Some(Err(error)) => Err(error),
            None => {
                self.shutdown.cancel();
                Ok(stream::pending().boxed())
            }
        }
    }
}

pub fn spec(image: &str, replicas: i32) -> SensorAgentSpec {
    SensorAgentSpec {
        sensor_type: "temperature".to_owned(),
        image: image.to_owned(),
        replicas: Some(replicas),
        ..Default::default()
    }
}

pub fn agent(name: &str, spec: SensorAgentSpec) -> SensorAgent {
    let mut agent = SensorAgent::new(name, spec);
    agent.metadata.namespace = Some("default".to_owned());
    agent.metadata.generation = Some(1);
    agent
}

/// An agent as it arrives from the watch, at `version`.
pub fn object(name: &str, version: &str, spec: serde_json::Value) -> DynamicObject {
    let resource = ApiResource::erase::<SensorAgent>(&());
    let mut object = DynamicObject::new(name, &resource)
        .within("default")
        .data(json!({ "spec": spec }));
    object.metadata.resource_version = Some(version.to_owned());
    object.metadata.generation = Some(1);
    object
}

pub fn image_of(deployment: &Deployment) -> Option<String> {
    let pod = deployment.spec.as_ref()?.template.spec.as_ref()?;
    pod.containers.first()?.image.clone()
}
