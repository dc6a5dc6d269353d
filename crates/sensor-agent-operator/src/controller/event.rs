use kube::api::DynamicObject;
use sensor_agent_crd::{MalformedSpec, SensorAgent, SensorAgentStatus, parse_agent, parse_status};

use crate::k8s::watch::Notification;

#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    Upsert(SensorAgent),
    Remove(String),
}

impl ReconcileEvent {
    /// Maps a watch notification to the convergence step it asks for. Bookmarks ask for none.
    pub fn from_notification(notification: Notification) -> Option<Result<Self, MalformedEvent>> {
        let event = match notification {
            Notification::Added(object) | Notification::Modified(object) => upsert(object),
            Notification::Deleted(object) => remove(&object),
            Notification::Bookmark(_) => return None,
        };

        Some(event)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Upsert(agent) => agent.metadata.name.as_deref().unwrap_or_default(),
            Self::Remove(name) => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Remove(_) => "remove",
        }
    }
}

fn upsert(object: DynamicObject) -> Result<ReconcileEvent, MalformedEvent> {
    let generation = object.metadata.generation;
    let status = parse_status(&object);

    parse_agent(object)
        .map(ReconcileEvent::Upsert)
        .map_err(|error| MalformedEvent {
            event: "upsert",
            generation,
            status,
            error,
        })
}

fn remove(object: &DynamicObject) -> Result<ReconcileEvent, MalformedEvent> {
    let name = object.metadata.name.clone().ok_or(MalformedEvent {
        event: "remove",
        generation: object.metadata.generation,
        status: None,
        error: MalformedSpec::MissingName,
    })?;

    Ok(ReconcileEvent::Remove(name))
}

/// An object that failed to parse, along with what is needed to report on it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MalformedEvent {
    pub event: &'static str,
    pub generation: Option<i64>,
    pub status: Option<SensorAgentStatus>,
    #[source]
    pub error: MalformedSpec,
}

impl MalformedEvent {
    pub fn name(&self) -> Option<&str> {
        self.error.name()
    }
}
