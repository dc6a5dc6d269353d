use kube::{
    Api,
    api::{DynamicObject, Patch, PatchParams},
};
use sensor_agent_crd::{Condition, SensorAgentStatus};
use serde_json::json;
use tracing::{Level, instrument};

use crate::k8s::managed::FIELD_MANAGER;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

pub trait StatusReporter {
    /// Replaces the conditions of the sensor agent `name` with `condition`.
    async fn report(&self, name: &str, condition: Condition) -> Result<(), StatusError>;
}

impl StatusReporter for Api<DynamicObject> {
    #[instrument(
        skip(self, condition),
        fields(type_ = ?condition.type_, reason = ?condition.reason),
        err(level = Level::WARN),
    )]
    async fn report(&self, name: &str, condition: Condition) -> Result<(), StatusError> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..Default::default()
        };

        let status = SensorAgentStatus {
            conditions: vec![condition],
        };
        let patch = json!({ "status": status });

        self.patch_status(name, &params, &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

/// Whether writing `condition` would leave the status as it is.
///
/// Every status write produces another watch event for the agent, so unchanged conditions must
/// not be written again.
pub fn is_current(status: Option<&SensorAgentStatus>, condition: &Condition) -> bool {
    status
        .and_then(|status| status.conditions.first())
        .is_some_and(|current| current.is_equivalent(condition))
}

#[cfg(test)]
mod tests {
    use sensor_agent_crd::{Reason, Type};

    use super::*;

    fn ready(generation: i64) -> Condition {
        Condition::new(
            Some(generation),
            Reason::Reconciled,
            Type::Ready,
            "Deployment is up to date.".to_owned(),
        )
    }

    #[test]
    fn missing_status_is_never_current() {
        assert!(!is_current(None, &ready(1)));
        assert!(!is_current(Some(&SensorAgentStatus::default()), &ready(1)));
    }

    #[test]
    fn same_outcome_for_same_generation_is_current() {
        let status = SensorAgentStatus {
            conditions: vec![ready(3)],
        };

        assert!(is_current(Some(&status), &ready(3)));
    }

    #[test]
    fn new_generation_or_outcome_is_not_current() {
        let status = SensorAgentStatus {
            conditions: vec![ready(3)],
        };
        let failed = Condition::new(
            Some(3),
            Reason::RetriesExhausted,
            Type::Error,
            "Giving up after 5 attempts.".to_owned(),
        );

        assert!(!is_current(Some(&status), &ready(4)));
        assert!(!is_current(Some(&status), &failed));
    }
}
