use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Api, Error,
    api::{DeleteParams, Patch, PatchParams, PostParams},
};
use tracing::{Level, instrument};

use crate::k8s::managed::FIELD_MANAGER;

/// Result of probing for an object by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<K> {
    Found(K),
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Deployment {0} does not exist.")]
    NotFound(String),

    #[error("Deployment {0} already exists.")]
    AlreadyExists(String),

    #[error("Deployment {name} was rejected ({code}): {message}")]
    Rejected {
        name: String,
        code: u16,
        message: String,
    },

    #[error(transparent)]
    Kube(Error),
}

impl ClientError {
    fn classify(name: &str, error: Error) -> Self {
        match error {
            Error::Api(status) => {
                Self::from_status(name, status.code, &status.reason, &status.message)
                    .unwrap_or(Self::Kube(Error::Api(status)))
            }
            error => Self::Kube(error),
        }
    }

    fn from_status(name: &str, code: u16, reason: &str, message: &str) -> Option<Self> {
        let name = name.to_owned();

        match code {
            404 => Some(Self::NotFound(name)),
            409 if reason == "AlreadyExists" => Some(Self::AlreadyExists(name)),
            400 | 422 => Some(Self::Rejected {
                name,
                code,
                message: message.to_owned(),
            }),
            _ => None,
        }
    }

    /// Errors worth another attempt, because the api server might answer differently next time.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Namespace scoped access to the workloads generated for sensor agents.
pub trait WorkloadClient {
    async fn get(&self, name: &str) -> Result<Lookup<Deployment>, ClientError>;

    async fn create(&self, deployment: &Deployment) -> Result<Deployment, ClientError>;

    /// Overwrites the workload `name`. Fails with [`ClientError::NotFound`] instead of creating it.
    async fn update(&self, name: &str, deployment: &Deployment)
    -> Result<Deployment, ClientError>;

    async fn delete(&self, name: &str) -> Result<(), ClientError>;
}

impl WorkloadClient for Api<Deployment> {
    #[instrument(skip(self), err(level = Level::WARN))]
    async fn get(&self, name: &str) -> Result<Lookup<Deployment>, ClientError> {
        let lookup = match Api::get_opt(self, name).await {
            Ok(Some(deployment)) => Lookup::Found(deployment),
            Ok(None) => Lookup::NotFound,
            Err(error) => return Err(ClientError::classify(name, error)),
        };

        Ok(lookup)
    }

    #[instrument(
        skip_all,
        fields(name = deployment.metadata.name),
        err(level = Level::WARN),
    )]
    async fn create(&self, deployment: &Deployment) -> Result<Deployment, ClientError> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..Default::default()
        };

        Api::create(self, &params, deployment)
            .await
            .map_err(|error| ClientError::classify(name, error))
    }

    #[instrument(skip(self, deployment), err(level = Level::WARN))]
    async fn update(
        &self,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClientError> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..Default::default()
        };

        // A merge patch replaces lists wholesale, so removed env entries disappear.
        let patch = Patch::Merge(deployment);

        Api::patch(self, name, &params, &patch)
            .await
            .map_err(|error| ClientError::classify(name, error))
    }

    #[instrument(skip(self), err(level = Level::WARN))]
    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        let params = DeleteParams::background();

        match Api::delete(self, name, &params).await {
            Ok(_) => Ok(()),
            Err(error) => Err(ClientError::classify(name, error)),
        }
    }
}
