use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt as _;
use sensor_agent_crd::{Condition, MalformedSpec, Reason, SensorAgent, SensorAgentStatus, Type};
use tokio::time::sleep;
use tracing::{Level, debug, error, info, instrument, warn};

use crate::{
    controller::{
        context::Context,
        event::{MalformedEvent, ReconcileEvent},
    },
    k8s::{
        managed::ManagedObject as _,
        status::{StatusReporter, is_current},
        workload::{ClientError, Lookup, WorkloadClient},
    },
    retry::Backoff,
    translate::WorkloadTemplate as _,
};

const UP_TO_DATE: &str = "Deployment is up to date.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Malformed(#[from] MalformedSpec),

    #[error("Deployment {0} exists but is not managed by this operator.")]
    Foreign(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedSpec,
    Foreign,
    Rejected,
    Transient,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_) => ErrorKind::MalformedSpec,
            Self::Foreign(_) => ErrorKind::Foreign,
            Self::Client(error) if error.is_transient() => ErrorKind::Transient,
            Self::Client(_) => ErrorKind::Rejected,
        }
    }
}

impl ErrorKind {
    fn reason(self) -> Reason {
        match self {
            Self::MalformedSpec => Reason::MalformedSpec,
            Self::Foreign => Reason::ForeignWorkload,
            Self::Rejected => Reason::Rejected,
            Self::Transient => Reason::RetriesExhausted,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::MalformedSpec => "malformed_spec",
            Self::Foreign => "foreign",
            Self::Rejected => "rejected",
            Self::Transient => "transient",
        };

        f.write_str(kind)
    }
}

/// Converges the workload of a single agent towards the state described by `event`.
///
/// Upserts probe before acting, so replaying any sequence of events ends in the same state.
#[instrument(skip_all, ret(level = Level::DEBUG), err(level = Level::DEBUG))]
pub async fn reconcile<C, S>(
    event: &ReconcileEvent,
    ctx: &Context<C, S>,
) -> Result<Outcome, ReconcileError>
where
    C: WorkloadClient,
{
    match event {
        ReconcileEvent::Upsert(agent) => upsert(agent, ctx.workloads()).await,
        ReconcileEvent::Remove(name) => remove(name, ctx.workloads()).await,
    }
}

async fn upsert<C>(agent: &SensorAgent, client: &C) -> Result<Outcome, ReconcileError>
where
    C: WorkloadClient,
{
    let desired = agent.translate()?;
    let name = desired.name_any();

    if let Lookup::Found(current) = client.get(&name).await? {
        return update_managed(client, &current, &desired).await;
    }

    match client.create(&desired).await {
        Ok(_) => {
            info!("Created deployment {}.", name);
            Ok(Outcome::Created)
        }
        Err(ClientError::AlreadyExists(_)) => {
            debug!("Deployment {} was created concurrently, updating it instead.", name);

            match client.get(&name).await? {
                Lookup::Found(current) => update_managed(client, &current, &desired).await,
                Lookup::NotFound => Err(ClientError::NotFound(name).into()),
            }
        }
        Err(error) => Err(error.into()),
    }
}

async fn update_managed<C>(
    client: &C,
    current: &Deployment,
    desired: &Deployment,
) -> Result<Outcome, ReconcileError>
where
    C: WorkloadClient,
{
    let name = desired.name_any();

    if !current.is_managed() {
        return Err(ReconcileError::Foreign(name));
    }

    client.update(&name, desired).await?;
    info!("Updated deployment {}.", name);

    Ok(Outcome::Updated)
}

async fn remove<C>(name: &str, client: &C) -> Result<Outcome, ReconcileError>
where
    C: WorkloadClient,
{
    if let Lookup::Found(current) = client.get(name).await?
        && !current.is_managed()
    {
        return Err(ReconcileError::Foreign(name.to_owned()));
    }

    match client.delete(name).await {
        Ok(()) => {
            info!("Deleted deployment {}.", name);
            Ok(Outcome::Deleted)
        }
        Err(ClientError::NotFound(_)) => {
            debug!("Deployment {} is already absent.", name);
            Ok(Outcome::AlreadyAbsent)
        }
        Err(error) => Err(error.into()),
    }
}

/// Reconciles `event`, retrying transient failures with backoff. Events that cannot be
/// reconciled are logged, reported on the agent and dropped.
#[instrument(skip_all, fields(name = event.name(), event = event.kind()))]
pub async fn reconcile_with_retry<C, S>(
    event: &ReconcileEvent,
    ctx: &Context<C, S>,
) -> Result<Outcome, ReconcileError>
where
    C: WorkloadClient,
    S: StatusReporter,
{
    let mut backoff = Backoff::new(ctx.retry().clone());
    let mut attempts = 0u32;

    let error = loop {
        attempts += 1;

        match reconcile(event, ctx).await {
            Ok(outcome) => {
                if let ReconcileEvent::Upsert(agent) = event {
                    let ready = Condition::new(
                        agent.metadata.generation,
                        Reason::Reconciled,
                        Type::Ready,
                        UP_TO_DATE.to_owned(),
                    );
                    report(ctx.status(), event.name(), agent.status.as_ref(), ready).await;
                }

                return Ok(outcome);
            }
            Err(error) if error.kind() == ErrorKind::Transient => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        %error,
                        "Reconciliation failed, retrying."
                    );
                    sleep(delay).await;
                }
                None => break error,
            },
            Err(error) => break error,
        }
    };

    let kind = error.kind();
    error!(
        name = event.name(),
        event = event.kind(),
        kind = %kind,
        attempts,
        %error,
        "Dropping event."
    );

    if let ReconcileEvent::Upsert(agent) = event {
        let message = match kind {
            ErrorKind::Transient => format!("Giving up after {attempts} attempts."),
            _ => error.to_string(),
        };
        let failed = Condition::new(agent.metadata.generation, kind.reason(), Type::Error, message);

        report(ctx.status(), event.name(), agent.status.as_ref(), failed).await;
    }

    Err(error)
}

/// Drops an object that could not be parsed into an agent.
pub async fn reject<C, S>(malformed: &MalformedEvent, ctx: &Context<C, S>)
where
    S: StatusReporter,
{
    let kind = ErrorKind::MalformedSpec;
    let name = malformed.name().unwrap_or("<unnamed>");

    error!(
        name,
        event = malformed.event,
        kind = %kind,
        error = %malformed,
        "Dropping event."
    );

    if let Some(name) = malformed.name() {
        let failed = Condition::new(
            malformed.generation,
            kind.reason(),
            Type::Error,
            malformed.to_string(),
        );

        report(ctx.status(), name, malformed.status.as_ref(), failed).await;
    }
}

async fn report<S>(
    status: &S,
    name: &str,
    current: Option<&SensorAgentStatus>,
    condition: Condition,
) where
    S: StatusReporter,
{
    if is_current(current, &condition) {
        debug!("Status of {} is already current.", name);
        return;
    }

    // Failures are logged by the reporter, the next event will try again.
    let _ = status.report(name, condition).await;
}
