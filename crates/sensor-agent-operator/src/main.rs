mod controller;
mod k8s;
mod retry;
mod translate;

use std::{io, pin::pin, sync::Arc};

use anyhow::{Context as _, Result};
use envconfig::Envconfig;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    Api, Client,
    api::{DynamicObject, ListParams},
};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    controller::{Context, Controller},
    k8s::{agent_resource, watch::KubeWatch},
};

#[derive(Debug, Envconfig)]
struct Config {
    #[envconfig(nested)]
    k8s: k8s::Config,

    #[envconfig(nested)]
    controller: controller::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sensor_agent_operator=debug")),
        )
        .init();

    let config = Config::init_from_env().context("Could not parse operator config.")?;
    debug!("{:#?}", config);
    config.k8s.validate().context("Invalid operator config.")?;

    let client = Client::try_default()
        .await
        .context("Could not connect to the cluster.")?;

    let namespace = &config.k8s.namespace;
    let agents: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &agent_resource());
    let deployments: Api<Deployment> = Api::namespaced(client, namespace);

    // Fails early on missing permissions or an unknown resource.
    agents
        .list_metadata(&ListParams::default().limit(1))
        .await
        .context("Could not list sensor agents.")?;

    let ctx = Arc::new(Context::new(
        deployments,
        agents.clone(),
        config.controller.retry_policy(),
    ));
    let watch = KubeWatch::new(agents, config.k8s.watch_timeout_seconds);
    let controller = Controller::new(watch, ctx, &config.controller);

    let mut terminate =
        signal(SignalKind::terminate()).context("Could not listen for SIGTERM.")?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(
        tokio::signal::ctrl_c(),
        async move { terminate.recv().await },
        shutdown.clone(),
    ));

    info!("Reconciling sensor agents in namespace {}.", namespace);
    controller.run(shutdown).await?;
    info!("Stopped.");

    Ok(())
}

/// Cancels `shutdown` on the first of SIGINT or SIGTERM.
async fn cancel_on_signal(
    interrupt: impl Future<Output = io::Result<()>>,
    terminate: impl Future<Output = Option<()>>,
    shutdown: CancellationToken,
) {
    let mut terminate = pin!(terminate);

    tokio::select! {
        result = interrupt => {
            if let Err(error) = result {
                warn!(%error, "Could not listen for SIGINT, waiting for SIGTERM only.");
                terminate.await;
            }
        }
        _ = &mut terminate => {}
    }

    info!("Received shutdown signal.");
    shutdown.cancel();
}
