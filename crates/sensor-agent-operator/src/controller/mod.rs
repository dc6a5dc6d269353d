mod context;
mod event;
mod reconcile;
#[cfg(test)]
mod testing;

use std::{ops::ControlFlow, pin::pin, sync::Arc, time::Duration};

use envconfig::Envconfig;
use futures_util::StreamExt as _;
use tokio::{
    select,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use crate::controller::context::Context;
use crate::{
    controller::{
        event::ReconcileEvent,
        reconcile::{reconcile_with_retry, reject},
    },
    k8s::{
        status::StatusReporter,
        watch::{NotificationStream, WatchError, WatchSource},
        workload::WorkloadClient,
    },
    retry::{Backoff, RetryPolicy},
};

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "SENSOR_AGENT__WATCH_FATAL_BUDGET", default = "5")]
    watch_fatal_budget: u32,

    #[envconfig(from = "SENSOR_AGENT__WATCH_INITIAL_DELAY_MS", default = "500")]
    watch_initial_delay_ms: u64,

    #[envconfig(from = "SENSOR_AGENT__WATCH_MAX_DELAY_MS", default = "60000")]
    watch_max_delay_ms: u64,

    #[envconfig(from = "SENSOR_AGENT__RETRY_MAX_ATTEMPTS", default = "5")]
    retry_max_attempts: u32,

    #[envconfig(from = "SENSOR_AGENT__RETRY_INITIAL_DELAY_MS", default = "200")]
    retry_initial_delay_ms: u64,

    #[envconfig(from = "SENSOR_AGENT__RETRY_MAX_DELAY_MS", default = "30000")]
    retry_max_delay_ms: u64,

    #[envconfig(from = "SENSOR_AGENT__SHUTDOWN_GRACE_SECONDS", default = "10")]
    shutdown_grace_seconds: u64,
}

impl Config {
    /// Per event retries, bounded so a single broken agent cannot stall the stream.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.retry_max_attempts.max(1),
            Duration::from_millis(self.retry_initial_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    fn watch_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(
            Duration::from_millis(self.watch_initial_delay_ms),
            Duration::from_millis(self.watch_max_delay_ms),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Watch failed {attempts} times in a row without recovering: {source}")]
    Fatal { attempts: u32, source: WatchError },
}

pub struct Controller<W, C, S> {
    watch: W,
    ctx: Arc<Context<C, S>>,
    resubscribe: RetryPolicy,
    fatal_budget: u32,
    grace: Duration,
}

/// Watch position and failure accounting, kept across subscriptions.
struct Subscription {
    cursor: Option<String>,
    backoff: Backoff,
    fatal: u32,
    expired: bool,
}

impl Subscription {
    fn progressed(&mut self) {
        self.backoff.reset();
        self.fatal = 0;
        self.expired = false;
    }
}

enum Consumed {
    Shutdown,
    Closed { progressed: bool },
    Failed(WatchError),
}

impl<W, C, S> Controller<W, C, S>
where
    W: WatchSource,
    C: WorkloadClient,
    S: StatusReporter,
{
    pub fn new(watch: W, ctx: Arc<Context<C, S>>, config: &Config) -> Self {
        Self {
            watch,
            ctx,
            resubscribe: config.watch_policy(),
            fatal_budget: config.watch_fatal_budget.max(1),
            grace: Duration::from_secs(config.shutdown_grace_seconds),
        }
    }

    /// Processes sensor agent events until `shutdown` is cancelled, resubscribing whenever the
    /// watch ends. Only returns an error once the watch keeps failing with fatal errors.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let mut subscription = Subscription {
            cursor: None,
            backoff: Backoff::new(self.resubscribe.clone()),
            fatal: 0,
            expired: false,
        };

        info!("Watching sensor agents.");

        loop {
            let opened = select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                opened = self.watch.subscribe(subscription.cursor.as_deref()) => opened,
            };

            let consumed = match opened {
                Ok(stream) => self.consume(stream, &mut subscription, &shutdown).await,
                Err(error) => Consumed::Failed(error),
            };

            let error = match consumed {
                Consumed::Shutdown => return Ok(()),
                Consumed::Closed { progressed: true } => {
                    debug!("Watch stream closed, resubscribing.");
                    continue;
                }
                Consumed::Closed { progressed: false } => None,
                Consumed::Failed(WatchError::Expired) if !subscription.expired => {
                    info!("Watch cursor expired, resubscribing from scratch.");
                    subscription.cursor = None;
                    subscription.expired = true;
                    continue;
                }
                Consumed::Failed(error) => Some(error),
            };

            if matches!(error, Some(WatchError::Expired)) {
                subscription.cursor = None;
            }

            if error.as_ref().is_some_and(WatchError::is_fatal) {
                subscription.fatal += 1;
            } else {
                subscription.fatal = 0;
            }

            if subscription.fatal >= self.fatal_budget
                && let Some(source) = error
            {
                error!(attempts = subscription.fatal, error = %source, "Giving up on the watch.");

                return Err(ControllerError::Fatal {
                    attempts: subscription.fatal,
                    source,
                });
            }

            let delay = subscription
                .backoff
                .next_delay()
                .unwrap_or(self.resubscribe.max_delay);

            match &error {
                Some(error) => warn!(
                    failures = subscription.backoff.failures(),
                    delay_ms = delay.as_millis(),
                    %error,
                    "Watch failed, resubscribing after backoff."
                ),
                None => debug!(
                    delay_ms = delay.as_millis(),
                    "Watch closed without events, resubscribing after backoff."
                ),
            }

            select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                () = sleep(delay) => {}
            }
        }
    }

    async fn consume(
        &self,
        mut stream: NotificationStream,
        subscription: &mut Subscription,
        shutdown: &CancellationToken,
    ) -> Consumed {
        let mut progressed = false;

        loop {
            let next = select! {
                biased;
                () = shutdown.cancelled() => return Consumed::Shutdown,
                next = stream.next() => next,
            };

            let notification = match next {
                Some(Ok(notification)) => notification,
                Some(Err(error)) => return Consumed::Failed(error),
                None => return Consumed::Closed { progressed },
            };

            progressed = true;
            subscription.progressed();

            if let Some(version) = notification.resource_version() {
                subscription.cursor = Some(version.to_owned());
            }

            match ReconcileEvent::from_notification(notification) {
                Some(Ok(event)) => {
                    if self.dispatch(&event, shutdown).await.is_break() {
                        return Consumed::Shutdown;
                    }
                }
                Some(Err(malformed)) => reject(&malformed, &self.ctx).await,
                None => {}
            }
        }
    }

    /// Runs one reconciliation. On shutdown it gets the grace period to finish.
    async fn dispatch(&self, event: &ReconcileEvent, shutdown: &CancellationToken) -> ControlFlow<()> {
        let mut work = pin!(reconcile_with_retry(event, &self.ctx));

        let cancelled = select! {
            biased;
            _ = &mut work => false,
            () = shutdown.cancelled() => true,
        };

        if !cancelled {
            return ControlFlow::Continue(());
        }

        info!(name = event.name(), "Waiting for in-flight reconciliation before shutting down.");

        if timeout(self.grace, work).await.is_err() {
            warn!(name = event.name(), "Abandoned in-flight reconciliation after grace period.");
        }

        ControlFlow::Break(())
    }
}
