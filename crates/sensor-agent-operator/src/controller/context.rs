use crate::retry::RetryPolicy;

/// Handles shared by every reconciliation, built once at startup.
pub struct Context<C, S> {
    workloads: C,
    status: S,
    retry: RetryPolicy,
}

impl<C, S> Context<C, S> {
    pub fn new(workloads: C, status: S, retry: RetryPolicy) -> Self {
        Self {
            workloads,
            status,
            retry,
        }
    }

    pub fn workloads(&self) -> &C {
        &self.workloads
    }

    pub fn status(&self) -> &S {
        &self.status
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
