//! Background project dispatcher.
//!
//! Polls storage every `poll_interval` and hands pending projects to the
//! [`RunQueue`]. Claiming is atomic (`pending -> generating`) so several
//! workers can share one database without running a project twice.
//!
//! With a lease timeout set, each cycle first returns to `pending` any
//! `generating` project whose heartbeat has lapsed, so runs abandoned by a
//! crashed worker are picked up again without a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use posecraft_core::error::CoreError;
use posecraft_db::{InterruptedReset, Store};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::queue::RunQueue;

pub struct ProjectDispatcher {
    store: Arc<dyn Store>,
    queue: RunQueue,
    poll_interval: Duration,
    lease_timeout: Option<Duration>,
}

impl ProjectDispatcher {
    pub fn new(store: Arc<dyn Store>, queue: RunQueue, poll_interval: Duration) -> Self {
        Self {
            store,
            queue,
            poll_interval,
            lease_timeout: None,
        }
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = Some(lease_timeout);
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Project dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Project dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_stale().await {
                        tracing::error!(error = %e, "Lease recovery failed");
                    }
                    if let Err(e) = self.try_dispatch().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// Reset runs whose lease lapsed more than one lease timeout ago.
    /// Does nothing without a lease timeout.
    pub async fn recover_stale(&self) -> Result<InterruptedReset, PipelineError> {
        let Some(lease) = self.lease_timeout else {
            return Ok(InterruptedReset::default());
        };
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| CoreError::Validation(format!("lease timeout out of range: {e}")))?;
        let reset = self.store.reset_interrupted(Utc::now() - lease).await?;
        if reset.projects > 0 || reset.variants > 0 {
            tracing::warn!(
                projects = reset.projects,
                variants = reset.variants,
                "Recovered runs with a lapsed lease",
            );
        }
        Ok(reset)
    }

    /// One dispatch cycle: claim as many projects as the queue has free
    /// slots. Returns how many were queued.
    pub async fn try_dispatch(&self) -> Result<usize, PipelineError> {
        let mut queued = 0;
        for _ in 0..self.queue.free_slots() {
            let Some(project) = self.store.claim_next_pending_project().await? else {
                break;
            };
            if self.queue.enqueue(project.id) {
                tracing::info!(project_id = project.id, name = %project.name, "Project claimed");
                queued += 1;
            } else {
                tracing::warn!(project_id = project.id, "Claimed project could not be queued");
            }
        }
        Ok(queued)
    }
}
