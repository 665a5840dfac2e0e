//! Worker pool that runs queued projects.
//!
//! Projects are enqueued by id and run by at most `concurrency`
//! [`VariantOrchestrator::run_project`] calls at a time. Every queued
//! project gets its own cancellation token, a child of the shutdown token:
//!
//! - [`RunQueue::cancel`] fires one project's token; once its in-flight
//!   variant finishes the run is finalized as cancelled.
//! - Firing the shutdown token stops every run between variants and leaves
//!   the projects `generating` for restart recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use posecraft_core::types::DbId;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{RunOutcome, VariantOrchestrator};

struct ActiveRun {
    token: CancellationToken,
    cancel_requested: bool,
}

type ActiveRuns = Arc<Mutex<HashMap<DbId, ActiveRun>>>;

/// Handle for submitting and cancelling project runs.
#[derive(Clone)]
pub struct RunQueue {
    sender: mpsc::UnboundedSender<DbId>,
    active: ActiveRuns,
    shutdown: CancellationToken,
    concurrency: usize,
}

impl RunQueue {
    /// Spawn the pool. The returned handle completes after `shutdown` fires
    /// and every in-flight run has returned.
    pub fn start(
        orchestrator: Arc<VariantOrchestrator>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let active: ActiveRuns = Arc::default();
        let queue = Self {
            sender,
            active: Arc::clone(&active),
            shutdown: shutdown.clone(),
            concurrency,
        };
        let handle = tokio::spawn(pool_loop(orchestrator, receiver, active, concurrency, shutdown));
        (queue, handle)
    }

    /// Queue a project. Returns `false` when it is already queued or
    /// running, or the pool has shut down.
    pub fn enqueue(&self, project_id: DbId) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        {
            let mut active = lock(&self.active);
            if active.contains_key(&project_id) {
                return false;
            }
            active.insert(
                project_id,
                ActiveRun {
                    token: self.shutdown.child_token(),
                    cancel_requested: false,
                },
            );
        }
        if self.sender.send(project_id).is_err() {
            lock(&self.active).remove(&project_id);
            return false;
        }
        tracing::debug!(project_id, "Project queued");
        true
    }

    /// Stop dispatching new variants for a queued or running project.
    /// Returns `false` when the project is not in the queue.
    pub fn cancel(&self, project_id: DbId) -> bool {
        let mut active = lock(&self.active);
        match active.get_mut(&project_id) {
            Some(run) => {
                run.cancel_requested = true;
                run.token.cancel();
                tracing::info!(project_id, "Project cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, project_id: DbId) -> bool {
        lock(&self.active).contains_key(&project_id)
    }

    /// Queued plus running projects.
    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many more projects can be taken without waiting for a slot.
    pub fn free_slots(&self) -> usize {
        self.concurrency.saturating_sub(self.len())
    }
}

fn lock(active: &ActiveRuns) -> std::sync::MutexGuard<'_, HashMap<DbId, ActiveRun>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pool_loop(
    orchestrator: Arc<VariantOrchestrator>,
    mut receiver: mpsc::UnboundedReceiver<DbId>,
    active: ActiveRuns,
    concurrency: usize,
    shutdown: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(concurrency));
    let mut runs = JoinSet::new();
    tracing::info!(concurrency, "Run queue started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Project run task panicked");
                }
            }
            next = receiver.recv() => {
                let Some(project_id) = next else { break };
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&slots).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let orchestrator = Arc::clone(&orchestrator);
                let active = Arc::clone(&active);
                runs.spawn(async move {
                    run_one(&orchestrator, &active, project_id).await;
                    drop(permit);
                });
            }
        }
    }

    tracing::info!(in_flight = runs.len(), "Run queue draining");
    while let Some(joined) = runs.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Project run task panicked");
        }
    }
    tracing::info!("Run queue stopped");
}

async fn run_one(orchestrator: &VariantOrchestrator, active: &ActiveRuns, project_id: DbId) {
    let token = match lock(active).get(&project_id) {
        Some(run) => run.token.clone(),
        None => return,
    };

    let outcome = orchestrator.run_project(project_id, &token).await;
    let cancel_requested = lock(active)
        .remove(&project_id)
        .map(|run| run.cancel_requested)
        .unwrap_or(false);

    match outcome {
        Ok(RunOutcome::Interrupted { remaining }) if cancel_requested => {
            if let Err(e) = orchestrator.finalize_cancelled(project_id).await {
                tracing::error!(project_id, error = %e, "Failed to finalize cancelled project");
            } else {
                tracing::info!(project_id, skipped = remaining, "Cancelled project finalized");
            }
        }
        Ok(RunOutcome::Interrupted { remaining }) => {
            tracing::info!(project_id, remaining, "Project left for recovery");
        }
        Ok(outcome) => {
            tracing::debug!(project_id, ?outcome, "Project run finished");
        }
        Err(e) => {
            tracing::error!(project_id, error = %e, "Project run failed");
        }
    }
}
