//! In-process task queue.
//!
//! `enqueue(stage, item_id)` hands work to a dispatcher task, which runs
//! handlers on a bounded worker pool. Retryable failures are re-enqueued
//! with exponential backoff; exhausted or terminal failures go to the
//! handler's `fail` hook. The queue only moves messages, it knows nothing
//! about item state.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::ImportError;
use crate::pipeline::state::Stage;

#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, stage: Stage, item_id: Uuid) -> Result<(), ImportError>;

    /// Called once a stage gives up, with the error that ended it
    async fn fail(&self, stage: Stage, item_id: Uuid, error: ImportError);
}

#[derive(Debug, Clone, Copy)]
struct Task {
    stage: Stage,
    item_id: Uuid,
    attempt: u32,
}

pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Task>,
    /// Tasks queued, running or sleeping before a retry
    outstanding: Arc<watch::Sender<usize>>,
}

impl TaskQueue {
    /// Spawn the dispatcher. Must be called from within a Tokio runtime.
    ///
    /// The handler is held weakly so a handler that owns its queue can be dropped.
    pub fn start(handler: Weak<dyn StageHandler>, workers: usize, retry: RetryConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);

        tokio::spawn(dispatch(
            receiver,
            sender.downgrade(),
            handler,
            Arc::new(Semaphore::new(workers.max(1))),
            retry,
            outstanding.clone(),
        ));

        TaskQueue {
            sender,
            outstanding,
        }
    }

    pub fn enqueue(&self, stage: Stage, item_id: Uuid) -> Result<(), ImportError> {
        self.outstanding.send_modify(|n| *n += 1);
        let task = Task {
            stage,
            item_id,
            attempt: 0,
        };
        if self.sender.send(task).is_err() {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            return Err(ImportError::QueueClosed);
        }
        debug!("Enqueued {} for item {}", stage, item_id);
        Ok(())
    }

    /// Number of tasks not yet finished
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Resolve once nothing is queued, running or waiting for a retry
    pub async fn wait_idle(&self) {
        let mut idle = self.outstanding.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = idle.wait_for(|n| *n == 0).await;
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Task>,
    requeue: mpsc::WeakUnboundedSender<Task>,
    handler: Weak<dyn StageHandler>,
    workers: Arc<Semaphore>,
    retry: RetryConfig,
    outstanding: Arc<watch::Sender<usize>>,
) {
    while let Some(task) = receiver.recv().await {
        let Ok(permit) = workers.clone().acquire_owned().await else {
            break;
        };
        let Some(handler) = handler.upgrade() else {
            debug!("Stage handler dropped, stopping dispatcher");
            break;
        };
        let requeue = requeue.clone();
        let retry = retry.clone();
        let outstanding = outstanding.clone();

        tokio::spawn(async move {
            let result = handler.handle(task.stage, task.item_id).await;
            drop(permit);

            match result {
                Ok(()) => {}
                Err(e) if e.is_retryable() && task.attempt < retry.max_retries => {
                    let delay = retry.delay_for(task.attempt);
                    warn!(
                        "{} for item {} failed (attempt {}), retrying in {:?}: {}",
                        task.stage,
                        task.item_id,
                        task.attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    let next = Task {
                        attempt: task.attempt + 1,
                        ..task
                    };
                    // still outstanding; the retry carries the count
                    if let Some(sender) = requeue.upgrade() {
                        if sender.send(next).is_ok() {
                            return;
                        }
                    }
                    error!("Queue closed before {} could be retried", task.stage);
                    handler.fail(task.stage, task.item_id, e).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(
                            "{} for item {} failed after {} attempts: {}",
                            task.stage,
                            task.item_id,
                            task.attempt + 1,
                            e
                        );
                    }
                    handler.fail(task.stage, task.item_id, e).await;
                }
            }
            outstanding.send_modify(|n| *n = n.saturating_sub(1));
        });
    }
}
