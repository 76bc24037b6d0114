//! Background categorization of a user's uncategorized transactions.

use std::sync::Arc;

use tokio::{
    sync::mpsc::{self, Receiver, Sender, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    categorization::{Categorize, stores::TransactionStore},
    database_id::UserId,
};

/// A request to categorize everything a user has not categorized yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorizationJob {
    pub user_id: UserId,
}

/// The sending half of the bounded job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: Sender<CategorizationJob>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs, and the receiver the
    /// worker reads from.
    pub fn new(capacity: usize) -> (Self, Receiver<CategorizationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Add a job to the queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [Error::JobQueueFull] if the queue is at capacity and
    /// [Error::JobQueueClosed] if the worker has stopped.
    pub fn enqueue(&self, job: CategorizationJob) -> Result<(), Error> {
        self.sender.try_send(job).map_err(|error| match error {
            TrySendError::Full(_) => Error::JobQueueFull,
            TrySendError::Closed(_) => Error::JobQueueClosed,
        })
    }
}

/// Spawn a task that runs queued jobs one at a time.
///
/// The task stops once every [JobQueue] has been dropped or `cancellation`
/// fires. A job that is running when `cancellation` fires is stopped before
/// its next stage.
pub fn spawn_categorization_worker(
    mut receiver: Receiver<CategorizationJob>,
    categorizer: Arc<dyn Categorize>,
    transactions: Arc<dyn TransactionStore>,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Categorization worker started");

        loop {
            let job = tokio::select! {
                _ = cancellation.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            run_job(job, categorizer.as_ref(), transactions.as_ref(), &cancellation).await;
        }

        tracing::info!("Categorization worker stopped");
    })
}

async fn run_job(
    job: CategorizationJob,
    categorizer: &dyn Categorize,
    transactions: &dyn TransactionStore,
    cancellation: &CancellationToken,
) {
    let uncategorized = match transactions.get_uncategorized_for_user(job.user_id) {
        Ok(uncategorized) => uncategorized,
        Err(error) => {
            tracing::error!(
                "Could not load uncategorized transactions for user {}: {error}",
                job.user_id
            );
            return;
        }
    };

    if uncategorized.is_empty() {
        tracing::debug!("User {} has no uncategorized transactions", job.user_id);
        return;
    }

    let result = categorizer
        .categorize_with_cancellation(uncategorized, cancellation)
        .await;

    tracing::info!(
        "Background categorization for user {}: {} auto-applied, {} candidates, {} remaining",
        job.user_id,
        result.auto_applied.len(),
        result.candidates.len(),
        result.remaining_transactions.len()
    );
}
