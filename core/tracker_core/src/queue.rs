use anyhow::anyhow;
use std::{future::Future, pin::Pin};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

struct QueuedJob {
    label: &'static str,
    job: Job,
}

/// Single-worker FIFO executor. Every job runs to completion, including all of
/// its awaits, before the next one starts. A job that fails or panics is
/// logged and the worker moves on.
#[derive(Clone)]
pub struct SequentialQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
}

impl SequentialQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(receiver));
        Self { sender }
    }

    pub fn enqueue<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let queued = QueuedJob {
            label,
            job: Box::pin(job),
        };
        if self.sender.send(queued).is_err() {
            error!("sequential queue worker is gone; dropping {label}");
        }
    }

    /// Enqueues `job` and waits for its output.
    pub async fn submit<F, T>(&self, label: &'static str, job: F) -> anyhow::Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(label, async move {
            let out = job.await;
            if reply_tx.send(out).is_err() {
                debug!("{label} caller dropped before receiving result");
            }
            anyhow::Ok(())
        });
        reply_rx
            .await
            .map_err(|_| anyhow!("queued job {label} did not complete"))
    }

    /// Resolves once every job enqueued before this call has finished.
    pub async fn drain(&self) -> anyhow::Result<()> {
        self.submit("drain", async {}).await
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<QueuedJob>) {
    while let Some(QueuedJob { label, job }) = receiver.recv().await {
        // Each job runs in its own task so a panic surfaces as a JoinError
        // instead of taking the worker down.
        match tokio::spawn(job).await {
            Ok(Ok(())) => debug!("{label} done"),
            Ok(Err(err)) => error!("{label} failed: {err:#}"),
            Err(join_err) => error!("{label} aborted: {join_err}"),
        }
    }
    info!("sequential queue closed");
}
