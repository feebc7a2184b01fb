use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    clock::{date_string, Clock},
    oracle::{BrowserEvent, BrowserMirror},
    queue::SequentialQueue,
    report::{ReportOutcome, Reporter},
    store::KvStore,
    tracker::Tracker,
};

/// Wires browser events, the tracker and the reporter together. Everything
/// that touches the session slot goes through `queue`.
#[derive(Clone)]
pub struct TrackerService {
    tracker: Arc<Tracker>,
    queue: SequentialQueue,
    mirror: Arc<BrowserMirror>,
    reporter: Arc<Reporter>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl TrackerService {
    pub fn new(
        tracker: Arc<Tracker>,
        queue: SequentialQueue,
        mirror: Arc<BrowserMirror>,
        reporter: Arc<Reporter>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            queue,
            mirror,
            reporter,
            store,
            clock,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub fn today(&self) -> String {
        date_string(self.clock.now(), self.tracker.settings().tz_offset)
    }

    /// Updates the browser mirror and, for events that can change what the
    /// user is looking at, enqueues a state change. Returns whether one was
    /// enqueued.
    pub async fn ingest(&self, event: BrowserEvent) -> bool {
        self.mirror.apply(&event).await;
        if !event.triggers_state_change() {
            debug!("{} applied without a state change", event.name());
            return false;
        }
        self.queue_state_change();
        true
    }

    pub fn queue_state_change(&self) {
        let tracker = self.tracker.clone();
        self.queue
            .enqueue("state_change", async move { tracker.handle_state_change().await });
    }

    /// Manual trigger: closes the open session, reports today, then lets
    /// tracking resume.
    pub async fn send_report_now(&self) -> ReportOutcome {
        let tracker = self.tracker.clone();
        let reporter = self.reporter.clone();
        let clock = self.clock.clone();
        let res = self
            .queue
            .submit("send_report_now", async move {
                if let Err(err) = tracker.close_current().await {
                    error!("{err:#}");
                }
                let today = date_string(clock.now(), tracker.settings().tz_offset);
                reporter.generate_and_send(&today).await
            })
            .await;
        self.queue_state_change();

        match res {
            Ok(result) => result.into(),
            Err(err) => {
                error!("Manual report error: {err:#}");
                ReportOutcome {
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Closes and persists the open session. Waits for every job queued
    /// before it.
    pub async fn flush(&self) {
        let tracker = self.tracker.clone();
        match self
            .queue
            .submit("flush", async move { tracker.close_current().await })
            .await
        {
            Ok(Ok(Some(record))) => info!("flushed open session ({} ms)", record.duration_ms),
            Ok(Ok(None)) => debug!("nothing to flush"),
            Ok(Err(err)) | Err(err) => error!("flush failed: {err:#}"),
        }
    }

    pub async fn drain(&self) -> anyhow::Result<()> {
        self.queue.drain().await
    }
}
