use anyhow::Context;
use std::{sync::Arc, time::Duration};
use time::UtcOffset;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{date_string, Clock},
    oracle::{FocusOracle, IdleState, TabInfo},
    session::{Session, SessionRecord, SessionView},
    store::{append_session, KvStore},
};

#[derive(Clone, Copy, Debug)]
pub struct TrackerSettings {
    /// Seconds of inactivity before the user counts as idle.
    pub idle_threshold: Duration,
    /// Pause before re-sampling so bursts of browser events settle.
    pub settle_delay: Duration,
    /// Offset used to pick the calendar day a finished session belongs to.
    pub tz_offset: UtcOffset,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(60),
            settle_delay: Duration::from_millis(100),
            tz_offset: UtcOffset::UTC,
        }
    }
}

/// Owns the single current-session slot.
///
/// Callers must run [`Tracker::handle_state_change`] and
/// [`Tracker::close_current`] through the sequential queue; the slot itself
/// only guarantees that a close never observes a half-closed session.
pub struct Tracker {
    current: Mutex<Option<Session>>,
    oracle: Arc<dyn FocusOracle>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
}

impl Tracker {
    pub fn new(
        oracle: Arc<dyn FocusOracle>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            current: Mutex::new(None),
            oracle,
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub async fn current_view(&self) -> Option<SessionView> {
        let now = self.clock.now();
        self.current.lock().await.as_ref().map(|s| s.view(now))
    }

    /// Closes the open session, if any, and persists it under the day it ended.
    /// The slot is cleared before any await so a concurrent reader never sees a
    /// session that is already being closed.
    pub async fn close_current(&self) -> anyhow::Result<Option<SessionRecord>> {
        let Some(session) = self.current.lock().await.take() else {
            return Ok(None);
        };

        let end = self.clock.now();
        let title = session.title.clone();
        let Some(record) = session.close(end) else {
            debug!("discarding zero-length session: {title}");
            return Ok(None);
        };

        let date = date_string(end, self.settings.tz_offset);
        append_session(self.store.as_ref(), &date, &record)
            .await
            .with_context(|| format!("failed to save session ({} ms) for {date}", record.duration_ms))?;
        info!("saved session ({} ms): {title}", record.duration_ms);
        Ok(Some(record))
    }

    /// One full transition: close, re-sample, decide.
    pub async fn handle_state_change(&self) -> anyhow::Result<()> {
        // A lost record must not stop tracking from resuming.
        if let Err(err) = self.close_current().await {
            error!("{err:#}");
        }

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let tab = match self.oracle.active_tab().await? {
            Some(tab) if tab.active => tab,
            _ => {
                info!("tracking paused (no active tab)");
                return Ok(());
            }
        };

        // Unknown window means the tab went away between the two reads.
        let focused = self
            .oracle
            .window_focused(tab.window_id)
            .await?
            .unwrap_or(false);
        let idle = self.oracle.idle_state(self.settings.idle_threshold).await?;

        if focused && idle == IdleState::Active {
            self.open(tab).await;
        } else {
            info!("tracking paused (focused={focused}, idle={idle:?})");
        }
        Ok(())
    }

    async fn open(&self, tab: TabInfo) {
        let Some(url) = tab.url.filter(|u| !u.trim().is_empty()) else {
            info!("tracking paused (active tab {} has no url yet)", tab.id);
            return;
        };
        let session = Session::new(url, tab.title.unwrap_or_default(), self.clock.now());
        info!("started session: {}", session.title);

        let mut slot = self.current.lock().await;
        if let Some(stale) = slot.replace(session) {
            warn!("replaced a session that was never closed: {}", stale.url);
        }
    }
}
