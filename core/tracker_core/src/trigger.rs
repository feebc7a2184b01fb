use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    clock::{date_string, Clock},
    report::{ReportError, Reporter},
    store::{get_string, KvStore},
};

pub const LAST_REPORT_DATE_KEY: &str = "last_report_date";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    /// No cursor yet; it now points at today and nothing was sent.
    Initialized,
    Unchanged,
    /// The day rolled over and a report for `date` was attempted.
    Dispatched {
        date: String,
        result: Result<(), ReportError>,
    },
}

/// Compares the report cursor with `today` and reports the cursor's day when
/// they differ. The cursor moves to `today` whether or not delivery worked.
pub async fn check_and_send_report(
    store: &dyn KvStore,
    reporter: &Reporter,
    today: &str,
) -> anyhow::Result<CursorCheck> {
    let Some(last) = get_string(store, LAST_REPORT_DATE_KEY).await? else {
        store
            .set(LAST_REPORT_DATE_KEY, Value::String(today.to_string()))
            .await?;
        info!("report cursor initialized to {today}");
        return Ok(CursorCheck::Initialized);
    };
    if last == today {
        return Ok(CursorCheck::Unchanged);
    }

    info!("Date changed from {last} to {today}. Generating report.");
    let result = reporter.generate_and_send(&last).await;
    if let Err(err) = &result {
        error!("report for {last} failed: {err}");
    }
    store
        .set(LAST_REPORT_DATE_KEY, Value::String(today.to_string()))
        .await?;
    Ok(CursorCheck::Dispatched { date: last, result })
}

/// Runs the cursor check every `period`. The first check happens one period
/// after start.
pub fn spawn_report_timer(
    store: Arc<dyn KvStore>,
    reporter: Arc<Reporter>,
    clock: Arc<dyn Clock>,
    tz: time::UtcOffset,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let today = date_string(clock.now(), tz);
            if let Err(err) = check_and_send_report(store.as_ref(), &reporter, &today).await {
                error!("report check failed: {err:#}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        session::SessionRecord,
        store::{append_session, SqliteStore},
        test_support::{at, RecordingSink},
    };

    async fn seeded(fail: bool) -> (Arc<SqliteStore>, Arc<RecordingSink>, Reporter) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        append_session(
            store.as_ref(),
            "2024-01-01",
            &SessionRecord {
                url: "https://a/".into(),
                title: "A".into(),
                start_time: 0,
                end_time: 1000,
                duration_ms: 1000,
            },
        )
        .await
        .unwrap();
        let sink = Arc::new(if fail {
            RecordingSink::failing(ReportError::Server("502 Bad Gateway".into()))
        } else {
            RecordingSink::default()
        });
        let reporter = Reporter::new(store.clone(), sink.clone());
        (store, sink, reporter)
    }

    #[tokio::test]
    async fn first_run_initializes_without_sending() {
        let (store, sink, reporter) = seeded(false).await;
        let out = check_and_send_report(store.as_ref(), &reporter, "2024-01-01")
            .await
            .unwrap();
        assert_eq!(out, CursorCheck::Initialized);
        assert!(sink.dates().await.is_empty());
        assert_eq!(
            get_string(store.as_ref(), LAST_REPORT_DATE_KEY).await.unwrap().as_deref(),
            Some("2024-01-01")
        );
    }

    #[tokio::test]
    async fn day_change_dispatches_once_then_same_day_is_noop() {
        let (store, sink, reporter) = seeded(false).await;
        store
            .set(LAST_REPORT_DATE_KEY, Value::String("2024-01-01".into()))
            .await
            .unwrap();

        let out = check_and_send_report(store.as_ref(), &reporter, "2024-01-02")
            .await
            .unwrap();
        assert_eq!(
            out,
            CursorCheck::Dispatched {
                date: "2024-01-01".into(),
                result: Ok(())
            }
        );
        let again = check_and_send_report(store.as_ref(), &reporter, "2024-01-02")
            .await
            .unwrap();
        assert_eq!(again, CursorCheck::Unchanged);
        assert_eq!(sink.dates().await, vec!["2024-01-01".to_string()]);
        assert_eq!(
            get_string(store.as_ref(), LAST_REPORT_DATE_KEY).await.unwrap().as_deref(),
            Some("2024-01-02")
        );
    }

    #[tokio::test]
    async fn cursor_advances_even_when_delivery_fails() {
        let (store, sink, reporter) = seeded(true).await;
        store
            .set(LAST_REPORT_DATE_KEY, Value::String("2024-01-01".into()))
            .await
            .unwrap();

        let out = check_and_send_report(store.as_ref(), &reporter, "2024-01-02")
            .await
            .unwrap();
        assert!(matches!(out, CursorCheck::Dispatched { result: Err(_), .. }));
        assert_eq!(
            check_and_send_report(store.as_ref(), &reporter, "2024-01-02")
                .await
                .unwrap(),
            CursorCheck::Unchanged
        );
        assert_eq!(sink.dates().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_previous_day_still_advances() {
        let (store, sink, reporter) = seeded(false).await;
        store
            .set(LAST_REPORT_DATE_KEY, Value::String("2023-12-31".into()))
            .await
            .unwrap();
        let out = check_and_send_report(store.as_ref(), &reporter, "2024-01-01")
            .await
            .unwrap();
        assert_eq!(
            out,
            CursorCheck::Dispatched {
                date: "2023-12-31".into(),
                result: Err(ReportError::NoActivity)
            }
        );
        assert!(sink.dates().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_reports_after_midnight() {
        let (store, sink, reporter) = seeded(false).await;
        let clock = Arc::new(ManualClock::new(at("2024-01-01T23:50:00Z")));
        let handle = spawn_report_timer(
            store.clone(),
            Arc::new(reporter),
            clock.clone(),
            time::UtcOffset::UTC,
            Duration::from_secs(15 * 60),
        );

        // First tick initializes the cursor to 2024-01-01.
        tokio::time::sleep(Duration::from_secs(15 * 60 + 1)).await;
        assert!(sink.dates().await.is_empty());

        clock.set(at("2024-01-02T00:10:00Z"));
        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(sink.dates().await, vec!["2024-01-01".to_string()]);
        handle.abort();
    }
}
