use async_trait::async_trait;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;

use crate::{report::ReportError, webhook::ReportSink};

pub(crate) fn at(s: &str) -> OffsetDateTime {
    OffsetDateTime::parse(s, &Rfc3339).unwrap()
}

/// Keeps every delivered report; answers with `fail` when set.
#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<(String, String)>>,
    fail: Option<ReportError>,
}

impl RecordingSink {
    pub(crate) fn failing(err: ReportError) -> Self {
        Self {
            fail: Some(err),
            ..Self::default()
        }
    }

    pub(crate) async fn dates(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(d, _)| d.clone()).collect()
    }

    pub(crate) async fn bodies(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn deliver(&self, date: &str, body: &str) -> Result<(), ReportError> {
        self.sent
            .lock()
            .await
            .push((date.to_string(), body.to_string()));
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
