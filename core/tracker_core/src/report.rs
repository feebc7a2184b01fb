use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

use crate::{
    profile::{self, UserProfile},
    session::SessionRecord,
    store::{load_sessions, KvStore},
    webhook::ReportSink,
};

const RULE: &str = "-----------------------------------";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("No activity recorded for today yet.")]
    NoActivity,
    #[error("Webhook URL not configured")]
    NotConfigured,
    #[error("Server error: {0}")]
    Server(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Reply shape of a report request: `{success, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), ReportError>> for ReportOutcome {
    fn from(r: Result<(), ReportError>) -> Self {
        match r {
            Ok(()) => ReportOutcome {
                success: true,
                error: None,
            },
            Err(err) => ReportOutcome {
                success: false,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedEntry {
    pub url: String,
    pub title: String,
    pub duration_ms: i64,
}

/// Scheme + host + path + query; the fragment is dropped so in-page
/// navigation (e.g. `#inbox` vs `#sent`) groups under one page. Host and
/// scheme are lowercased and default ports removed. Strings that do not look
/// like `scheme://…` only lose their fragment.
pub fn normalize_url(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or(raw);
    let Some((scheme, rest)) = without_fragment.split_once("://") else {
        return without_fragment.to_string();
    };
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return without_fragment.to_string();
    }

    let scheme = scheme.to_ascii_lowercase();
    let split_at = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split_at);
    let host = authority
        .rsplit_once('@')
        .map(|(_, h)| h)
        .unwrap_or(authority)
        .to_ascii_lowercase();
    let host = match (scheme.as_str(), host.rsplit_once(':')) {
        ("http", Some((h, "80"))) | ("https", Some((h, "443"))) => h.to_string(),
        _ => host,
    };

    let path_and_query = if tail.is_empty() || tail.starts_with('?') {
        format!("/{tail}")
    } else {
        tail.to_string()
    };
    format!("{scheme}://{host}{path_and_query}")
}

/// Groups by normalized URL, keeping the most recently seen title. Sorted by
/// total duration descending, then URL.
pub fn aggregate(records: &[SessionRecord]) -> Vec<AggregatedEntry> {
    let mut by_url: HashMap<String, AggregatedEntry> = HashMap::new();
    for r in records {
        let url = normalize_url(&r.url);
        let entry = by_url.entry(url.clone()).or_insert_with(|| AggregatedEntry {
            url,
            title: String::new(),
            duration_ms: 0,
        });
        if !r.title.trim().is_empty() {
            entry.title = r.title.clone();
        }
        entry.duration_ms = entry.duration_ms.saturating_add(r.duration_ms);
    }

    let mut out: Vec<AggregatedEntry> = by_url.into_values().collect();
    out.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms).then_with(|| a.url.cmp(&b.url)));
    out
}

/// `HHh MMm SSs`, truncating sub-second remainders.
pub fn format_duration(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{hours:02}h {minutes:02}m {seconds:02}s")
}

pub fn render(date: &str, user: &UserProfile, entries: &[AggregatedEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Daily browsing report for {date}\n\n"));
    out.push_str(&format!("Name: {}\n", user.name.as_deref().unwrap_or("Unknown")));
    out.push_str(&format!(
        "Email: {}\n",
        user.email.as_deref().unwrap_or("Not logged in")
    ));
    out.push_str(&format!("Phone: {}\n", user.phone.as_deref().unwrap_or("N/A")));
    out.push_str(RULE);
    out.push_str("\n\n");

    for e in entries {
        let title = if e.title.trim().is_empty() {
            "(untitled)"
        } else {
            e.title.as_str()
        };
        out.push_str(&format!(
            "{} - {title} ({})\n",
            format_duration(e.duration_ms),
            e.url
        ));
    }

    let total = entries
        .iter()
        .fold(0i64, |acc, e| acc.saturating_add(e.duration_ms));
    out.push('\n');
    out.push_str(RULE);
    out.push_str(&format!("\nTOTAL TIME: {}\n", format_duration(total)));
    out
}

/// Reads a day's sessions, formats the report and hands it to the sink.
pub struct Reporter {
    store: Arc<dyn KvStore>,
    sink: Arc<dyn ReportSink>,
}

impl Reporter {
    pub fn new(store: Arc<dyn KvStore>, sink: Arc<dyn ReportSink>) -> Self {
        Self { store, sink }
    }

    pub async fn preview(&self, date: &str) -> Result<String, ReportError> {
        let records = load_sessions(self.store.as_ref(), date)
            .await
            .map_err(|e| ReportError::Storage(format!("{e:#}")))?;
        if records.is_empty() {
            info!("No sessions found for {date}. Skipping report.");
            return Err(ReportError::NoActivity);
        }
        let user = profile::load(self.store.as_ref())
            .await
            .map_err(|e| ReportError::Storage(format!("{e:#}")))?;
        Ok(render(date, &user, &aggregate(&records)))
    }

    pub async fn generate_and_send(&self, date: &str) -> Result<(), ReportError> {
        let body = self.preview(date).await?;
        info!("sending report for {date} ({} bytes)", body.len());
        self.sink.deliver(date, &body).await
    }
}
