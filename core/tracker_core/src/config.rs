use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::{
    clock::{normalize_tz_offset_minutes, tz_offset_from_minutes},
    tracker::TrackerSettings,
    webhook::WebhookConfig,
};

pub const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug, Clone)]
#[command(name = "tracker_core", version)]
pub struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    #[arg(long, default_value = "127.0.0.1:17700")]
    pub listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/tracker-core.db")]
    pub db: PathBuf,

    /// Optional JSON file with WEBHOOK_URL / SECRET_TOKEN.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report webhook. Overrides the config file.
    #[arg(long)]
    pub webhook_url: Option<String>,

    /// Shared token sent with every report. Overrides the config file.
    #[arg(long)]
    pub secret_token: Option<String>,

    /// Seconds without input before the user counts as idle.
    #[arg(long, default_value_t = 60)]
    pub idle_threshold_seconds: u64,

    /// Wait after a browser event before sampling focus.
    #[arg(long, default_value_t = 100)]
    pub settle_delay_ms: u64,

    /// How often to check whether the day rolled over.
    #[arg(long, default_value_t = 15)]
    pub report_check_minutes: u64,

    /// Offset from UTC used to decide which day a session belongs to.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub tz_offset_minutes: i32,
}

/// Layout of the optional config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(rename = "WEBHOOK_URL", default)]
    pub webhook_url: Option<String>,
    #[serde(rename = "SECRET_TOKEN", default)]
    pub secret_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Effective settings, as reported by `GET /settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub idle_threshold_seconds: u64,
    pub settle_delay_ms: u64,
    pub report_check_minutes: u64,
    pub tz_offset_minutes: i32,
    pub webhook_configured: bool,
}

impl Settings {
    pub fn tracker(&self) -> TrackerSettings {
        TrackerSettings {
            idle_threshold: Duration::from_secs(self.idle_threshold_seconds),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            tz_offset: tz_offset_from_minutes(self.tz_offset_minutes),
        }
    }

    pub fn report_check_period(&self) -> Duration {
        Duration::from_secs(self.report_check_minutes.max(1) * 60)
    }
}

/// Resolves the webhook target: CLI flags win over the config file. A
/// config file that cannot be read is logged and ignored.
pub fn resolve_webhook(args: &Args) -> WebhookConfig {
    let file = match &args.config {
        Some(path) => match FileConfig::load(path) {
            Ok(cfg) => {
                info!("Config loaded from {}", path.display());
                cfg
            }
            Err(err) => {
                warn!("{err:#}");
                FileConfig::default()
            }
        },
        None => FileConfig::default(),
    };
    WebhookConfig {
        url: args
            .webhook_url
            .clone()
            .or(file.webhook_url)
            .unwrap_or_default(),
        token: args
            .secret_token
            .clone()
            .or(file.secret_token)
            .unwrap_or_default(),
    }
}

pub fn settings_from_args(args: &Args, webhook: &WebhookConfig) -> Settings {
    Settings {
        idle_threshold_seconds: args.idle_threshold_seconds.max(15),
        settle_delay_ms: args.settle_delay_ms,
        report_check_minutes: args.report_check_minutes.max(1),
        tz_offset_minutes: normalize_tz_offset_minutes(args.tz_offset_minutes),
        webhook_configured: webhook.is_configured(),
    }
}

pub fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        if host == "localhost" || host.parse::<IpAddr>().is_ok() {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                    input,
                    DEFAULT_PORT
                )
            })?;
            let ip = host
                .parse::<IpAddr>()
                .unwrap_or(IpAddr::from([127, 0, 0, 1]));
            return Ok(SocketAddr::new(ip, port));
        }
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}
