use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::sync::Mutex;

/// Window id the browser reports when focus moved to a non-browser window.
pub const WINDOW_ID_NONE: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: i64,
    #[serde(rename = "windowId")]
    pub window_id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Ground truth about what the user is looking at.
#[async_trait]
pub trait FocusOracle: Send + Sync {
    /// Active tab of the last-focused browser window.
    async fn active_tab(&self) -> anyhow::Result<Option<TabInfo>>;
    /// `None` when the window is unknown (e.g. closed since the tab was read).
    async fn window_focused(&self, window_id: i64) -> anyhow::Result<Option<bool>>;
    async fn idle_state(&self, threshold: Duration) -> anyhow::Result<IdleState>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChangeInfo {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Raw browser events as forwarded by the extension.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrowserEvent {
    TabActivated {
        #[serde(rename = "tabId")]
        tab_id: i64,
        #[serde(rename = "windowId")]
        window_id: i64,
    },
    TabUpdated {
        #[serde(rename = "tabId")]
        tab_id: i64,
        #[serde(rename = "changeInfo", default)]
        change_info: ChangeInfo,
        tab: TabInfo,
    },
    TabRemoved {
        #[serde(rename = "tabId")]
        tab_id: i64,
    },
    WindowFocusChanged {
        #[serde(rename = "windowId")]
        window_id: i64,
    },
    IdleStateChanged {
        state: IdleState,
    },
    /// Full browser state. The extension sends it when it starts and every
    /// time it reconnects to the daemon, because the browser raises no focus
    /// event for a window that already has focus.
    Snapshot {
        #[serde(rename = "focusedWindowId")]
        focused_window_id: i64,
        #[serde(default)]
        tabs: Vec<TabInfo>,
        #[serde(default = "default_idle")]
        idle: IdleState,
    },
}

fn default_idle() -> IdleState {
    IdleState::Active
}

impl BrowserEvent {
    /// Whether this event should run a tracking transition. Tab updates only
    /// count once the active tab finished loading or navigated.
    pub fn triggers_state_change(&self) -> bool {
        match self {
            BrowserEvent::TabActivated { .. }
            | BrowserEvent::WindowFocusChanged { .. }
            | BrowserEvent::IdleStateChanged { .. }
            | BrowserEvent::Snapshot { .. } => true,
            BrowserEvent::TabUpdated {
                change_info, tab, ..
            } => {
                let loaded = change_info.status.as_deref() == Some("complete");
                let navigated = change_info.url.is_some();
                (loaded || navigated) && tab.active
            }
            BrowserEvent::TabRemoved { .. } => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserEvent::TabActivated { .. } => "tab_activated",
            BrowserEvent::TabUpdated { .. } => "tab_updated",
            BrowserEvent::TabRemoved { .. } => "tab_removed",
            BrowserEvent::WindowFocusChanged { .. } => "window_focus_changed",
            BrowserEvent::IdleStateChanged { .. } => "idle_state_changed",
            BrowserEvent::Snapshot { .. } => "snapshot",
        }
    }
}

struct MirrorState {
    tabs: HashMap<i64, TabInfo>,
    // window id -> focused
    windows: HashMap<i64, bool>,
    last_focused_window: Option<i64>,
    // False until a focus event or snapshot says which window has focus.
    focus_known: bool,
    idle: IdleState,
}

/// In-memory copy of the browser's tab/window/idle state, fed by
/// [`BrowserEvent`]s. The idle threshold is applied by the reporting browser,
/// so the mirror returns the last reported idle state as-is.
pub struct BrowserMirror {
    inner: Mutex<MirrorState>,
}

impl Default for BrowserMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserMirror {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MirrorState {
                tabs: HashMap::new(),
                windows: HashMap::new(),
                last_focused_window: None,
                focus_known: false,
                idle: IdleState::Active,
            }),
        }
    }

    pub async fn apply(&self, event: &BrowserEvent) {
        let mut s = self.inner.lock().await;
        match event {
            BrowserEvent::TabActivated { tab_id, window_id } => {
                s.windows.entry(*window_id).or_insert(false);
                for tab in s.tabs.values_mut().filter(|t| t.window_id == *window_id) {
                    tab.active = false;
                }
                let tab = s.tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    id: *tab_id,
                    window_id: *window_id,
                    url: None,
                    title: None,
                    active: true,
                });
                tab.window_id = *window_id;
                tab.active = true;
                // Only the user can activate tabs, and only in the window they
                // are in, so this is the best guess until focus is reported.
                if !s.focus_known {
                    s.windows.insert(*window_id, true);
                    s.last_focused_window = Some(*window_id);
                }
            }
            BrowserEvent::TabUpdated { tab_id, tab, .. } => {
                s.windows.entry(tab.window_id).or_insert(false);
                if tab.active {
                    for other in s
                        .tabs
                        .values_mut()
                        .filter(|t| t.window_id == tab.window_id && t.id != *tab_id)
                    {
                        other.active = false;
                    }
                }
                let entry = s.tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    id: *tab_id,
                    window_id: tab.window_id,
                    url: None,
                    title: None,
                    active: false,
                });
                entry.window_id = tab.window_id;
                entry.active = tab.active;
                if tab.url.is_some() {
                    entry.url = tab.url.clone();
                }
                if tab.title.is_some() {
                    entry.title = tab.title.clone();
                }
            }
            BrowserEvent::TabRemoved { tab_id } => {
                s.tabs.remove(tab_id);
            }
            BrowserEvent::WindowFocusChanged { window_id } => {
                for focused in s.windows.values_mut() {
                    *focused = false;
                }
                if *window_id != WINDOW_ID_NONE {
                    s.windows.insert(*window_id, true);
                    s.last_focused_window = Some(*window_id);
                }
                s.focus_known = true;
            }
            BrowserEvent::IdleStateChanged { state } => {
                s.idle = *state;
            }
            BrowserEvent::Snapshot {
                focused_window_id,
                tabs,
                idle,
            } => {
                s.tabs = tabs.iter().map(|t| (t.id, t.clone())).collect();
                s.windows = tabs.iter().map(|t| (t.window_id, false)).collect();
                s.last_focused_window = None;
                if *focused_window_id != WINDOW_ID_NONE {
                    s.windows.insert(*focused_window_id, true);
                    s.last_focused_window = Some(*focused_window_id);
                }
                s.focus_known = true;
                s.idle = *idle;
            }
        }
    }
}

#[async_trait]
impl FocusOracle for BrowserMirror {
    async fn active_tab(&self) -> anyhow::Result<Option<TabInfo>> {
        let s = self.inner.lock().await;
        let Some(window_id) = s.last_focused_window else {
            return Ok(None);
        };
        Ok(s
            .tabs
            .values()
            .find(|t| t.window_id == window_id && t.active)
            .cloned())
    }

    async fn window_focused(&self, window_id: i64) -> anyhow::Result<Option<bool>> {
        Ok(self.inner.lock().await.windows.get(&window_id).copied())
    }

    async fn idle_state(&self, _threshold: Duration) -> anyhow::Result<IdleState> {
        Ok(self.inner.lock().await.idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn updated(tab_id: i64, window_id: i64, url: &str, active: bool, status: &str) -> BrowserEvent {
        BrowserEvent::TabUpdated {
            tab_id,
            change_info: ChangeInfo {
                status: Some(status.to_string()),
                url: None,
            },
            tab: TabInfo {
                id: tab_id,
                window_id,
                url: Some(url.to_string()),
                title: Some(format!("title {tab_id}")),
                active,
            },
        }
    }

    #[test]
    fn parses_extension_payloads() {
        let e: BrowserEvent = serde_json::from_value(json!({
            "v": 1,
            "event": "tab_updated",
            "tabId": 7,
            "changeInfo": {"status": "complete"},
            "tab": {"id": 7, "windowId": 2, "url": "https://a/x", "title": "A", "active": true}
        }))
        .unwrap();
        assert!(e.triggers_state_change());
        assert_eq!(e.name(), "tab_updated");

        let e: BrowserEvent =
            serde_json::from_value(json!({"event": "idle_state_changed", "state": "locked"}))
                .unwrap();
        assert_eq!(
            e,
            BrowserEvent::IdleStateChanged {
                state: IdleState::Locked
            }
        );

        assert!(serde_json::from_value::<BrowserEvent>(json!({"event": "bogus"})).is_err());
    }

    #[test]
    fn tab_updates_trigger_only_when_loaded_or_navigated_and_active() {
        assert!(updated(1, 1, "https://a", true, "complete").triggers_state_change());
        assert!(!updated(1, 1, "https://a", true, "loading").triggers_state_change());
        assert!(!updated(1, 1, "https://a", false, "complete").triggers_state_change());

        let navigated = BrowserEvent::TabUpdated {
            tab_id: 1,
            change_info: ChangeInfo {
                status: Some("loading".to_string()),
                url: Some("https://b".to_string()),
            },
            tab: TabInfo {
                id: 1,
                window_id: 1,
                url: Some("https://b".to_string()),
                title: None,
                active: true,
            },
        };
        assert!(navigated.triggers_state_change());
        assert!(!BrowserEvent::TabRemoved { tab_id: 1 }.triggers_state_change());
    }

    #[tokio::test]
    async fn mirror_tracks_active_tab_of_last_focused_window() {
        let m = BrowserMirror::new();
        m.apply(&updated(1, 10, "https://a", true, "complete")).await;
        m.apply(&updated(2, 10, "https://b", false, "complete")).await;
        m.apply(&updated(3, 20, "https://c", true, "complete")).await;
        assert_eq!(m.active_tab().await.unwrap(), None, "no window focused yet");

        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 10 }).await;
        assert_eq!(m.active_tab().await.unwrap().unwrap().id, 1);
        assert_eq!(m.window_focused(10).await.unwrap(), Some(true));

        m.apply(&BrowserEvent::TabActivated {
            tab_id: 2,
            window_id: 10,
        })
        .await;
        let tab = m.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.id, 2);
        assert_eq!(tab.url.as_deref(), Some("https://b"));

        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 20 }).await;
        assert_eq!(m.active_tab().await.unwrap().unwrap().id, 3);
        assert_eq!(m.window_focused(10).await.unwrap(), Some(false));
        assert_eq!(m.window_focused(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn focus_leaving_the_browser_keeps_last_window_but_unfocuses_it() {
        let m = BrowserMirror::new();
        m.apply(&updated(1, 10, "https://a", true, "complete")).await;
        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 10 }).await;
        m.apply(&BrowserEvent::WindowFocusChanged {
            window_id: WINDOW_ID_NONE,
        })
        .await;

        let tab = m.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.id, 1);
        assert_eq!(m.window_focused(tab.window_id).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn snapshot_replaces_mirror_state() {
        let m = BrowserMirror::new();
        m.apply(&updated(9, 30, "https://stale", true, "complete")).await;
        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 30 }).await;

        let e: BrowserEvent = serde_json::from_value(json!({
            "v": 1,
            "event": "snapshot",
            "focusedWindowId": 2,
            "tabs": [
                {"id": 1, "windowId": 1, "url": "https://a", "title": "A", "active": true},
                {"id": 4, "windowId": 2, "url": "https://b", "title": "B", "active": true}
            ],
            "idle": "active"
        }))
        .unwrap();
        assert!(e.triggers_state_change());
        m.apply(&e).await;

        let tab = m.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.id, 4);
        assert_eq!(m.window_focused(2).await.unwrap(), Some(true));
        assert_eq!(m.window_focused(1).await.unwrap(), Some(false));
        assert_eq!(m.window_focused(30).await.unwrap(), None);

        m.apply(&BrowserEvent::Snapshot {
            focused_window_id: WINDOW_ID_NONE,
            tabs: vec![],
            idle: IdleState::Locked,
        })
        .await;
        assert_eq!(m.active_tab().await.unwrap(), None);
        assert_eq!(
            m.idle_state(Duration::from_secs(60)).await.unwrap(),
            IdleState::Locked
        );
    }

    #[tokio::test]
    async fn tab_activation_before_any_focus_report_implies_focus() {
        let m = BrowserMirror::new();
        m.apply(&BrowserEvent::TabActivated {
            tab_id: 1,
            window_id: 1,
        })
        .await;
        m.apply(&updated(1, 1, "https://a/x", true, "complete")).await;
        let tab = m.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.url.as_deref(), Some("https://a/x"));
        assert_eq!(m.window_focused(1).await.unwrap(), Some(true));

        // Once focus has been reported, activation no longer moves it.
        m.apply(&BrowserEvent::WindowFocusChanged {
            window_id: WINDOW_ID_NONE,
        })
        .await;
        m.apply(&BrowserEvent::TabActivated {
            tab_id: 2,
            window_id: 1,
        })
        .await;
        assert_eq!(m.window_focused(1).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn removed_tab_and_idle_state() {
        let m = BrowserMirror::new();
        m.apply(&updated(1, 10, "https://a", true, "complete")).await;
        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 10 }).await;
        m.apply(&BrowserEvent::TabRemoved { tab_id: 1 }).await;
        assert_eq!(m.active_tab().await.unwrap(), None);

        let threshold = Duration::from_secs(60);
        assert_eq!(m.idle_state(threshold).await.unwrap(), IdleState::Active);
        m.apply(&BrowserEvent::IdleStateChanged {
            state: IdleState::Idle,
        })
        .await;
        assert_eq!(m.idle_state(threshold).await.unwrap(), IdleState::Idle);
    }

    #[tokio::test]
    async fn partial_update_keeps_known_url() {
        let m = BrowserMirror::new();
        m.apply(&updated(1, 10, "https://a", true, "complete")).await;
        m.apply(&BrowserEvent::TabUpdated {
            tab_id: 1,
            change_info: ChangeInfo::default(),
            tab: TabInfo {
                id: 1,
                window_id: 10,
                url: None,
                title: Some("renamed".to_string()),
                active: true,
            },
        })
        .await;
        m.apply(&BrowserEvent::WindowFocusChanged { window_id: 10 }).await;
        let tab = m.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.url.as_deref(), Some("https://a"));
        assert_eq!(tab.title.as_deref(), Some("renamed"));
    }
}
