//! Source-application lookup.
//!
//! On X11 the active window comes from `_NET_ACTIVE_WINDOW`. Wayland
//! has no common protocol for it, so a chain of compositor-specific
//! tools is tried in order and the first answer wins. Every failure
//! is soft: the chain ends in a placeholder title.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::SourceApplication;
use crate::x11::X11Session;

/// Title used when no lookup strategy succeeds on Wayland.
pub const WAYLAND_PLACEHOLDER: &str = "<Wayland>";

const TOOL_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait WindowLookup: Send + Sync {
    async fn active(&self) -> SourceApplication;
}

/// `_NET_ACTIVE_WINDOW` plus its `_NET_WM_NAME`.
pub struct X11Windows {
    session: Arc<X11Session>,
}

impl X11Windows {
    pub fn new(session: Arc<X11Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl WindowLookup for X11Windows {
    async fn active(&self) -> SourceApplication {
        let window_id = match self.session.active_window() {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(error = %e, "active window lookup failed");
                None
            }
        };
        let title = window_id
            .and_then(|w| self.session.window_title(w).ok().flatten())
            .unwrap_or_default();
        SourceApplication { window_id, title }
    }
}

/// Compositor tool chain for Wayland.
pub struct WaylandWindows {
    desktop: String,
}

impl WaylandWindows {
    pub fn from_env() -> Self {
        Self {
            desktop: std::env::var("XDG_CURRENT_DESKTOP")
                .unwrap_or_default()
                .to_ascii_lowercase(),
        }
    }

    async fn lookup(&self) -> Option<(&'static str, String)> {
        if let Some(t) = tool_output("wlrctl", &["toplevel", "list", "--json"])
            .await
            .and_then(|o| parse_wlrctl(&o))
        {
            return Some(("wlrctl", t));
        }
        if let Some(t) = tool_output("kdotool", &["getactivewindow", "getwindowname"]).await {
            return Some(("kdotool", t));
        }
        for service in ["org.kde.KWin", "org.kde.kwin"] {
            if let Some(t) = tool_output("qdbus", &[service, "/KWin", "org.kde.KWin.activeWindowTitle"]).await {
                return Some(("qdbus", t));
            }
        }
        if let Some(t) = tool_output("swaymsg", &["-t", "get_tree"])
            .await
            .and_then(|o| parse_sway_tree(&o))
        {
            return Some(("swaymsg", t));
        }
        if let Some(t) = tool_output("hyprctl", &["activewindow", "-j"])
            .await
            .and_then(|o| parse_hyprctl(&o))
        {
            return Some(("hyprctl", t));
        }
        if self.desktop.contains("cinnamon")
            && let Some(t) = tool_output(
                "gdbus",
                &[
                    "call",
                    "--session",
                    "--dest",
                    "org.Cinnamon",
                    "--object-path",
                    "/org/Cinnamon",
                    "--method",
                    "org.Cinnamon.GetActiveWindow",
                ],
            )
            .await
            .and_then(|o| parse_gdbus_string(&o))
        {
            return Some(("gdbus", t));
        }
        None
    }
}

#[async_trait]
impl WindowLookup for WaylandWindows {
    async fn active(&self) -> SourceApplication {
        let title = match self.lookup().await {
            Some((tool, title)) => {
                tracing::trace!(tool, %title, "active window title");
                title
            }
            None => WAYLAND_PLACEHOLDER.to_string(),
        };
        SourceApplication {
            window_id: None,
            title,
        }
    }
}

/// Fixed answer, for tests.
#[cfg(test)]
pub struct FixedWindow(pub SourceApplication);

#[cfg(test)]
#[async_trait]
impl WindowLookup for FixedWindow {
    async fn active(&self) -> SourceApplication {
        self.0.clone()
    }
}

/// Trimmed stdout of a successful run, or `None`.
async fn tool_output(tool: &str, args: &[&str]) -> Option<String> {
    let run = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(TOOL_TIMEOUT, run).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Title of the toplevel whose state is "activated".
fn parse_wlrctl(json: &str) -> Option<String> {
    let tops: Vec<Value> = serde_json::from_str(json).ok()?;
    tops.iter()
        .find(|t| t.get("state").and_then(Value::as_str) == Some("activated"))
        .and_then(|t| non_empty(t.get("title").and_then(Value::as_str)))
}

/// Name of the focused node, searched depth-first.
fn parse_sway_tree(json: &str) -> Option<String> {
    fn focused(node: &Value) -> Option<&Value> {
        if node.get("focused").and_then(Value::as_bool) == Some(true) {
            return Some(node);
        }
        ["nodes", "floating_nodes"]
            .iter()
            .filter_map(|k| node.get(*k).and_then(Value::as_array))
            .flatten()
            .find_map(focused)
    }

    let tree: Value = serde_json::from_str(json).ok()?;
    non_empty(focused(&tree)?.get("name").and_then(Value::as_str))
}

fn parse_hyprctl(json: &str) -> Option<String> {
    let window: Value = serde_json::from_str(json).ok()?;
    non_empty(window.get("title").and_then(Value::as_str))
}

/// gdbus prints GVariant tuples like `('Firefox',)`.
fn parse_gdbus_string(out: &str) -> Option<String> {
    let inner = out.trim().trim_start_matches('(').trim_end_matches(')');
    let inner = inner.trim_end_matches(',').trim();
    non_empty(Some(inner.trim_matches(|c| c == '\'' || c == '"')))
}
