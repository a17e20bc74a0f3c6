//! Wayland key injection through `wtype` or `ydotool`.
//!
//! Wayland has no portable way to synthesize input for other clients.
//! `wtype` uses the virtual-keyboard protocol (wlroots compositors);
//! `ydotool` writes to uinput and works anywhere its daemon runs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::KeyInjector;
use crate::capture::SourceApplication;
use crate::error::PipelineError;

const TOOL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chord {
    Copy,
    Paste,
}

impl Chord {
    fn wtype_args(self) -> Vec<&'static str> {
        let key = match self {
            Chord::Copy => "c",
            Chord::Paste => "v",
        };
        vec!["-M", "ctrl", "-k", key, "-m", "ctrl"]
    }

    /// Linux input event codes: KEY_LEFTCTRL 29, KEY_C 46, KEY_V 47.
    fn ydotool_args(self) -> Vec<&'static str> {
        match self {
            Chord::Copy => vec!["key", "29:1", "46:1", "46:0", "29:0"],
            Chord::Paste => vec!["key", "29:1", "47:1", "47:0", "29:0"],
        }
    }
}

/// Tries `wtype`, then `ydotool`.
#[derive(Debug, Default)]
pub struct WaylandInjector;

impl WaylandInjector {
    pub fn new() -> Self {
        Self
    }

    async fn send(&self, chord: Chord) -> Result<(), String> {
        let mut failures = Vec::new();
        for (tool, args) in [("wtype", chord.wtype_args()), ("ydotool", chord.ydotool_args())] {
            match run_tool(tool, &args).await {
                Ok(()) => {
                    tracing::trace!(tool, ?chord, "chord injected");
                    return Ok(());
                }
                Err(reason) => {
                    tracing::debug!(tool, %reason, "injection tool failed");
                    failures.push(format!("{tool}: {reason}"));
                }
            }
        }
        Err(failures.join("; "))
    }
}

async fn run_tool(tool: &str, args: &[&str]) -> Result<(), String> {
    let child = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(TOOL_TIMEOUT, child).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(format!("exited with {status}")),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timed out".into()),
    }
}

#[async_trait]
impl KeyInjector for WaylandInjector {
    fn name(&self) -> &'static str {
        "wayland"
    }

    async fn send_copy(&self) -> Result<(), PipelineError> {
        self.send(Chord::Copy)
            .await
            .map_err(|e| PipelineError::Capture(format!("cannot inject copy: {e}")))
    }

    async fn send_paste(&self) -> Result<(), PipelineError> {
        self.send(Chord::Paste)
            .await
            .map_err(|e| PipelineError::Delivery(format!("cannot inject paste: {e}")))
    }

    async fn activate(&self, source: &SourceApplication) -> Result<(), PipelineError> {
        // No cross-compositor activation protocol; focus normally never
        // left the source because paste-back opens no window.
        tracing::trace!(title = %source.title, "activation skipped on Wayland");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wtype_releases_control() {
        assert_eq!(
            Chord::Paste.wtype_args(),
            ["-M", "ctrl", "-k", "v", "-m", "ctrl"]
        );
    }

    #[test]
    fn ydotool_presses_and_releases() {
        assert_eq!(Chord::Copy.ydotool_args()[2], "46:1");
        assert_eq!(Chord::Paste.ydotool_args()[3], "47:0");
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let err = run_tool("scrivd-no-such-injector", &[]).await.unwrap_err();
        assert!(!err.is_empty());
    }
}
