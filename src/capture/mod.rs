//! SelectionCapturer: pull the user's selection out of the focused
//! application.
//!
//! Two strategies share one contract:
//!
//! - [`SyntheticCopy`] injects the copy chord inside an exclusive
//!   clipboard scope and polls for the result (X11).
//! - [`ExternalClipboardTool`] reads the primary selection through a
//!   helper tool without injecting anything (Wayland).
//!
//! [`probe`] picks one at startup; it is never re-probed per call.

pub mod external;
pub mod synthetic;
pub mod window;

use std::sync::Arc;

use async_trait::async_trait;

use crate::clipboard::xclip::XclipBackend;
use crate::clipboard::wayland::WlClipboardBackend;
use crate::clipboard::{ClipboardArbiter, ClipboardBackend, ClipboardImage};
use crate::config::CaptureConfig;
use crate::error::PipelineError;
use crate::input::{KeyInjector, WaylandInjector, XTestInjector};
use crate::x11::X11Session;

pub use external::ExternalClipboardTool;
pub use synthetic::SyntheticCopy;
pub use window::{WAYLAND_PLACEHOLDER, WaylandWindows, WindowLookup, X11Windows};

/// Opaque handle to the application the selection came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceApplication {
    /// X11 window id; `None` where the platform exposes no handle.
    pub window_id: Option<u32>,
    pub title: String,
}

/// What one hotkey trigger captured. Empty is a valid outcome.
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    pub text: String,
    /// At most one image: formats are never merged.
    pub images: Vec<ClipboardImage>,
    pub source: SourceApplication,
}

impl CaptureResult {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

/// Which capture mechanism the platform supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    SyntheticCopy,
    ExternalClipboardTool,
}

#[async_trait]
pub trait SelectionCapturer: Send + Sync {
    fn strategy(&self) -> CaptureStrategy;

    /// Capture the current selection. An empty selection is `Ok`.
    async fn capture(&self) -> Result<CaptureResult, PipelineError>;
}

/// Display server detected from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    X11,
    Wayland,
}

/// Environment facts probing depends on.
#[derive(Debug, Clone, Default)]
pub struct ProbeEnv {
    pub display: Option<String>,
    pub wayland_display: Option<String>,
    pub session_type: Option<String>,
    pub has_wl_paste: bool,
}

impl ProbeEnv {
    pub fn from_process() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            display: var("DISPLAY"),
            wayland_display: var("WAYLAND_DISPLAY"),
            session_type: var("XDG_SESSION_TYPE"),
            has_wl_paste: on_path("wl-paste"),
        }
    }

    /// Wayland sessions win over XWayland's `DISPLAY`: XTEST cannot
    /// reach native Wayland clients.
    pub fn display_server(&self) -> Result<DisplayServer, PipelineError> {
        let wayland = self.wayland_display.is_some()
            || self.session_type.as_deref() == Some("wayland");
        if wayland && self.has_wl_paste {
            return Ok(DisplayServer::Wayland);
        }
        if self.display.is_some() {
            return Ok(DisplayServer::X11);
        }
        if wayland {
            return Err(PipelineError::Capture(
                "Wayland session without wl-paste; install wl-clipboard".into(),
            ));
        }
        Err(PipelineError::Capture(
            "no display server found (neither DISPLAY nor WAYLAND_DISPLAY is set)".into(),
        ))
    }
}

/// Platform services chosen once at startup.
pub struct Platform {
    pub arbiter: Arc<ClipboardArbiter>,
    pub injector: Arc<dyn KeyInjector>,
    pub capturer: Arc<dyn SelectionCapturer>,
    /// Shared X11 connection, for the hotkey grabber.
    pub x11: Option<Arc<X11Session>>,
}

/// Probe capabilities and build the matching capture strategy.
pub fn probe(env: &ProbeEnv, timings: &CaptureConfig) -> Result<Platform, PipelineError> {
    let server = env.display_server()?;
    tracing::info!(?server, "display server detected");

    match server {
        DisplayServer::X11 => {
            let session = Arc::new(X11Session::connect()?);
            let injector: Arc<dyn KeyInjector> = Arc::new(XTestInjector::new(
                Arc::clone(&session),
                timings.modifier_release_timeout(),
            )?);
            let backend: Arc<dyn ClipboardBackend> = Arc::new(XclipBackend::new());
            let arbiter = Arc::new(ClipboardArbiter::new(backend, timings.scope_timeout()));
            let capturer = Arc::new(SyntheticCopy::new(
                Arc::clone(&arbiter),
                Arc::clone(&injector),
                Arc::new(X11Windows::new(Arc::clone(&session))),
                timings.clone(),
            ));
            Ok(Platform {
                arbiter,
                injector,
                capturer,
                x11: Some(session),
            })
        }
        DisplayServer::Wayland => {
            let backend: Arc<dyn ClipboardBackend> = Arc::new(WlClipboardBackend::new());
            let arbiter = Arc::new(ClipboardArbiter::new(backend, timings.scope_timeout()));
            let capturer = Arc::new(ExternalClipboardTool::new(
                Arc::clone(&arbiter),
                Arc::new(WaylandWindows::from_env()),
            ));
            // DISPLAY under Wayland is XWayland; grabbing there still
            // sees the hotkey while an XWayland client has focus.
            let x11 = env
                .display
                .as_ref()
                .and_then(|_| X11Session::connect().ok())
                .map(Arc::new);
            Ok(Platform {
                arbiter,
                injector: Arc::new(WaylandInjector::new()),
                capturer,
                x11,
            })
        }
    }
}

/// True when `tool` is an executable file on `$PATH`.
pub fn on_path(tool: &str) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                std::fs::metadata(dir.join(tool))
                    .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
