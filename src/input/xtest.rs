//! XTEST key injection on X11.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use x11rb::protocol::xproto::{Keysym, Window};

use super::KeyInjector;
use crate::capture::SourceApplication;
use crate::error::PipelineError;
use crate::x11::{X11Error, X11Session};

const XK_CONTROL_L: Keysym = 0xffe3;
const XK_C: Keysym = 0x0063;
const XK_V: Keysym = 0x0076;

const RELEASE_POLL: Duration = Duration::from_millis(10);

/// Injects Control+C / Control+V through the XTEST extension.
pub struct XTestInjector {
    session: Arc<X11Session>,
    control: u8,
    key_c: u8,
    key_v: u8,
    release_timeout: Duration,
}

impl XTestInjector {
    /// Fails when XTEST is missing or the keys are unmapped.
    pub fn new(session: Arc<X11Session>, release_timeout: Duration) -> Result<Self, X11Error> {
        if !session.has_xtest()? {
            return Err(X11Error::NoXTest);
        }
        Ok(Self {
            control: session.keycode_for(XK_CONTROL_L)?,
            key_c: session.keycode_for(XK_C)?,
            key_v: session.keycode_for(XK_V)?,
            session,
            release_timeout,
        })
    }

    /// Wait until the user lets go of the hotkey's modifiers.
    ///
    /// A still-held Alt or Shift would turn Control+C into a different
    /// chord. Gives up silently after `release_timeout`.
    async fn wait_for_release(&self) {
        let deadline = Instant::now() + self.release_timeout;
        loop {
            match self.session.pressed_modifiers() {
                Ok(0) => return,
                Ok(held) => {
                    if Instant::now() >= deadline {
                        tracing::debug!(held = format_args!("0x{held:04x}"), "modifiers still held, injecting anyway");
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "query_pointer failed");
                    return;
                }
            }
            tokio::time::sleep(RELEASE_POLL).await;
        }
    }

    fn chord(&self, key: u8) -> Result<(), X11Error> {
        self.session.fake_key(self.control, true)?;
        self.session.fake_key(key, true)?;
        self.session.fake_key(key, false)?;
        self.session.fake_key(self.control, false)?;
        self.session.flush()
    }
}

#[async_trait]
impl KeyInjector for XTestInjector {
    fn name(&self) -> &'static str {
        "xtest"
    }

    async fn send_copy(&self) -> Result<(), PipelineError> {
        self.wait_for_release().await;
        self.chord(self.key_c)?;
        tracing::trace!("copy chord injected");
        Ok(())
    }

    async fn send_paste(&self) -> Result<(), PipelineError> {
        self.wait_for_release().await;
        self.chord(self.key_v)
            .map_err(|e| PipelineError::Delivery(format!("X11: {e}")))?;
        tracing::trace!("paste chord injected");
        Ok(())
    }

    async fn activate(&self, source: &SourceApplication) -> Result<(), PipelineError> {
        let Some(window) = source.window_id else {
            return Ok(());
        };
        let active = self.session.active_window().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "active window unknown");
            None
        });
        if !focus_moved(active, window) {
            tracing::trace!(window, "source window still focused");
            return Ok(());
        }
        self.session
            .activate(window)
            .map_err(|e| PipelineError::Delivery(format!("X11: {e}")))?;
        tracing::debug!(window, title = %source.title, "source window activated");
        Ok(())
    }
}

/// True unless `source` is known to hold focus already.
fn focus_moved(active: Option<Window>, source: Window) -> bool {
    active != Some(source)
}
