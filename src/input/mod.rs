//! Synthetic key input: the copy/paste chords and window activation.
//!
//! Capture injects the platform copy chord into whatever application
//! holds focus; delivery re-activates the source application and
//! injects paste. [`KeyInjector`] hides whether that goes through XTEST
//! or a Wayland helper tool.

#[cfg(test)]
pub mod fake;
pub mod wayland;
pub mod xtest;

use async_trait::async_trait;

use crate::capture::SourceApplication;
use crate::error::PipelineError;

pub use wayland::WaylandInjector;
pub use xtest::XTestInjector;

/// Sends copy/paste chords to the focused application.
///
/// `send_copy` failures are capture errors; `send_paste` and
/// `activate` failures are delivery errors.
#[async_trait]
pub trait KeyInjector: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn send_copy(&self) -> Result<(), PipelineError>;

    async fn send_paste(&self) -> Result<(), PipelineError>;

    /// Bring `source` back to the foreground. A source without a
    /// window id is left as is.
    async fn activate(&self, source: &SourceApplication) -> Result<(), PipelineError>;
}
