//! SyntheticCopy: inject the copy chord and poll the clipboard.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;

use super::{CaptureResult, CaptureStrategy, SelectionCapturer, WindowLookup};
use crate::clipboard::{ClipboardArbiter, ClipboardGuard, ClipboardImage};
use crate::config::CaptureConfig;
use crate::error::PipelineError;
use crate::input::KeyInjector;

pub struct SyntheticCopy {
    arbiter: Arc<ClipboardArbiter>,
    injector: Arc<dyn KeyInjector>,
    window: Arc<dyn WindowLookup>,
    timings: CaptureConfig,
}

#[derive(Debug, Default)]
struct Selection {
    text: Option<String>,
    image: Option<ClipboardImage>,
}

impl Selection {
    fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none()
    }
}

impl SyntheticCopy {
    pub fn new(
        arbiter: Arc<ClipboardArbiter>,
        injector: Arc<dyn KeyInjector>,
        window: Arc<dyn WindowLookup>,
        timings: CaptureConfig,
    ) -> Self {
        Self {
            arbiter,
            injector,
            window,
            timings,
        }
    }

    /// One scoped attempt: clear, inject copy, poll until `settle`.
    async fn attempt(&self, settle: Duration) -> Result<Selection, PipelineError> {
        let injector = Arc::clone(&self.injector);
        let poll = self.timings.poll_interval();

        // A restore failure was already logged by the arbiter and never
        // discards what was captured.
        self.arbiter
            .with_exclusive_clipboard(move |guard| {
                async move {
                    guard.clear()?;
                    injector.send_copy().await?;
                    poll_for_selection(guard, settle, poll).await
                }
                .boxed()
            })
            .await
            .result
    }
}

/// Poll until text or an image shows up, or `settle` elapses.
async fn poll_for_selection(
    guard: &ClipboardGuard,
    settle: Duration,
    poll: Duration,
) -> Result<Selection, PipelineError> {
    let deadline = Instant::now() + settle;
    loop {
        let selection = Selection {
            text: guard.read_text()?,
            image: guard.read_image()?,
        };
        if !selection.is_empty() {
            return Ok(selection);
        }
        if Instant::now() >= deadline {
            tracing::debug!(settle_ms = settle.as_millis() as u64, "nothing copied within settle bound");
            return Ok(selection);
        }
        tokio::time::sleep(poll).await;
    }
}

#[async_trait]
impl SelectionCapturer for SyntheticCopy {
    fn strategy(&self) -> CaptureStrategy {
        CaptureStrategy::SyntheticCopy
    }

    async fn capture(&self) -> Result<CaptureResult, PipelineError> {
        let source = self.window.active().await;

        let mut selection = self.attempt(self.timings.settle()).await?;
        if selection.is_empty()
            && let Some(retry) = self.timings.retry_settle()
        {
            tracing::debug!(retry_ms = retry.as_millis() as u64, "retrying capture with longer settle");
            selection = self.attempt(retry).await?;
        }

        let result = CaptureResult {
            text: selection.text.unwrap_or_default(),
            images: selection.image.into_iter().collect(),
            source,
        };
        tracing::info!(
            chars = result.text.chars().count(),
            images = result.images.len(),
            source = %result.source.title,
            "selection captured"
        );
        Ok(result)
    }
}
