//! ExternalClipboardTool: read the primary selection directly.
//!
//! Used where synthetic input cannot reach other clients. Highlighted
//! text is already in the primary selection, so nothing is injected
//! and the clipboard is never written.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CaptureResult, CaptureStrategy, SelectionCapturer, WindowLookup};
use crate::clipboard::{ClipboardArbiter, Selection, read_preferred_image};
use crate::error::PipelineError;

pub struct ExternalClipboardTool {
    arbiter: Arc<ClipboardArbiter>,
    window: Arc<dyn WindowLookup>,
}

impl ExternalClipboardTool {
    pub fn new(arbiter: Arc<ClipboardArbiter>, window: Arc<dyn WindowLookup>) -> Self {
        Self { arbiter, window }
    }
}

#[async_trait]
impl SelectionCapturer for ExternalClipboardTool {
    fn strategy(&self) -> CaptureStrategy {
        CaptureStrategy::ExternalClipboardTool
    }

    async fn capture(&self) -> Result<CaptureResult, PipelineError> {
        let source = self.window.active().await;

        let (text, image) = self
            .arbiter
            .with_read_access(|backend| -> Result<_, PipelineError> {
                if let Some(text) = backend.read_text(Selection::Primary)? {
                    return Ok((Some(text), None));
                }
                // Nothing highlighted: fall back to what the user copied.
                let image = read_preferred_image(backend, Selection::Clipboard)?;
                let text = backend.read_text(Selection::Clipboard)?;
                Ok((text, image))
            })
            .await?;

        let result = CaptureResult {
            text: text.unwrap_or_default(),
            images: image.into_iter().collect(),
            source,
        };
        tracing::info!(
            chars = result.text.chars().count(),
            images = result.images.len(),
            source = %result.source.title,
            "selection read"
        );
        Ok(result)
    }
}
