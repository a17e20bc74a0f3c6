//! Paste a result back into the application it came from.
//!
//! The only place paste chords are injected. The user's clipboard is
//! borrowed for the paste and restored when the scope closes.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::capture::SourceApplication;
use crate::clipboard::ClipboardArbiter;
use crate::error::PipelineError;
use crate::input::KeyInjector;

pub struct ResultDeliverer {
    arbiter: Arc<ClipboardArbiter>,
    injector: Arc<dyn KeyInjector>,
    /// Time the target gets to read the clipboard after the paste chord.
    paste_settle: Duration,
}

impl ResultDeliverer {
    pub fn new(
        arbiter: Arc<ClipboardArbiter>,
        injector: Arc<dyn KeyInjector>,
        paste_settle: Duration,
    ) -> Self {
        Self {
            arbiter,
            injector,
            paste_settle,
        }
    }

    /// Paste `text` into `source`.
    ///
    /// Returns the restore warning, if the original clipboard could not
    /// be put back. The paste itself still happened in that case.
    pub async fn deliver(
        &self,
        text: &str,
        source: &SourceApplication,
    ) -> Result<Option<PipelineError>, PipelineError> {
        let text = text.to_string();
        let source = source.clone();
        let injector = Arc::clone(&self.injector);
        let settle = self.paste_settle;

        let scoped = self
            .arbiter
            .with_exclusive_clipboard(move |guard| {
                async move {
                    guard.write_text(&text)?;
                    if let Err(e) = injector.activate(&source).await {
                        tracing::warn!(
                            window = ?source.window_id,
                            title = %source.title,
                            error = %e,
                            "could not re-activate source window"
                        );
                    }
                    injector.send_paste().await?;
                    tokio::time::sleep(settle).await;
                    tracing::info!(
                        chars = text.chars().count(),
                        title = %source.title,
                        injector = injector.name(),
                        "result pasted"
                    );
                    Ok(())
                }
                .boxed()
            })
            .await;

        scoped.result?;
        Ok(scoped.restore_warning)
    }
}
