//! ClipboardArbiter: serialized, self-restoring clipboard scopes.
//!
//! The system clipboard is the one shared mutable resource outside
//! process memory. A scope snapshots it on entry and rewrites the
//! snapshot on every exit path: normal return, error, timeout, panic,
//! or the enclosing future being dropped. The [`ClipboardGuard`]
//! carries the restore; its `Drop` impl is the safety net for the
//! paths that never reach the explicit [`ClipboardGuard::restore`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ClipboardBackend, ClipboardImage, Selection, read_preferred_image};
use crate::conversation::epoch_millis;
use crate::error::PipelineError;

/// Clipboard content as it was before a scope started.
///
/// Restoring writes back one representation: the image when there was
/// one, the text otherwise. A source offering both gets its image back
/// and loses the text alternative.
#[derive(Debug, Clone)]
pub struct ClipboardSnapshot {
    pub original_text: Option<String>,
    pub original_image: Option<ClipboardImage>,
    /// Unix epoch milliseconds.
    pub captured_at: u64,
    /// The backend failed while reading; there is nothing trustworthy
    /// to write back.
    read_failed: bool,
}

impl ClipboardSnapshot {
    fn take(backend: &dyn ClipboardBackend) -> Self {
        let captured_at = epoch_millis();
        let image = read_preferred_image(backend, Selection::Clipboard);
        let text = backend.read_text(Selection::Clipboard);

        match (image, text) {
            (Ok(original_image), Ok(original_text)) => Self {
                original_text,
                original_image,
                captured_at,
                read_failed: false,
            },
            (image, text) => {
                let error = image.err().or(text.err()).map(|e| e.to_string());
                tracing::warn!(backend = backend.name(), ?error, "clipboard snapshot failed");
                Self {
                    original_text: None,
                    original_image: None,
                    captured_at,
                    read_failed: true,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.original_text.is_none() && self.original_image.is_none()
    }
}

/// Result of a scoped operation plus any non-fatal restore failure.
#[derive(Debug)]
pub struct Scoped<T> {
    pub result: Result<T, PipelineError>,
    /// Set when the original content could not be written back. The
    /// result is still valid and is delivered regardless.
    pub restore_warning: Option<PipelineError>,
}

/// Owns exclusive access to the clipboard.
pub struct ClipboardArbiter {
    backend: Arc<dyn ClipboardBackend>,
    lock: Arc<Mutex<()>>,
    scope_timeout: Duration,
}

impl ClipboardArbiter {
    pub fn new(backend: Arc<dyn ClipboardBackend>, scope_timeout: Duration) -> Self {
        Self {
            backend,
            lock: Arc::new(Mutex::new(())),
            scope_timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Wait for exclusive access and snapshot the current content.
    ///
    /// Scopes never overlap: a second caller waits here until the
    /// previous guard has restored and dropped.
    pub async fn acquire(&self) -> ClipboardGuard {
        let permit = Arc::clone(&self.lock).lock_owned().await;
        let snapshot = ClipboardSnapshot::take(&*self.backend);
        tracing::trace!(
            backend = self.backend.name(),
            has_text = snapshot.original_text.is_some(),
            has_image = snapshot.original_image.is_some(),
            "clipboard scope entered"
        );
        ClipboardGuard {
            backend: Arc::clone(&self.backend),
            snapshot,
            restored: false,
            _permit: permit,
        }
    }

    /// Run `op` inside an exclusive scope bounded by the scope timeout.
    ///
    /// The clipboard equals its pre-scope content when this returns,
    /// unless restoring failed, which is reported in
    /// [`Scoped::restore_warning`] without discarding the result.
    pub async fn with_exclusive_clipboard<T, F>(&self, op: F) -> Scoped<T>
    where
        F: for<'g> FnOnce(&'g ClipboardGuard) -> BoxFuture<'g, Result<T, PipelineError>>,
    {
        let guard = self.acquire().await;

        let result = match tokio::time::timeout(self.scope_timeout, op(&guard)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::CaptureTimeout(format!(
                "clipboard scope exceeded {} ms",
                self.scope_timeout.as_millis()
            ))),
        };

        let restore_warning = guard.restore().err();
        if let Some(warning) = &restore_warning {
            tracing::warn!(error = %warning, "clipboard not restored");
        }

        Scoped {
            result,
            restore_warning,
        }
    }

    /// Serialized read-only access without snapshot or restore.
    ///
    /// For strategies that only read (the primary selection on
    /// Wayland) and never mutate the clipboard.
    pub async fn with_read_access<T>(&self, f: impl FnOnce(&dyn ClipboardBackend) -> T) -> T {
        let _permit = self.lock.lock().await;
        f(&*self.backend)
    }
}

/// Exclusive clipboard access; restores the snapshot when released.
pub struct ClipboardGuard {
    backend: Arc<dyn ClipboardBackend>,
    snapshot: ClipboardSnapshot,
    restored: bool,
    _permit: OwnedMutexGuard<()>,
}

impl ClipboardGuard {
    pub fn snapshot(&self) -> &ClipboardSnapshot {
        &self.snapshot
    }

    pub fn read_text(&self) -> Result<Option<String>, PipelineError> {
        Ok(self.backend.read_text(Selection::Clipboard)?)
    }

    /// First offered image in preference order, never more than one.
    pub fn read_image(&self) -> Result<Option<ClipboardImage>, PipelineError> {
        Ok(read_preferred_image(&*self.backend, Selection::Clipboard)?)
    }

    pub fn write_text(&self, text: &str) -> Result<(), PipelineError> {
        self.backend
            .write_text(text)
            .map_err(|e| PipelineError::Delivery(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), PipelineError> {
        Ok(self.backend.clear()?)
    }

    /// Clear the clipboard and rewrite the snapshot.
    pub fn restore(mut self) -> Result<(), PipelineError> {
        self.restored = true;
        restore_snapshot(&*self.backend, &self.snapshot)
    }
}

impl Drop for ClipboardGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = restore_snapshot(&*self.backend, &self.snapshot) {
            tracing::warn!(error = %e, "clipboard not restored after aborted scope");
        } else {
            tracing::debug!("clipboard restored after aborted scope");
        }
    }
}

fn restore_snapshot(
    backend: &dyn ClipboardBackend,
    snapshot: &ClipboardSnapshot,
) -> Result<(), PipelineError> {
    if snapshot.read_failed {
        return Err(PipelineError::ClipboardRestoreFailed(
            "original content could not be read".into(),
        ));
    }

    backend
        .clear()
        .and_then(|()| match (&snapshot.original_image, &snapshot.original_text) {
            (Some(image), text) => {
                if text.is_some() {
                    tracing::debug!(
                        format = ?image.format,
                        "clipboard held image and text; only the image is restored"
                    );
                }
                backend.write_image(image)
            }
            (None, Some(text)) => backend.write_text(text),
            (None, None) => Ok(()),
        })
        .map_err(|e| PipelineError::ClipboardRestoreFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ImageFormat;
    use crate::clipboard::fake::FakeClipboard;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arbiter(fake: &Arc<FakeClipboard>) -> ClipboardArbiter {
        ClipboardArbiter::new(
            Arc::clone(fake) as Arc<dyn ClipboardBackend>,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn text_restored_after_success() {
        let fake = Arc::new(FakeClipboard::with_text("original"));
        let arb = arbiter(&fake);

        let scoped = arb
            .with_exclusive_clipboard(|g| {
                async move {
                    g.clear()?;
                    g.write_text("scratch")?;
                    g.read_text()
                }
                .boxed()
            })
            .await;

        assert_eq!(scoped.result.unwrap().as_deref(), Some("scratch"));
        assert!(scoped.restore_warning.is_none());
        assert_eq!(fake.text().as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn image_restored_verbatim() {
        let fake = Arc::new(FakeClipboard::new());
        fake.offer_images(&[(ImageFormat::Png, vec![1, 2, 3])]);
        let arb = arbiter(&fake);

        let scoped = arb
            .with_exclusive_clipboard(|g| async move { g.write_text("x") }.boxed())
            .await;

        assert!(scoped.result.is_ok());
        assert_eq!(
            fake.images(),
            vec![ClipboardImage {
                format: ImageFormat::Png,
                bytes: vec![1, 2, 3]
            }]
        );
        assert_eq!(fake.text(), None);
    }

    #[test]
    fn image_wins_over_text_on_restore() {
        let fake = FakeClipboard::with_text("scratch");
        let snapshot = ClipboardSnapshot {
            original_text: Some("caption".into()),
            original_image: Some(ClipboardImage {
                format: ImageFormat::Png,
                bytes: vec![9, 9],
            }),
            captured_at: 0,
            read_failed: false,
        };

        restore_snapshot(&fake, &snapshot).unwrap();

        assert_eq!(fake.images(), vec![snapshot.original_image.clone().unwrap()]);
        assert_eq!(fake.text(), None);
    }

    #[tokio::test]
    async fn restored_when_operation_fails() {
        let fake = Arc::new(FakeClipboard::with_text("keep me"));
        let arb = arbiter(&fake);

        let scoped: Scoped<()> = arb
            .with_exclusive_clipboard(|g| {
                async move {
                    g.write_text("half-done")?;
                    Err(PipelineError::Capture("injection denied".into()))
                }
                .boxed()
            })
            .await;

        assert!(matches!(scoped.result, Err(PipelineError::Capture(_))));
        assert_eq!(fake.text().as_deref(), Some("keep me"));
    }

    #[tokio::test]
    async fn restored_when_operation_panics() {
        let fake = Arc::new(FakeClipboard::with_text("survives panic"));
        let arb = arbiter(&fake);

        let outcome = std::panic::AssertUnwindSafe(arb.with_exclusive_clipboard(|g| {
            async move {
                g.write_text("garbage")?;
                panic!("operation blew up");
                #[allow(unreachable_code)]
                Ok::<(), PipelineError>(())
            }
            .boxed()
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(fake.text().as_deref(), Some("survives panic"));
    }

    #[tokio::test(start_paused = true)]
    async fn restored_on_scope_timeout() {
        let fake = Arc::new(FakeClipboard::with_text("before"));
        let arb = arbiter(&fake);

        let scoped: Scoped<()> = arb
            .with_exclusive_clipboard(|g| {
                async move {
                    g.write_text("stuck")?;
                    std::future::pending::<()>().await;
                    Ok(())
                }
                .boxed()
            })
            .await;

        assert!(matches!(scoped.result, Err(PipelineError::CaptureTimeout(_))));
        assert_eq!(fake.text().as_deref(), Some("before"));
    }

    #[tokio::test]
    async fn restored_when_scope_future_dropped() {
        let fake = Arc::new(FakeClipboard::with_text("dropped"));
        let arb = arbiter(&fake);

        {
            let guard = arb.acquire().await;
            guard.write_text("temp").unwrap();
            assert_eq!(fake.text().as_deref(), Some("temp"));
        }

        assert_eq!(fake.text().as_deref(), Some("dropped"));
    }

    #[tokio::test]
    async fn restore_failure_is_warning_not_error() {
        let fake = Arc::new(FakeClipboard::with_text("orig"));
        let arb = arbiter(&fake);

        let scoped = arb
            .with_exclusive_clipboard(|g| {
                let fake = Arc::clone(&fake);
                async move {
                    let text = g.read_text()?;
                    fake.fail_writes(true);
                    Ok(text)
                }
                .boxed()
            })
            .await;

        assert_eq!(scoped.result.unwrap().as_deref(), Some("orig"));
        assert!(matches!(
            scoped.restore_warning,
            Some(PipelineError::ClipboardRestoreFailed(_))
        ));
    }

    #[tokio::test]
    async fn empty_clipboard_stays_empty() {
        let fake = Arc::new(FakeClipboard::new());
        let arb = arbiter(&fake);

        let scoped = arb
            .with_exclusive_clipboard(|g| async move { g.write_text("leak?") }.boxed())
            .await;

        assert!(scoped.result.is_ok());
        assert_eq!(fake.text(), None);
        assert!(fake.images().is_empty());
    }

    #[tokio::test]
    async fn unreadable_snapshot_reports_warning() {
        let fake = Arc::new(FakeClipboard::with_text("hidden"));
        fake.fail_reads(true);
        let arb = arbiter(&fake);

        let guard = arb.acquire().await;
        fake.fail_reads(false);
        assert!(matches!(
            guard.restore(),
            Err(PipelineError::ClipboardRestoreFailed(_))
        ));
    }

    #[tokio::test]
    async fn scopes_never_overlap() {
        let fake = Arc::new(FakeClipboard::with_text("shared"));
        let arb = Arc::new(arbiter(&fake));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let arb = Arc::clone(&arb);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                arb.with_exclusive_clipboard(move |g| {
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        g.write_text(&format!("task {i}"))?;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                })
                .await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().result.is_ok());
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(fake.text().as_deref(), Some("shared"));
    }
}
