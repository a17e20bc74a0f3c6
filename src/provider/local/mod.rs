//! On-device model: download lifecycle plus token-by-token generation.
//!
//! State machine:
//!
//! ```text
//! Unloaded ──first use──▶ Downloading ──ok──▶ Loaded ──delete──▶ Unloaded
//!                             │  ▲
//!                        error│  │retry (explicit)
//!                             ▼  │
//!                            Failed
//! ```
//!
//! A download makes up to `max_retries` attempts. After that the model
//! stays `Failed` until [`LocalModel::retry`] is called.

mod download;
mod engine;

#[cfg(feature = "candle")]
mod candle;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::LocalModelConfig;
use crate::error::PipelineError;
use crate::provider::{ChunkSender, ProviderRequest};

pub use engine::{EngineLoader, ModelFiles, TokenEngine};
use engine::{DefaultLoader, Generation};

const TOKENIZER_FILE: &str = "tokenizer.json";
const DEFAULT_MODEL_FILE: &str = "model.gguf";
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Share of the progress bar given to the weights file.
const WEIGHTS_SHARE: f32 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub enum LocalModelState {
    Unloaded,
    Downloading { progress: f32, retry_count: u32 },
    /// Files are installed. The engine itself loads lazily on first use.
    Loaded,
    Failed(String),
}

impl fmt::Display for LocalModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalModelState::Unloaded => f.write_str("not downloaded"),
            LocalModelState::Downloading {
                progress,
                retry_count,
            } => {
                write!(f, "downloading {:.0}%", progress * 100.0)?;
                if *retry_count > 0 {
                    write!(f, " (retry {retry_count})")?;
                }
                Ok(())
            }
            LocalModelState::Loaded => f.write_str("ready"),
            LocalModelState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

type SharedEngine = Arc<std::sync::Mutex<Box<dyn TokenEngine>>>;

/// The local provider's model and its lifecycle.
pub struct LocalModel {
    http: reqwest::Client,
    config: LocalModelConfig,
    files: ModelFiles,
    state: watch::Sender<LocalModelState>,
    download: Mutex<()>,
    /// Held for the whole of a generation, so callers queue here.
    engine: Mutex<Option<SharedEngine>>,
    loader: Arc<dyn EngineLoader>,
    retry_backoff: Duration,
}

impl fmt::Debug for LocalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalModel")
            .field("files", &self.files)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl LocalModel {
    pub fn new(http: reqwest::Client, config: LocalModelConfig) -> Self {
        Self::with_loader(http, config, Arc::new(DefaultLoader))
    }

    pub fn with_loader(
        http: reqwest::Client,
        config: LocalModelConfig,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        let dir = config.resolved_cache_dir();
        let files = ModelFiles {
            model: dir.join(model_file_name(&config.model_url)),
            tokenizer: dir.join(TOKENIZER_FILE),
        };
        let initial = if files.exist() {
            LocalModelState::Loaded
        } else {
            LocalModelState::Unloaded
        };
        tracing::debug!(path = %files.model.display(), state = %initial, "local model");
        let (state, _) = watch::channel(initial);

        Self {
            http,
            config,
            files,
            state,
            download: Mutex::new(()),
            engine: Mutex::new(None),
            loader,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    #[cfg(test)]
    fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn state(&self) -> LocalModelState {
        self.state.borrow().clone()
    }

    /// Observe state changes, including download progress.
    pub fn subscribe(&self) -> watch::Receiver<LocalModelState> {
        self.state.subscribe()
    }

    pub fn files(&self) -> &ModelFiles {
        &self.files
    }

    /// True while a generation holds the engine.
    pub fn is_generating(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    /// Download the model if it is not installed yet.
    ///
    /// A `Failed` model is not retried here; use [`retry`](Self::retry).
    pub async fn download(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.ensure_downloaded(cancel, false).await
    }

    /// Restart a failed download with a fresh retry budget.
    pub async fn retry(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        match self.state() {
            LocalModelState::Downloading { .. } => Err(PipelineError::ConcurrentUseConflict(
                "model download already in progress".into(),
            )),
            LocalModelState::Loaded if self.files.exist() => Ok(()),
            _ => self.ensure_downloaded(cancel, true).await,
        }
    }

    /// Remove the cached files and return to `Unloaded`.
    pub async fn delete(&self) -> Result<(), PipelineError> {
        if matches!(self.state(), LocalModelState::Downloading { .. }) {
            return Err(PipelineError::ConcurrentUseConflict(
                "cannot delete the model while it is downloading".into(),
            ));
        }
        let Ok(_download) = self.download.try_lock() else {
            return Err(PipelineError::ConcurrentUseConflict(
                "cannot delete the model while it is downloading".into(),
            ));
        };
        let Ok(mut engine) = self.engine.try_lock() else {
            return Err(PipelineError::ConcurrentUseConflict(
                "cannot delete the model while a request is in flight".into(),
            ));
        };

        engine.take();
        for path in [&self.files.model, &self.files.tokenizer] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PipelineError::backend(format!(
                        "could not remove {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        self.state.send_replace(LocalModelState::Unloaded);
        tracing::info!(path = %self.files.model.display(), "local model deleted");
        Ok(())
    }

    /// Generate a reply, downloading and loading the model first if needed.
    ///
    /// Calls are serialized. `cancel` is checked before every token.
    pub async fn generate(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let mut slot = self.engine.lock().await;
        self.ensure_downloaded(cancel, false).await?;

        let engine = match slot.as_ref() {
            Some(engine) => Arc::clone(engine),
            None => {
                let loaded = self.load_engine().await?;
                slot.insert(loaded).clone()
            }
        };

        if !request.images.is_empty() {
            tracing::debug!(images = request.images.len(), "local model ignores images");
        }
        let generation = Generation {
            system: request.system_prompt.clone(),
            user: request.user_prompt.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let chunks = chunks.filter(|_| request.streaming).cloned();
        // The blocking loop outlives this future unless told to stop.
        let cancel = cancel.child_token();
        let _stop_on_drop = cancel.clone().drop_guard();

        tokio::task::spawn_blocking(move || {
            let mut engine = engine
                .lock()
                .map_err(|_| PipelineError::backend("local model engine poisoned"))?;
            engine::run_generation(&mut **engine, &generation, &cancel, chunks.as_ref())
        })
        .await
        .map_err(|e| PipelineError::backend(format!("generation task failed: {e}")))?
    }

    async fn load_engine(&self) -> Result<SharedEngine, PipelineError> {
        let loader = Arc::clone(&self.loader);
        let files = self.files.clone();
        let config = self.config.clone();
        let engine = tokio::task::spawn_blocking(move || loader.load(&files, &config))
            .await
            .map_err(|e| PipelineError::backend(format!("model load task failed: {e}")))??;
        Ok(Arc::new(std::sync::Mutex::new(engine)))
    }

    async fn ensure_downloaded(
        &self,
        cancel: &CancellationToken,
        explicit: bool,
    ) -> Result<(), PipelineError> {
        let _download = self.download.lock().await;
        match self.state() {
            LocalModelState::Loaded if self.files.exist() => return Ok(()),
            LocalModelState::Failed(reason) if !explicit => {
                return Err(PipelineError::ModelDownloadFailed(format!(
                    "{reason} (run `scrivd model retry` to try again)"
                )));
            }
            _ => {}
        }

        let mut reset = ResetOnDrop::armed(&self.state);
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.state.send_replace(LocalModelState::Unloaded);
                        reset.disarm();
                        return Err(PipelineError::Cancelled);
                    }
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                }
            }
            self.state.send_replace(LocalModelState::Downloading {
                progress: 0.0,
                retry_count: attempt,
            });
            tracing::info!(attempt = attempt + 1, of = attempts, "downloading local model");

            match self.fetch_files(cancel, attempt).await {
                Ok(()) => {
                    self.state.send_replace(LocalModelState::Loaded);
                    reset.disarm();
                    tracing::info!(path = %self.files.model.display(), "local model installed");
                    return Ok(());
                }
                Err(PipelineError::Cancelled) => {
                    self.state.send_replace(LocalModelState::Unloaded);
                    reset.disarm();
                    tracing::info!("model download cancelled");
                    return Err(PipelineError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "model download failed");
                    self.state.send_replace(LocalModelState::Failed(e.to_string()));
                    last_error = Some(e);
                }
            }
        }
        reset.disarm();

        Err(last_error.unwrap_or_else(|| {
            PipelineError::ModelDownloadFailed("no download attempt was made".into())
        }))
    }

    async fn fetch_files(
        &self,
        cancel: &CancellationToken,
        retry_count: u32,
    ) -> Result<(), PipelineError> {
        let publish = |progress: f32| {
            self.state.send_replace(LocalModelState::Downloading {
                progress,
                retry_count,
            });
        };

        if !self.files.model.is_file() {
            download::fetch(
                &self.http,
                &self.config.model_url,
                &self.files.model,
                self.config.sha256.as_deref(),
                cancel,
                |p| publish(p * WEIGHTS_SHARE),
            )
            .await?;
        }
        if !self.files.tokenizer.is_file() {
            download::fetch(
                &self.http,
                &self.config.tokenizer_url,
                &self.files.tokenizer,
                None,
                cancel,
                |p| publish(WEIGHTS_SHARE + p * (1.0 - WEIGHTS_SHARE)),
            )
            .await?;
        }
        Ok(())
    }
}

/// Puts a download that was abandoned mid-flight back to `Unloaded`.
struct ResetOnDrop<'a> {
    state: &'a watch::Sender<LocalModelState>,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    fn armed(state: &'a watch::Sender<LocalModelState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_if_modified(|s| {
                let downloading = matches!(s, LocalModelState::Downloading { .. });
                if downloading {
                    *s = LocalModelState::Unloaded;
                }
                downloading
            });
        }
    }
}

/// Last path segment of `url`, without query or fragment.
fn model_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    match path.split_once('/') {
        Some((_, tail)) => tail
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_MODEL_FILE)
            .to_string(),
        None => DEFAULT_MODEL_FILE.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::engine::scripted::{Counters, ScriptedEngine, ScriptedLoader};
    use super::*;
    use crate::provider::ProviderKind;

    async fn serve_model(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/qwen.gguf"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(b"weights".to_vec()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tokenizer.json"))
            .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
            .mount(server)
            .await;
    }

    fn config(server: &MockServer, dir: &tempfile::TempDir) -> LocalModelConfig {
        LocalModelConfig {
            model_url: format!("{}/qwen.gguf", server.uri()),
            tokenizer_url: format!("{}/tokenizer.json", server.uri()),
            cache_dir: Some(dir.path().to_path_buf()),
            max_retries: 3,
            max_tokens: 50,
            ..LocalModelConfig::default()
        }
    }

    fn model(
        config: LocalModelConfig,
        make: impl Fn(Arc<Counters>) -> ScriptedEngine + Send + Sync + 'static,
    ) -> (LocalModel, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let engine_counters = Arc::clone(&counters);
        let loader = ScriptedLoader {
            make: Box::new(move || make(Arc::clone(&engine_counters))),
            counters: Arc::clone(&counters),
        };
        let model = LocalModel::with_loader(reqwest::Client::new(), config, Arc::new(loader))
            .with_retry_backoff(Duration::ZERO);
        (model, counters)
    }

    fn request(streaming: bool) -> ProviderRequest {
        ProviderRequest {
            system_prompt: "Fix grammar.".into(),
            user_prompt: "helo".into(),
            images: Vec::new(),
            streaming,
            target: ProviderKind::Local,
        }
    }

    #[test]
    fn model_file_named_after_url() {
        assert_eq!(
            model_file_name("https://hf.co/org/repo/resolve/main/q4.gguf?download=true"),
            "q4.gguf"
        );
        assert_eq!(model_file_name("https://hf.co"), DEFAULT_MODEL_FILE);
        assert_eq!(model_file_name("https://hf.co/dir/"), DEFAULT_MODEL_FILE);
    }

    #[test]
    fn state_display() {
        let s = LocalModelState::Downloading {
            progress: 0.42,
            retry_count: 1,
        };
        assert_eq!(s.to_string(), "downloading 42% (retry 1)");
        assert_eq!(LocalModelState::Loaded.to_string(), "ready");
    }

    #[tokio::test]
    async fn first_use_downloads_then_generates() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let (model, counters) = model(config(&server, &dir), |p| ScriptedEngine::new(&["Hel", "lo"], p));

        assert_eq!(model.state(), LocalModelState::Unloaded);
        let out = model
            .generate(&request(false), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, "Hello");
        assert_eq!(model.state(), LocalModelState::Loaded);
        assert!(model.files().exist());

        // Installed files and the loaded engine are reused.
        model
            .generate(&request(false), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn installed_files_start_loaded() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qwen.gguf"), b"w").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();

        let (model, _) = model(config(&server, &dir), |p| ScriptedEngine::new(&["x"], p));
        assert_eq!(model.state(), LocalModelState::Loaded);
    }

    #[tokio::test]
    async fn retries_are_bounded_until_explicit_retry() {
        let server = MockServer::start().await;
        serve_model(&server, 500).await;
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model(config(&server, &dir), |p| ScriptedEngine::new(&["x"], p));

        let err = model
            .generate(&request(false), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelDownloadFailed(_)));
        assert!(matches!(model.state(), LocalModelState::Failed(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        // Further use does not start another round of attempts.
        let err = model
            .generate(&request(false), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelDownloadFailed(ref m) if m.contains("model retry")));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);

        server.reset().await;
        serve_model(&server, 200).await;
        model.retry(&CancellationToken::new()).await.unwrap();
        assert_eq!(model.state(), LocalModelState::Loaded);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let server = MockServer::start().await;
        serve_model(&server, 404).await;
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&server, &dir);
        cfg.max_retries = 0;
        let (model, _) = model(cfg, |p| ScriptedEngine::new(&["x"], p));

        assert!(model.download(&CancellationToken::new()).await.is_err());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_within_one_token() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        let (model, counters) = model(config(&server, &dir), move |p| {
            ScriptedEngine::new(&["tok "], p)
                .endless()
                .cancel_after(4, trip.clone())
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = model
            .generate(&request(true), Some(&tx), &cancel)
            .await
            .unwrap_err();
        drop(tx);

        assert!(err.is_cancelled());
        assert_eq!(counters.steps.load(Ordering::SeqCst), 4);
        let mut streamed = String::new();
        while let Ok(chunk) = rx.try_recv() {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, "tok tok tok tok ");
        assert_eq!(model.state(), LocalModelState::Loaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_generation_stops_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let (model, counters) = testing::endless(dir.path(), "a", Duration::from_millis(5));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            model.generate(&request(true), None, &CancellationToken::new()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = counters.steps.load(Ordering::SeqCst);
        assert!(settled > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counters.steps.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn token_ceiling_applies() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&server, &dir);
        cfg.max_tokens = 7;
        let (model, _) = model(cfg, |p| ScriptedEngine::new(&["a"], p).endless());

        let out = model
            .generate(&request(false), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "aaaaaaa");
    }

    #[tokio::test]
    async fn non_streaming_requests_emit_no_chunks() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model(config(&server, &dir), |p| ScriptedEngine::new(&["a", "b"], p));
        let (tx, mut rx) = mpsc::unbounded_channel();

        model
            .generate(&request(false), Some(&tx), &CancellationToken::new())
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn generations_never_overlap() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let (model, counters) = model(config(&server, &dir), |p| {
            ScriptedEngine::new(&["a"; 10], p).step_delay(Duration::from_millis(2))
        });
        let model = Arc::new(model);

        let a = {
            let m = Arc::clone(&model);
            tokio::spawn(async move { m.generate(&request(false), None, &CancellationToken::new()).await })
        };
        let b = {
            let m = Arc::clone(&model);
            tokio::spawn(async move { m.generate(&request(false), None, &CancellationToken::new()).await })
        };

        assert_eq!(a.await.unwrap().unwrap(), "a".repeat(10));
        assert_eq!(b.await.unwrap().unwrap(), "a".repeat(10));
        assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_rejected_while_generating() {
        let server = MockServer::start().await;
        serve_model(&server, 200).await;
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model(config(&server, &dir), |p| {
            ScriptedEngine::new(&["a"], p)
                .endless()
                .step_delay(Duration::from_millis(5))
        });
        let model = Arc::new(model);
        model.download(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let running = {
            let m = Arc::clone(&model);
            let c = cancel.clone();
            tokio::spawn(async move { m.generate(&request(false), None, &c).await })
        };
        while !model.is_generating() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let err = model.delete().await.unwrap_err();
        assert!(matches!(err, PipelineError::ConcurrentUseConflict(_)));

        cancel.cancel();
        assert!(running.await.unwrap().unwrap_err().is_cancelled());

        model.delete().await.unwrap();
        assert_eq!(model.state(), LocalModelState::Unloaded);
        assert!(!model.files().model.exists());
        assert!(!model.files().tokenizer.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_rejected_while_downloading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model(config(&server, &dir), |p| ScriptedEngine::new(&["x"], p));
        let model = Arc::new(model);

        let downloading = {
            let m = Arc::clone(&model);
            tokio::spawn(async move { m.download(&CancellationToken::new()).await })
        };
        let mut states = model.subscribe();
        states
            .wait_for(|s| matches!(s, LocalModelState::Downloading { .. }))
            .await
            .unwrap();

        assert!(matches!(
            model.delete().await,
            Err(PipelineError::ConcurrentUseConflict(_))
        ));
        assert!(matches!(
            model.retry(&CancellationToken::new()).await,
            Err(PipelineError::ConcurrentUseConflict(_))
        ));

        downloading.await.unwrap().unwrap();
        assert_eq!(model.state(), LocalModelState::Loaded);
    }

    #[tokio::test]
    async fn abandoned_download_returns_to_unloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model(config(&server, &dir), |p| ScriptedEngine::new(&["x"], p));

        let cancel = CancellationToken::new();
        let abandoned = tokio::time::timeout(Duration::from_millis(100), model.download(&cancel)).await;
        assert!(abandoned.is_err());
        assert_eq!(model.state(), LocalModelState::Unloaded);
    }
}
