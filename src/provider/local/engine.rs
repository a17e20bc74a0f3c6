//! Token engines and the generation loop.
//!
//! An engine produces one token per [`TokenEngine::next_token`] call.
//! The loop around it, not the engine, owns the cancellation check
//! and the token ceiling, so every engine is preemptible at each
//! token boundary.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::LocalModelConfig;
use crate::error::PipelineError;
use crate::provider::{ChunkSender, emit};

/// Paths of an installed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    pub fn exist(&self) -> bool {
        self.model.is_file() && self.tokenizer.is_file()
    }
}

/// A loaded model that generates text token by token.
pub trait TokenEngine: Send {
    /// Reset state and feed the chat prompt.
    fn start(&mut self, system: &str, user: &str, temperature: f64) -> Result<(), PipelineError>;

    /// Next decoded piece, or `None` at end of sequence.
    fn next_token(&mut self) -> Result<Option<String>, PipelineError>;
}

/// Builds an engine from installed files. Runs on a blocking thread.
pub trait EngineLoader: Send + Sync {
    fn load(
        &self,
        files: &ModelFiles,
        config: &LocalModelConfig,
    ) -> Result<Box<dyn TokenEngine>, PipelineError>;
}

/// The engine compiled into this binary.
#[derive(Debug, Default)]
pub struct DefaultLoader;

impl EngineLoader for DefaultLoader {
    #[cfg(feature = "candle")]
    fn load(
        &self,
        files: &ModelFiles,
        config: &LocalModelConfig,
    ) -> Result<Box<dyn TokenEngine>, PipelineError> {
        Ok(Box::new(super::candle::CandleEngine::load(files, config)?))
    }

    #[cfg(not(feature = "candle"))]
    fn load(
        &self,
        _files: &ModelFiles,
        _config: &LocalModelConfig,
    ) -> Result<Box<dyn TokenEngine>, PipelineError> {
        Err(PipelineError::backend(
            "on-device inference is not compiled in; rebuild with --features candle",
        ))
    }
}

/// Generation parameters for one request.
#[derive(Debug, Clone)]
pub struct Generation {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: usize,
}

/// Drive `engine` until end of sequence, the token ceiling, or
/// cancellation. The token is checked before every step.
pub fn run_generation(
    engine: &mut dyn TokenEngine,
    generation: &Generation,
    cancel: &CancellationToken,
    chunks: Option<&ChunkSender>,
) -> Result<String, PipelineError> {
    engine.start(&generation.system, &generation.user, generation.temperature)?;

    let mut out = String::new();
    let mut produced = 0usize;
    while produced < generation.max_tokens {
        if cancel.is_cancelled() {
            tracing::debug!(produced, "generation cancelled at token boundary");
            return Err(PipelineError::Cancelled);
        }
        let Some(piece) = engine.next_token()? else {
            break;
        };
        produced += 1;
        emit(chunks, &piece);
        out.push_str(&piece);
    }
    tracing::debug!(produced, ceiling = generation.max_tokens, "generation finished");
    Ok(out)
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Deterministic engine for lifecycle and cancellation tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Shared counters observable from the test.
    #[derive(Debug, Default)]
    pub struct Counters {
        pub steps: AtomicUsize,
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
        pub loads: AtomicUsize,
    }

    pub struct ScriptedEngine {
        pieces: Vec<String>,
        pos: usize,
        /// Repeat the script forever instead of ending.
        endless: bool,
        step_delay: Duration,
        cancel_after: Option<(usize, CancellationToken)>,
        counters: Arc<Counters>,
    }

    impl ScriptedEngine {
        pub fn new(pieces: &[&str], counters: Arc<Counters>) -> Self {
            Self {
                pieces: pieces.iter().map(|s| s.to_string()).collect(),
                pos: 0,
                endless: false,
                step_delay: Duration::ZERO,
                cancel_after: None,
                counters,
            }
        }

        pub fn endless(mut self) -> Self {
            self.endless = true;
            self
        }

        pub fn step_delay(mut self, delay: Duration) -> Self {
            self.step_delay = delay;
            self
        }

        /// Fire `token` right after the `n`th step completes.
        pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
            self.cancel_after = Some((n, token));
            self
        }
    }

    impl TokenEngine for ScriptedEngine {
        fn start(&mut self, _system: &str, _user: &str, _t: f64) -> Result<(), PipelineError> {
            self.pos = 0;
            Ok(())
        }

        fn next_token(&mut self) -> Result<Option<String>, PipelineError> {
            let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.step_delay);

            let piece = if self.pos < self.pieces.len() {
                Some(self.pieces[self.pos].clone())
            } else if self.endless && !self.pieces.is_empty() {
                Some(self.pieces[self.pos % self.pieces.len()].clone())
            } else {
                None
            };
            if piece.is_some() {
                self.pos += 1;
                let steps = self.counters.steps.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((n, token)) = &self.cancel_after
                    && steps == *n
                {
                    token.cancel();
                }
            }

            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            Ok(piece)
        }
    }

    /// Loader that hands out fresh scripted engines.
    pub struct ScriptedLoader {
        pub make: Box<dyn Fn() -> ScriptedEngine + Send + Sync>,
        pub counters: Arc<Counters>,
    }

    impl EngineLoader for ScriptedLoader {
        fn load(
            &self,
            files: &ModelFiles,
            _config: &LocalModelConfig,
        ) -> Result<Box<dyn TokenEngine>, PipelineError> {
            assert!(files.exist(), "engine loaded before files were installed");
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new((self.make)()))
        }
    }
}
