//! Quantized GGUF inference with candle.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{quantized_llama, quantized_qwen2};
use tokenizers::Tokenizer;

use super::engine::{ModelFiles, TokenEngine};
use crate::config::LocalModelConfig;
use crate::error::PipelineError;

const SEED: u64 = 299_792_458;

enum Weights {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl Weights {
    fn forward(&mut self, x: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        match self {
            Weights::Llama(m) => m.forward(x, index_pos),
            Weights::Qwen2(m) => m.forward(x, index_pos),
        }
    }
}

fn engine_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::backend(format!("local model: {context}: {e}"))
}

/// CPU engine over a quantized llama or qwen2 checkpoint.
pub struct CandleEngine {
    weights: Weights,
    tokenizer: Tokenizer,
    device: Device,
    architecture: String,
    eos: HashSet<u32>,
    sampler: LogitsProcessor,
    requests: u64,
    /// Prompt plus generated ids.
    tokens: Vec<u32>,
    generated: Vec<u32>,
    /// Decoded text already handed out.
    emitted: usize,
    index_pos: usize,
}

impl CandleEngine {
    pub fn load(files: &ModelFiles, config: &LocalModelConfig) -> Result<Self, PipelineError> {
        let device = Device::Cpu;
        let mut reader = BufReader::new(
            File::open(&files.model).map_err(|e| engine_error("open weights", e))?,
        );
        let content =
            gguf_file::Content::read(&mut reader).map_err(|e| engine_error("read gguf", e))?;

        let architecture = config
            .architecture
            .clone()
            .or_else(|| {
                content
                    .metadata
                    .get("general.architecture")
                    .and_then(|v| v.to_string().ok())
                    .cloned()
            })
            .unwrap_or_else(|| "llama".to_string())
            .to_ascii_lowercase();

        let tokenizer =
            Tokenizer::from_file(&files.tokenizer).map_err(|e| engine_error("tokenizer", e))?;
        let gguf_eos = gguf_eos_ids(&content);

        let weights = match architecture.as_str() {
            "llama" => Weights::Llama(
                quantized_llama::ModelWeights::from_gguf(content, &mut reader, &device)
                    .map_err(|e| engine_error("load llama weights", e))?,
            ),
            "qwen2" => Weights::Qwen2(
                quantized_qwen2::ModelWeights::from_gguf(content, &mut reader, &device)
                    .map_err(|e| engine_error("load qwen2 weights", e))?,
            ),
            other => {
                return Err(PipelineError::backend(format!(
                    "local model: unsupported architecture {other:?} (expected llama or qwen2)"
                )));
            }
        };

        let eos = eos_token_ids(&tokenizer, &gguf_eos);
        if eos.is_empty() {
            tracing::warn!("no end-of-sequence token found; generation stops at max_tokens only");
        }
        tracing::info!(
            architecture = %architecture,
            path = %files.model.display(),
            "local model loaded"
        );

        Ok(Self {
            weights,
            tokenizer,
            device,
            architecture,
            eos,
            sampler: LogitsProcessor::new(SEED, None, None),
            requests: 0,
            tokens: Vec::new(),
            generated: Vec::new(),
            emitted: 0,
            index_pos: 0,
        })
    }

    fn step(&mut self) -> candle_core::Result<u32> {
        let context: &[u32] = if self.index_pos == 0 {
            &self.tokens
        } else {
            &self.tokens[self.tokens.len() - 1..]
        };
        let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, self.index_pos)?;
        self.index_pos += context.len();
        let logits = logits.squeeze(0)?;
        self.sampler.sample(&logits)
    }

    /// Text newly completed by the last token. Holds back partial
    /// UTF-8 sequences until the next token finishes them.
    fn take_text(&mut self) -> Result<String, PipelineError> {
        let text = self
            .tokenizer
            .decode(&self.generated, true)
            .map_err(|e| engine_error("decode", e))?;
        if text.ends_with('\u{fffd}') || text.len() <= self.emitted {
            return Ok(String::new());
        }
        let Some(piece) = text.get(self.emitted..) else {
            return Ok(String::new());
        };
        let piece = piece.to_string();
        self.emitted = text.len();
        Ok(piece)
    }
}

impl TokenEngine for CandleEngine {
    fn start(&mut self, system: &str, user: &str, temperature: f64) -> Result<(), PipelineError> {
        let prompt = chat_prompt(&self.architecture, system, user);
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| engine_error("encode", e))?;
        self.tokens = encoding.get_ids().to_vec();
        if self.tokens.is_empty() {
            return Err(PipelineError::backend("local model: empty prompt"));
        }
        self.generated.clear();
        self.emitted = 0;
        self.index_pos = 0;
        self.requests = self.requests.wrapping_add(1);
        self.sampler = LogitsProcessor::new(
            SEED.wrapping_add(self.requests),
            (temperature > 0.0).then_some(temperature),
            None,
        );
        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<String>, PipelineError> {
        let next = self.step().map_err(|e| engine_error("forward", e))?;
        if self.eos.contains(&next) {
            return Ok(None);
        }
        self.tokens.push(next);
        self.generated.push(next);
        self.take_text().map(Some)
    }
}

fn chat_prompt(architecture: &str, system: &str, user: &str) -> String {
    match architecture {
        "qwen2" => format!(
            "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
        ),
        "llama" => format!(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n{user}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
        ),
        _ => format!("System:\n{system}\n\nUser:\n{user}\n\nAssistant:\n"),
    }
}

fn gguf_eos_ids(content: &gguf_file::Content) -> Vec<u32> {
    ["tokenizer.ggml.eos_token_id", "tokenizer.ggml.eot_token_id"]
        .iter()
        .filter_map(|key| content.metadata.get(*key))
        .filter_map(|v| v.to_u32().ok())
        .collect()
}

fn eos_token_ids(tokenizer: &Tokenizer, gguf: &[u32]) -> HashSet<u32> {
    let mut ids: HashSet<u32> = gguf.iter().copied().collect();
    for token in ["<|im_end|>", "<|eot_id|>", "<|endoftext|>", "</s>", "<|end|>"] {
        if let Some(id) = tokenizer.token_to_id(token) {
            ids.insert(id);
        }
    }
    ids
}
