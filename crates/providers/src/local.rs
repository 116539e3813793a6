//! Local inference provider — runs GGUF models directly on your hardware.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) to run
//! GGUF-quantized language models with no network access at all. The weights
//! file is given by path and a `tokenizer.json` must sit next to it; nothing
//! is ever downloaded.
//!
//! Supported model families (anything with the Llama architecture):
//! - **TinyLlama** (1.1B params, Q4_K_M ~670 MB)
//! - **Llama 2/3**, **Mistral**, **Qwen**, **SmolLM**

use crate::template::{ChatTemplate, Scan, StopScanner};
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use localmind_core::error::ProviderError;
use localmind_core::message::Message;
use localmind_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default response length when a request sets no limit.
const DEFAULT_MAX_TOKENS: u32 = 512;

/// A provider that runs a GGUF-quantized language model locally via Candle.
///
/// Thread-safe: the model is behind a Mutex because Candle inference
/// is inherently single-threaded (CPU tensor ops).
pub struct LocalProvider {
    state: Arc<Mutex<LocalModelState>>,
    path: PathBuf,
    context_window: usize,
}

/// The loaded model state (tokenizer + weights + config).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
}

impl LocalProvider {
    /// Load a GGUF file and its sibling `tokenizer.json`. Blocking; call from
    /// `spawn_blocking`.
    pub fn load(
        path: &Path,
        chat_template: ChatTemplate,
        context_window: usize,
    ) -> Result<Self, ProviderError> {
        let state = LocalModelState::load(path, chat_template)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            path: path.to_path_buf(),
            context_window,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a generation on a blocking thread, feeding text pieces to `sink`.
    async fn run<F>(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
        sink: F,
    ) -> Result<Usage, ProviderError>
    where
        F: FnMut(&str) -> bool + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let context_window = self.context_window;
        tokio::task::spawn_blocking(move || {
            let mut guard = state.blocking_lock();
            guard.generate(&request, context_window, &cancel, sink)
        })
        .await
        .map_err(|e| ProviderError::Inference(format!("Inference task panicked: {e}")))?
    }
}

impl LocalModelState {
    fn load(path: &Path, chat_template: ChatTemplate) -> Result<Self, ProviderError> {
        let device = Device::Cpu;

        if !path.is_file() {
            return Err(ProviderError::ModelNotFound(format!(
                "No model file at {}",
                path.display()
            )));
        }
        info!(path = %path.display(), ?chat_template, "Loading local GGUF model");

        let tokenizer_path = path.with_file_name("tokenizer.json");
        if !tokenizer_path.is_file() {
            return Err(ProviderError::NotConfigured(format!(
                "No tokenizer.json next to {}; copy the model's tokenizer.json into {}",
                path.display(),
                tokenizer_path
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            )));
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to load tokenizer: {e}")))?;

        let mut file = std::fs::File::open(path)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to open GGUF file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device).map_err(|e| {
            ProviderError::NotConfigured(format!("Failed to load model weights: {e}"))
        })?;

        let eos_token_id = chat_template
            .eos_candidates()
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .unwrap_or(2); // fallback to common EOS id

        info!(eos_token_id, "Local model loaded successfully");

        Ok(Self {
            model,
            tokenizer,
            device,
            chat_template,
            eos_token_id,
        })
    }

    /// Tokenize, sample until EOS / stop / limit / cancel, and push decoded
    /// text to `sink` as it appears. `sink` returning `false` ends the run.
    fn generate<F>(
        &mut self,
        request: &ProviderRequest,
        context_window: usize,
        cancel: &CancellationToken,
        mut sink: F,
    ) -> Result<Usage, ProviderError>
    where
        F: FnMut(&str) -> bool,
    {
        let prompt = self.chat_template.format(&request.messages);
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| ProviderError::Inference(format!("Tokenization failed: {e}")))?;

        let prompt_tokens = encoding.get_ids().to_vec();
        let prompt_len = prompt_tokens.len();
        if prompt_len >= context_window {
            return Err(ProviderError::Inference(format!(
                "Prompt is {prompt_len} tokens but the context window is {context_window}"
            )));
        }
        let room = (context_window - prompt_len) as u32;
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS).min(room);
        let temperature = request.temperature;

        debug!(
            prompt_tokens = prompt_len,
            max_tokens,
            temperature,
            "Starting local generation"
        );

        let mut logits_processor = if temperature <= 0.0 {
            LogitsProcessor::new(42, None, None)
        } else {
            LogitsProcessor::new(42, Some(temperature as f64), None)
        };

        let mut scanner = StopScanner::new(
            request
                .stop
                .iter()
                .map(String::as_str)
                .chain(self.chat_template.stop_sequences().iter().copied()),
        );

        let mut generated: Vec<u32> = Vec::new();
        let mut decoded_len = 0;
        let mut input = Tensor::new(prompt_tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut index_pos = 0;

        for _ in 0..max_tokens {
            if cancel.is_cancelled() {
                debug!(generated = generated.len(), "Local generation cancelled");
                break;
            }

            let logits = self
                .model
                .forward(&input, index_pos)
                .map_err(map_candle_err)?;
            index_pos += input.dim(1).map_err(map_candle_err)?;

            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;

            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            let text = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| ProviderError::Inference(format!("Detokenization failed: {e}")))?;
            // A trailing replacement char means a multi-byte sequence is still incomplete
            if text.len() > decoded_len
                && text.is_char_boundary(decoded_len)
                && !text.ends_with('\u{FFFD}')
            {
                let piece = &text[decoded_len..];
                decoded_len = text.len();
                match scanner.push(piece) {
                    Scan::Emit(safe) => {
                        if !safe.is_empty() && !sink(&safe) {
                            break;
                        }
                    }
                    Scan::Stop(last) => {
                        if !last.is_empty() {
                            sink(&last);
                        }
                        debug!("Stop sequence reached");
                        return Ok(usage(prompt_len, generated.len()));
                    }
                }
            }

            input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        let rest = scanner.finish();
        if !rest.is_empty() && !cancel.is_cancelled() {
            sink(&rest);
        }

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(usage(prompt_len, generated.len()))
    }
}

fn usage(prompt: usize, completion: usize) -> Usage {
    Usage {
        prompt_tokens: prompt as u32,
        completion_tokens: completion as u32,
        total_tokens: (prompt + completion) as u32,
    }
}

/// Map Candle errors to ProviderError.
fn map_candle_err(e: candle_core::Error) -> ProviderError {
    ProviderError::Inference(format!("Candle inference error: {e}"))
}

// ── Provider trait implementation ──────────────────────────────────────

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let model_label = format!("local/{}", self.path.display());
        let output = Arc::new(std::sync::Mutex::new(String::new()));
        let sink_output = Arc::clone(&output);
        let usage = self
            .run(request, CancellationToken::new(), move |piece| {
                if let Ok(mut text) = sink_output.lock() {
                    text.push_str(piece);
                }
                true
            })
            .await?;

        let text = output
            .lock()
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(usage),
            model: model_label,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let state = Arc::clone(&self.state);
        let context_window = self.context_window;

        // Token-by-token streaming from the blocking inference thread
        tokio::task::spawn_blocking(move || {
            let mut guard = state.blocking_lock();
            let sink_tx = tx.clone();
            let result = guard.generate(&request, context_window, &cancel, |piece| {
                sink_tx
                    .blocking_send(Ok(StreamChunk::delta(piece)))
                    .is_ok()
            });
            let last = match result {
                Ok(usage) => Ok(StreamChunk::finished(Some(usage))),
                Err(e) => Err(e),
            };
            let _ = tx.blocking_send(last);
        });

        Ok(rx)
    }
}
