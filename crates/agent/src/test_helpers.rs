//! Shared test helpers: scripted providers standing in for a loaded model.

use async_trait::async_trait;
use localmind_core::error::ProviderError;
use localmind_core::message::Message;
use localmind_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use localmind_providers::ModelHost;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A provider that answers `complete` with scripted responses, in order.
///
/// The last response repeats once the script runs out. Every request is
/// recorded for inspection.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(String::new()))
        };
        next.map(|text| ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

/// A provider that streams `tokens` one at a time, `delay` apart, checking
/// the cancellation token between tokens like a real backend.
pub struct TokenStreamProvider {
    tokens: Vec<String>,
    delay: Duration,
    fail_after: Option<usize>,
    sent: Arc<AtomicUsize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl TokenStreamProvider {
    pub fn new(tokens: &[&str], delay: Duration) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            delay,
            fail_after: None,
            sent: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `count` tokens of the form `t0 `, `t1 `, …
    pub fn numbered(count: usize, delay: Duration) -> Self {
        let tokens: Vec<String> = (0..count).map(|i| format!("t{i} ")).collect();
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        Self::new(&refs, delay)
    }

    /// Fail with a stream error after `count` tokens.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Tokens pushed into the channel so far.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for TokenStreamProvider {
    fn name(&self) -> &str {
        "token_stream"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse {
            message: Message::assistant(self.tokens.concat()),
            usage: None,
            model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let tokens = self.tokens.clone();
        let delay = self.delay;
        let fail_after = self.fail_after;
        let sent = Arc::clone(&self.sent);
        tokio::spawn(async move {
            for (i, token) in tokens.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    return;
                }
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted("connection lost".into())))
                        .await;
                    return;
                }
                if tx.send(Ok(StreamChunk::delta(token))).await.is_err() {
                    return;
                }
                sent.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
            }
            let count = sent.load(Ordering::SeqCst) as u32;
            let _ = tx
                .send(Ok(StreamChunk::finished(Some(Usage {
                    prompt_tokens: 20,
                    completion_tokens: count,
                    total_tokens: 20 + count,
                }))))
                .await;
        });
        Ok(rx)
    }
}

/// A host with `provider` installed under the name `test-model`.
pub async fn host_with(provider: Arc<dyn Provider>, context_window: usize) -> Arc<ModelHost> {
    let host = Arc::new(ModelHost::new());
    host.install(provider, "test-model", context_window).await;
    host
}
