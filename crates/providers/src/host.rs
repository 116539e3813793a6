//! Model host — the single slot holding the currently loaded generation
//! capability.
//!
//! The compressor and the orchestrator both ask the host for the current
//! model on every call, so loading a different model (or unloading) takes
//! effect on the next request without rebuilding either of them.

use crate::openai_compat::OpenAiCompatProvider;
use chrono::Utc;
use localmind_config::{ModelBackend, ModelConfig};
use localmind_core::error::ProviderError;
use localmind_core::{DomainEvent, EventBus, Provider};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Default endpoint of a llama.cpp server started with `--port 8080`.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/v1";

/// A provider plus what callers need to know to size prompts for it.
#[derive(Clone)]
pub struct LoadedModel {
    pub provider: Arc<dyn Provider>,
    /// Name sent with each request and shown to the user
    pub model: String,
    /// Prompt window in tokens
    pub context_window: usize,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("context_window", &self.context_window)
            .finish()
    }
}

#[derive(Default)]
pub struct ModelHost {
    slot: RwLock<Option<LoadedModel>>,
    events: Option<Arc<EventBus>>,
}

impl ModelHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Build the backend described by `config` and make it current.
    pub async fn load(&self, config: &ModelConfig) -> Result<LoadedModel, ProviderError> {
        let provider: Arc<dyn Provider> = match config.backend {
            ModelBackend::Local => load_local(config).await?,
            ModelBackend::Server => {
                let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
                Arc::new(OpenAiCompatProvider::new(
                    "server",
                    base_url,
                    config.api_key.clone().unwrap_or_default(),
                )?)
            }
        };
        Ok(self
            .install(provider, config.name.clone(), config.context_window)
            .await)
    }

    /// Make an already-built provider current, replacing any previous one.
    pub async fn install(
        &self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        context_window: usize,
    ) -> LoadedModel {
        let loaded = LoadedModel {
            provider,
            model: model.into(),
            context_window,
        };
        info!(
            provider = loaded.provider.name(),
            model = %loaded.model,
            context_window,
            "Model loaded"
        );
        *self.slot.write().await = Some(loaded.clone());
        self.publish(Some(loaded.model.clone()));
        loaded
    }

    pub async fn unload(&self) {
        if self.slot.write().await.take().is_some() {
            info!("Model unloaded");
            self.publish(None);
        }
    }

    pub async fn current(&self) -> Option<LoadedModel> {
        self.slot.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.slot.read().await.is_some()
    }

    fn publish(&self, model: Option<String>) {
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ModelChanged {
                model,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(feature = "local")]
async fn load_local(config: &ModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    use crate::local::LocalProvider;
    use crate::template::ChatTemplate;

    let path = config.path.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "model.path is not set; point it at a .gguf file or set LOCALMIND_MODEL_PATH".into(),
        )
    })?;
    let template: ChatTemplate = config.chat_template.parse()?;
    let context_window = config.context_window;
    let provider = tokio::task::spawn_blocking(move || {
        LocalProvider::load(&path, template, context_window)
    })
    .await
    .map_err(|e| ProviderError::Inference(format!("Model loading task failed: {e}")))??;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "local"))]
async fn load_local(_config: &ModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    Err(ProviderError::NotConfigured(
        "this build has no in-process inference; rebuild with `--features local` \
         or set model.backend = \"server\""
            .into(),
    ))
}
