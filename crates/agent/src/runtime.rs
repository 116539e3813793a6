//! `LocalMind` — the composition root.
//!
//! Owns the store, the model host, the compressor, the learning pipeline
//! and the orchestrator. Front ends build it once from an [`AppConfig`] and
//! call through it; nothing here is global.

use crate::compressor::{Compressor, CompressorSettings};
use crate::context::{AssembledContext, ContextAssembler};
use crate::extract::{FileExtractor, TextExtractor};
use crate::learn::{LearnHandle, Librarian};
use crate::orchestrator::{ChatOrchestrator, ChatStream, OrchestratorSettings};
use crate::profile::Profile;
use localmind_config::AppConfig;
use localmind_core::error::{ChatError, MemoryError, ProviderError};
use localmind_core::message::Message;
use localmind_core::{EventBus, RecordSummary};
use localmind_memory::{BoundedStore, ClearOutcome, RemoveOutcome, StoreSettings};
use localmind_providers::{LoadedModel, ModelHost};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LocalMind {
    config: AppConfig,
    events: Arc<EventBus>,
    store: Arc<BoundedStore>,
    host: Arc<ModelHost>,
    compressor: Arc<Compressor>,
    assembler: ContextAssembler,
    orchestrator: ChatOrchestrator,
    librarian: Librarian,
}

impl LocalMind {
    /// Open the store described by `config` and wire every component.
    ///
    /// No model is loaded yet; call [`load_model`](Self::load_model) or
    /// [`install_model`](Self::install_model).
    pub async fn open(config: AppConfig) -> Self {
        Self::open_with_extractor(config, Arc::new(FileExtractor)).await
    }

    pub async fn open_with_extractor(config: AppConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        let events = Arc::new(EventBus::default());
        let store = Arc::new(
            BoundedStore::open(config.memory.path.clone(), store_settings(&config))
                .await
                .with_events(Arc::clone(&events)),
        );
        let host = Arc::new(ModelHost::new().with_events(Arc::clone(&events)));
        let compressor = Arc::new(
            Compressor::new(Arc::clone(&host))
                .with_settings(CompressorSettings::from_config(&config)),
        );
        let assembler = ContextAssembler::from_config(&config.context);
        let orchestrator = ChatOrchestrator::new(Arc::clone(&host), assembler)
            .with_settings(OrchestratorSettings::from_config(&config))
            .with_events(Arc::clone(&events));
        let librarian = Librarian::new(extractor, Arc::clone(&compressor), Arc::clone(&store))
            .with_events(Arc::clone(&events));

        info!(
            memory = %store.path().display(),
            records = store.list_records().await.map(|r| r.len()).unwrap_or_default(),
            "LocalMind ready"
        );

        Self {
            config,
            events,
            store,
            host,
            compressor,
            assembler,
            orchestrator,
            librarian,
        }
    }

    /// Load the backend from `[model]`.
    pub async fn load_model(&self) -> Result<LoadedModel, ProviderError> {
        self.host.load(&self.config.model).await
    }

    /// Make an already-built provider the current model.
    pub async fn install_model(
        &self,
        provider: Arc<dyn localmind_core::Provider>,
        context_window: usize,
    ) -> LoadedModel {
        self.host
            .install(provider, self.config.model.name.clone(), context_window)
            .await
    }

    /// Learn `path` in the background.
    pub fn learn(&self, path: impl Into<PathBuf>) -> LearnHandle {
        self.librarian.spawn(path)
    }

    /// Start a chat turn against the current store contents.
    pub async fn chat(
        &self,
        history: &[Message],
        user_turn: &str,
        profile: Profile,
    ) -> Result<ChatStream, ChatError> {
        if !self.host.is_ready().await {
            return Err(ChatError::NotReady);
        }
        let snapshot = self.store.snapshot().await?;
        self.orchestrator
            .respond(history, user_turn, &snapshot, profile)
            .await
    }

    pub async fn forget(&self, id: &str) -> RemoveOutcome {
        self.store.remove(id).await
    }

    pub async fn forget_all(&self) -> ClearOutcome {
        self.store.clear().await
    }

    pub async fn list_records(&self) -> Result<Vec<RecordSummary>, MemoryError> {
        self.store.list_records().await
    }

    /// The learned-knowledge block the next chat turn would see.
    pub async fn memory_context(&self) -> Result<AssembledContext, MemoryError> {
        let snapshot = self.store.snapshot().await?;
        Ok(self.assembler.assemble_with_report(&snapshot))
    }

    /// The configured default profile, or `general` if it is unknown.
    pub fn default_profile(&self) -> Profile {
        let name = &self.config.generation.default_profile;
        name.parse().unwrap_or_else(|e| {
            warn!(profile = %name, error = %e, "Unknown default profile, using general");
            Profile::General
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<BoundedStore> {
        &self.store
    }

    pub fn host(&self) -> &Arc<ModelHost> {
        &self.host
    }

    pub fn compressor(&self) -> &Arc<Compressor> {
        &self.compressor
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    pub fn librarian(&self) -> &Librarian {
        &self.librarian
    }
}

pub fn store_settings(config: &AppConfig) -> StoreSettings {
    StoreSettings {
        capacity_bytes: config.memory.capacity_bytes(),
        eviction_trigger: config.memory.eviction_trigger,
        lock_timeout: Duration::from_millis(config.memory.lock_timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::LearnEvent;
    use crate::stream_event::ChatStreamEvent;
    use crate::test_helpers::ScriptedProvider;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.path = dir.path().join("memory").join("compressed_memory.json");
        config
    }

    #[tokio::test]
    async fn chat_without_model_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let mind = LocalMind::open(config_in(&dir)).await;
        let result = mind.chat(&[], "hello", Profile::General).await;
        assert!(matches!(result, Err(ChatError::NotReady)));
    }

    #[tokio::test]
    async fn settings_follow_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.memory.capacity_kb = 3;
        config.memory.eviction_trigger = 0.9;
        config.context.history_window = 4;
        let mind = LocalMind::open(config).await;

        assert_eq!(mind.store().capacity_bytes(), 3 * 1024);
        assert_eq!(mind.store().settings().eviction_trigger, 0.9);
        assert_eq!(mind.orchestrator().settings().history_window, 4);
    }

    #[tokio::test]
    async fn unknown_default_profile_falls_back_to_general() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.generation.default_profile = "code".into();
        assert_eq!(LocalMind::open(config.clone()).await.default_profile(), Profile::Code);

        config.generation.default_profile = "pirate".into();
        assert_eq!(LocalMind::open(config).await.default_profile(), Profile::General);
    }

    #[tokio::test]
    async fn learned_knowledge_reaches_the_prompt() {
        let dir = TempDir::new().unwrap();
        let mind = LocalMind::open(config_in(&dir)).await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("SUMMARY: A note on sourdough starters.\nFACTS:\n- Feed it daily".into()),
            Ok("Feed it daily.".into()),
        ]));
        mind.install_model(provider.clone(), 4096).await;

        let doc = dir.path().join("bread.md");
        std::fs::write(&doc, "Sourdough starters need daily feeding.").unwrap();
        assert!(matches!(mind.learn(&doc).wait().await, LearnEvent::Done(_)));

        let context = mind.memory_context().await.unwrap();
        assert!(context.fragment.contains("From: bread.md"));

        let done = mind
            .chat(&[], "How often do I feed it?", Profile::Document)
            .await
            .unwrap()
            .finish()
            .await;
        assert!(matches!(done, ChatStreamEvent::Done { ref text, .. } if text == "Feed it daily."));
        let chat_request = &provider.requests()[1];
        assert!(chat_request.messages[0].content.contains("A note on sourdough starters."));

        let id = mind.list_records().await.unwrap()[0].id.clone();
        assert!(mind.forget(&id).await.removed.is_some());
        assert!(mind.list_records().await.unwrap().is_empty());
    }
}
