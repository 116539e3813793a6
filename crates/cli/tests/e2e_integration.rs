//! End-to-end integration tests for LocalMind.
//!
//! These tests drive the full pipeline the CLI uses: learn a file from disk,
//! store the compressed record, and answer chat turns with every stored
//! record in the prompt.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use localmind_agent::{ChatStreamEvent, LearnEvent, LearnStage, LocalMind, Profile};
use localmind_config::AppConfig;
use localmind_core::error::{ChatError, ProviderError};
use localmind_core::event::DomainEvent;
use localmind_core::message::{Message, Role};
use localmind_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ── Mock Providers ───────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence and records
/// every request it receives.
struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests().pop().expect("no request recorded")
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            panic!("ScriptedProvider exhausted");
        }
        let text = responses.remove(0);
        Ok(ProviderResponse {
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

/// Streams numbered tokens slowly, stopping when cancelled.
struct SlowStreamProvider {
    tokens: usize,
    delay: Duration,
}

#[async_trait::async_trait]
impl Provider for SlowStreamProvider {
    fn name(&self) -> &str {
        "slow_stream"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant("unused"),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let (tokens, delay) = (self.tokens, self.delay);
        tokio::spawn(async move {
            for i in 0..tokens {
                if cancel.is_cancelled() {
                    return;
                }
                if tx.send(Ok(StreamChunk::delta(format!("w{i} ")))).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(Ok(StreamChunk::finished(None))).await;
        });
        Ok(rx)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn config_in(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.memory.path = dir.path().join("memory").join("compressed_memory.json");
    config
}

fn write_doc(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn extraction(summary: &str, fact: &str) -> String {
    format!(
        "SUMMARY: {summary}\nKEY CONCEPTS: starter, hydration\nFACTS:\n- {fact}\n\
         DEFINITIONS:\n- Levain: an off-shoot of the starter\nSTRUCTURE: Two short sections"
    )
}

async fn learn(mind: &LocalMind, path: &Path) -> LearnEvent {
    mind.learn(path).wait().await
}

async fn chat_text(mind: &LocalMind, history: &[Message], turn: &str, profile: Profile) -> String {
    match mind.chat(history, turn, profile).await.unwrap().finish().await {
        ChatStreamEvent::Done { text, cancelled, .. } => {
            assert!(!cancelled);
            text
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

// ── Learn → Store → Chat ─────────────────────────────────────────────────

#[tokio::test]
async fn learned_document_grounds_the_answer() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let provider = Arc::new(ScriptedProvider::new(&[
        &extraction("How to keep a sourdough starter alive.", "Feed it every 12 hours"),
        "Every 12 hours, according to bread.md.",
    ]));
    mind.install_model(provider.clone(), 4096).await;

    let doc = write_doc(&dir, "bread.md", "# Starter care\nFeed the starter every 12 hours.");
    let report = match learn(&mind, &doc).await {
        LearnEvent::Done(report) => report,
        other => panic!("learning failed: {other:?}"),
    };
    assert_eq!(report.document, "bread.md");
    assert!(!report.replaced);
    assert!(report.evicted.is_empty());
    assert!(report.persistence_warning.is_none());

    let answer = chat_text(&mind, &[], "How often do I feed it?", Profile::Document).await;
    assert_eq!(answer, "Every 12 hours, according to bread.md.");

    let request = provider.last_request();
    assert_eq!(request.messages.len(), 2);
    let system = &request.messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("=== LEARNED KNOWLEDGE ==="));
    assert!(system.content.contains("From: bread.md"));
    assert!(system.content.contains("Feed it every 12 hours"));
    assert!(system.content.contains("Levain: an off-shoot of the starter"));
    assert_eq!(request.messages[1].content, "How often do I feed it?");
    assert!((request.temperature - Profile::Document.temperature()).abs() < f32::EPSILON);
}

#[tokio::test]
async fn learning_reports_stages_in_order() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    mind.install_model(
        Arc::new(ScriptedProvider::new(&[&extraction("Notes.", "A fact")])),
        4096,
    )
    .await;

    let doc = write_doc(&dir, "notes.txt", "Some notes worth keeping.");
    let mut handle = mind.learn(&doc);
    let mut stages = Vec::new();
    let mut done = false;
    while let Some(event) = handle.next().await {
        match event {
            LearnEvent::Progress { stage, percent, .. } => {
                assert_eq!(percent, stage.percent());
                stages.push(stage);
            }
            LearnEvent::Done(_) => done = true,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(done);
    assert_eq!(
        stages,
        vec![
            LearnStage::Reading,
            LearnStage::Compressing,
            LearnStage::Parsing,
            LearnStage::Storing
        ]
    );
}

#[tokio::test]
async fn memory_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mind = LocalMind::open(config_in(&dir)).await;
        mind.install_model(
            Arc::new(ScriptedProvider::new(&[&extraction("Orbital mechanics primer.", "Apoapsis is the farthest point")])),
            4096,
        )
        .await;
        let doc = write_doc(&dir, "orbits.md", "Apoapsis is the farthest point of an orbit.");
        assert!(matches!(learn(&mind, &doc).await, LearnEvent::Done(_)));
        mind.store().flush().await.unwrap();
    }

    let mind = LocalMind::open(config_in(&dir)).await;
    let records = mind.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "orbits.md");

    let provider = Arc::new(ScriptedProvider::new(&["The farthest point."]));
    mind.install_model(provider.clone(), 4096).await;
    chat_text(&mind, &[], "What is apoapsis?", Profile::General).await;
    assert!(provider.last_request().messages[0].content.contains("Orbital mechanics primer."));

    let quote = mind.store().cite(&records[0].id, "farthest point").await.unwrap();
    assert!(quote.unwrap().contains("farthest point"));
}

#[tokio::test]
async fn relearning_a_file_replaces_its_record() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let provider = Arc::new(ScriptedProvider::new(&[
        &extraction("First draft.", "Old fact"),
        &extraction("Second draft.", "New fact"),
        "ok",
    ]));
    mind.install_model(provider.clone(), 4096).await;

    let doc = write_doc(&dir, "draft.md", "version one");
    assert!(matches!(learn(&mind, &doc).await, LearnEvent::Done(_)));
    std::fs::write(&doc, "version two").unwrap();
    match learn(&mind, &doc).await {
        LearnEvent::Done(report) => assert!(report.replaced),
        other => panic!("learning failed: {other:?}"),
    }

    assert_eq!(mind.list_records().await.unwrap().len(), 1);
    chat_text(&mind, &[], "what changed?", Profile::General).await;
    let system = &provider.last_request().messages[0].content;
    assert!(system.contains("Second draft."));
    assert!(!system.contains("First draft."));
}

#[tokio::test]
async fn oldest_document_is_evicted_when_memory_fills() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.memory.capacity_kb = 1;
    let mind = LocalMind::open(config).await;
    mind.install_model(
        Arc::new(ScriptedProvider::new(&[
            "SUMMARY: The first document.",
            "SUMMARY: The second document.",
        ])),
        4096,
    )
    .await;

    let first = write_doc(&dir, "first.txt", &"alpha ".repeat(70));
    let second = write_doc(&dir, "second.txt", &"bravo ".repeat(70));
    assert!(matches!(learn(&mind, &first).await, LearnEvent::Done(_)));
    let report = match learn(&mind, &second).await {
        LearnEvent::Done(report) => report,
        other => panic!("learning failed: {other:?}"),
    };

    assert_eq!(report.evicted.len(), 1);
    assert_eq!(report.evicted[0].name, "first.txt");
    let names: Vec<_> = mind
        .list_records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["second.txt"]);
    assert!(mind.store().total_bytes() <= mind.store().capacity_bytes());
}

#[tokio::test]
async fn forgetting_everything_brings_back_the_no_documents_notice() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let provider = Arc::new(ScriptedProvider::new(&[
        &extraction("A recipe.", "Bake at 230C"),
        "There are no documents yet.",
    ]));
    mind.install_model(provider.clone(), 4096).await;

    let doc = write_doc(&dir, "recipe.md", "Bake at 230C for 40 minutes.");
    assert!(matches!(learn(&mind, &doc).await, LearnEvent::Done(_)));
    assert_eq!(mind.forget_all().await.removed, 1);

    chat_text(&mind, &[], "Give me a summary of the document", Profile::General).await;
    let system = &provider.last_request().messages[0].content;
    assert!(!system.contains("LEARNED KNOWLEDGE"));
    assert!(system.contains("No documents have been imported yet"));
}

#[tokio::test]
async fn history_is_sent_between_system_and_user_turn() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let provider = Arc::new(ScriptedProvider::new(&["Sure."]));
    mind.install_model(provider.clone(), 4096).await;

    let history = vec![
        Message::user("My name is Ada."),
        Message::assistant("Nice to meet you, Ada."),
    ];
    chat_text(&mind, &history, "What is my name?", Profile::Creative).await;

    let request = provider.last_request();
    let contents: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents[1..], ["My name is Ada.", "Nice to meet you, Ada.", "What is my name?"]);
    assert!((request.temperature - 0.8).abs() < f32::EPSILON);
}

// ── Failure Paths ────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_and_learn_need_a_model() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;

    assert!(matches!(
        mind.chat(&[], "hello", Profile::General).await,
        Err(ChatError::NotReady)
    ));

    let doc = write_doc(&dir, "notes.md", "text");
    assert!(matches!(learn(&mind, &doc).await, LearnEvent::Failed { .. }));
    assert!(mind.list_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_files_are_rejected_without_a_model_call() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let provider = Arc::new(ScriptedProvider::new(&["never used"]));
    mind.install_model(provider.clone(), 4096).await;

    let pdf = write_doc(&dir, "paper.pdf", "%PDF-1.7");
    match learn(&mind, &pdf).await {
        LearnEvent::Failed { document, error } => {
            assert_eq!(document, "paper.pdf");
            assert!(error.contains("pdf"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(provider.requests().is_empty());
    assert!(mind.list_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_generation_keeps_only_delivered_text() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    mind.install_model(
        Arc::new(SlowStreamProvider {
            tokens: 200,
            delay: Duration::from_millis(5),
        }),
        4096,
    )
    .await;

    let mut stream = mind.chat(&[], "Tell me a long story", Profile::Creative).await.unwrap();
    let mut received = String::new();
    for _ in 0..3 {
        match stream.next().await {
            Some(ChatStreamEvent::Chunk { content }) => received.push_str(&content),
            other => panic!("expected a chunk, got {other:?}"),
        }
    }
    stream.cancel();

    match stream.next().await {
        Some(ChatStreamEvent::Done { text, cancelled, .. }) => {
            assert!(cancelled);
            assert_eq!(text, received);
            assert_eq!(text, "w0 w1 w2 ");
        }
        other => panic!("expected cancelled done, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn store_changes_are_broadcast() {
    let dir = TempDir::new().unwrap();
    let mind = LocalMind::open(config_in(&dir)).await;
    let mut events = mind.events().subscribe();
    mind.install_model(
        Arc::new(ScriptedProvider::new(&[&extraction("Event test.", "Fact")])),
        4096,
    )
    .await;

    let doc = write_doc(&dir, "events.md", "body");
    assert!(matches!(learn(&mind, &doc).await, LearnEvent::Done(_)));

    let mut saw_model = false;
    let mut saw_learned = false;
    while let Ok(event) = events.try_recv() {
        match event.as_ref() {
            DomainEvent::ModelChanged { .. } => saw_model = true,
            DomainEvent::DocumentLearned { .. } => saw_learned = true,
            _ => {}
        }
    }
    assert!(saw_model);
    assert!(saw_learned);
}

// ── Configuration ────────────────────────────────────────────────────────

#[test]
fn onboard_template_parses_back_to_defaults() {
    let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
    assert!(parsed.validate().is_ok());
    assert_eq!(parsed.memory.capacity_kb, 2000);
    assert_eq!(parsed.generation.default_profile, "general");
}

#[test]
fn env_overrides_point_memory_elsewhere() {
    let mut config = AppConfig::default();
    config.apply_env_overrides(|key| match key {
        "LOCALMIND_MEMORY_PATH" => Some("/data/mem.json".into()),
        "LOCALMIND_MODEL" => Some("llama3.2".into()),
        _ => None,
    });
    assert_eq!(config.memory.path, Path::new("/data/mem.json"));
    assert_eq!(config.model.name, "llama3.2");
    assert!(config.model.path.is_none());
}
