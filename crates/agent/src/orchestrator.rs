//! Generation orchestrator — one chat turn from prompt to streamed tokens.
//!
//! # Flow
//!
//! 1. Ask the model host for the current model (`NotReady` if none)
//! 2. Assemble learned knowledge from the store snapshot
//! 3. Build system message + bounded history + user turn
//! 4. Fit the prompt into the model window (drop history, shrink reserve)
//! 5. Stream from the provider on a background task, relaying chunks
//!
//! The consumer side ([`ChatStream`]) owns the delivered text, so a
//! cancelled turn ends with exactly what the user already saw.

use crate::context::ContextAssembler;
use crate::context::token;
use crate::profile::Profile;
use crate::stream_event::ChatStreamEvent;
use chrono::Utc;
use localmind_config::AppConfig;
use localmind_core::error::{ChatError, ProviderError};
use localmind_core::message::{Conversation, ConversationId, Message, Role};
use localmind_core::provider::{ChunkReceiver, ProviderRequest, Usage};
use localmind_core::{DomainEvent, EventBus};
use localmind_memory::StoreSnapshot;
use localmind_providers::ModelHost;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Words that suggest the user is asking about imported documents.
const DOCUMENT_HINTS: [&str; 5] = ["document", "chapter", "summary", "book", "pdf"];

pub const NO_DOCUMENTS_NOTICE: &str = "IMPORTANT: No documents have been imported yet. If the \
    user asks about documents, chapters, or summaries, politely inform them that no documents \
    are available and they need to import documents first using `localmind learn <FILE>`.";

/// Prompt sizing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Non-system history messages kept before the window check
    pub history_window: usize,
    pub max_response_tokens: usize,
    /// The response reserve is never shrunk below this
    pub min_response_tokens: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_window: config.context.history_window,
            max_response_tokens: config.generation.max_response_tokens,
            min_response_tokens: config.generation.min_response_tokens,
        }
    }
}

/// The prompt that will be sent, after window fitting.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub messages: Vec<Message>,
    /// Tokens left for the response
    pub response_tokens: usize,
    /// Estimated prompt tokens
    pub prompt_tokens: usize,
    /// History messages dropped to fit the window
    pub history_dropped: usize,
}

pub struct ChatOrchestrator {
    host: Arc<ModelHost>,
    assembler: ContextAssembler,
    settings: OrchestratorSettings,
    events: Option<Arc<EventBus>>,
}

impl ChatOrchestrator {
    pub fn new(host: Arc<ModelHost>, assembler: ContextAssembler) -> Self {
        Self {
            host,
            assembler,
            settings: OrchestratorSettings::default(),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Start a response to `user_turn`. `history` excludes the user turn.
    pub async fn respond(
        &self,
        history: &[Message],
        user_turn: &str,
        snapshot: &StoreSnapshot,
        profile: Profile,
    ) -> Result<ChatStream, ChatError> {
        self.start(ConversationId::new(), history, user_turn, snapshot, profile)
            .await
    }

    /// [`respond`](Self::respond) with the conversation's messages as history.
    pub async fn respond_in(
        &self,
        conversation: &Conversation,
        user_turn: &str,
        snapshot: &StoreSnapshot,
        profile: Profile,
    ) -> Result<ChatStream, ChatError> {
        self.start(
            conversation.id.clone(),
            &conversation.messages,
            user_turn,
            snapshot,
            profile,
        )
        .await
    }

    async fn start(
        &self,
        conversation_id: ConversationId,
        history: &[Message],
        user_turn: &str,
        snapshot: &StoreSnapshot,
        profile: Profile,
    ) -> Result<ChatStream, ChatError> {
        let loaded = self.host.current().await.ok_or(ChatError::NotReady)?;

        let fragment = self.assembler.assemble(snapshot);
        let system = system_prompt(profile, &fragment, snapshot.is_empty(), user_turn);
        let prepared = self.prepare(system, history, user_turn, loaded.context_window)?;

        debug!(
            profile = %profile,
            prompt_tokens = prepared.prompt_tokens,
            response_tokens = prepared.response_tokens,
            history_dropped = prepared.history_dropped,
            "Prompt prepared"
        );

        let request = ProviderRequest {
            model: loaded.model.clone(),
            messages: prepared.messages,
            temperature: profile.temperature(),
            max_tokens: Some(prepared.response_tokens as u32),
            stream: true,
            stop: Vec::new(),
        };

        let cancel = CancellationToken::new();
        let chunks = loaded.provider.stream(request, cancel.clone()).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(relay(
            chunks,
            tx,
            cancel.clone(),
            RelayContext {
                conversation_id,
                model: loaded.model,
                events: self.events.clone(),
            },
        ));

        Ok(ChatStream::new(rx, cancel))
    }

    /// Bound history and fit everything into `window` tokens.
    pub fn prepare(
        &self,
        system: String,
        history: &[Message],
        user_turn: &str,
        window: usize,
    ) -> Result<PreparedPrompt, ChatError> {
        let system = Message::system(system);
        let user = Message::user(user_turn);
        let fixed = token::estimate_message_tokens(&system) + token::estimate_message_tokens(&user);

        let recent: Vec<&Message> = history.iter().filter(|m| m.role != Role::System).collect();
        let keep_from = recent.len().saturating_sub(self.settings.history_window);
        let mut recent = &recent[keep_from..];
        let mut history_tokens: usize = recent
            .iter()
            .map(|m| token::estimate_message_tokens(m))
            .sum();

        let mut history_dropped = keep_from;
        let max_reserve = self.settings.max_response_tokens;
        while fixed + history_tokens + max_reserve > window && !recent.is_empty() {
            history_tokens -= token::estimate_message_tokens(recent[0]);
            recent = &recent[1..];
            history_dropped += 1;
        }

        let prompt_tokens = fixed + history_tokens;
        let response_tokens = window.saturating_sub(prompt_tokens).min(max_reserve);
        if response_tokens < self.settings.min_response_tokens {
            return Err(ChatError::ContextOverflow {
                required: prompt_tokens + self.settings.min_response_tokens,
                window,
            });
        }

        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(system);
        messages.extend(recent.iter().map(|m| (*m).clone()));
        messages.push(user);

        Ok(PreparedPrompt {
            messages,
            response_tokens,
            prompt_tokens,
            history_dropped,
        })
    }
}

/// Profile preamble, learned knowledge, and the no-documents notice when
/// the store is empty and the user asks about documents.
pub fn system_prompt(profile: Profile, fragment: &str, store_empty: bool, user_turn: &str) -> String {
    let mut system = profile.preamble().to_string();
    if !fragment.is_empty() {
        system.push_str("\n\n");
        system.push_str(fragment);
    }
    if store_empty && mentions_documents(user_turn) {
        system.push_str("\n\n");
        system.push_str(NO_DOCUMENTS_NOTICE);
    }
    system
}

fn mentions_documents(text: &str) -> bool {
    let lower = text.to_lowercase();
    DOCUMENT_HINTS.iter().any(|hint| lower.contains(hint))
}

// ── Streaming ─────────────────────────────────────────────────────────────

struct RelayContext {
    conversation_id: ConversationId,
    model: String,
    events: Option<Arc<EventBus>>,
}

impl RelayContext {
    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

enum RelayEnd {
    Finished,
    Cancelled,
    Failed(ProviderError),
}

/// Forward provider chunks to the consumer until done, cancelled, or failed.
async fn relay(
    mut chunks: ChunkReceiver,
    tx: mpsc::Sender<ChatStreamEvent>,
    cancel: CancellationToken,
    ctx: RelayContext,
) {
    let mut text = String::new();
    let mut usage: Option<Usage> = None;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayEnd::Cancelled,
            next = chunks.recv() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                    text.push_str(&content);
                    if tx.send(ChatStreamEvent::Chunk { content }).await.is_err() {
                        // Consumer dropped the stream
                        cancel.cancel();
                        break RelayEnd::Cancelled;
                    }
                }
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
                if chunk.done {
                    break RelayEnd::Finished;
                }
            }
            Some(Err(e)) => break RelayEnd::Failed(e),
            None if cancel.is_cancelled() => break RelayEnd::Cancelled,
            None => break RelayEnd::Finished,
        }
    };
    // Closing the receiver stops a backend still blocked on sending
    drop(chunks);

    match end {
        RelayEnd::Finished => {
            let tokens_used = usage
                .map(|u| u.completion_tokens)
                .unwrap_or_else(|| token::estimate_tokens(&text) as u32);
            info!(
                conversation = %ctx.conversation_id,
                model = %ctx.model,
                tokens = tokens_used,
                "Response generated"
            );
            ctx.publish(DomainEvent::ResponseGenerated {
                conversation_id: ctx.conversation_id.to_string(),
                model: ctx.model.clone(),
                tokens_used,
                timestamp: Utc::now(),
            });
            let _ = tx
                .send(ChatStreamEvent::Done {
                    text,
                    usage,
                    cancelled: false,
                })
                .await;
        }
        RelayEnd::Cancelled => {
            info!(
                conversation = %ctx.conversation_id,
                delivered_chars = text.chars().count(),
                "Generation cancelled"
            );
            ctx.publish(DomainEvent::GenerationCancelled {
                conversation_id: ctx.conversation_id.to_string(),
                delivered_chars: text.chars().count(),
                timestamp: Utc::now(),
            });
            let _ = tx
                .send(ChatStreamEvent::Done {
                    text,
                    usage,
                    cancelled: true,
                })
                .await;
        }
        RelayEnd::Failed(e) => {
            warn!(conversation = %ctx.conversation_id, error = %e, "Generation failed mid-stream");
            ctx.publish(DomainEvent::ErrorOccurred {
                context: "generation".into(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
            let _ = tx
                .send(ChatStreamEvent::Error {
                    message: e.to_string(),
                    partial: text,
                })
                .await;
        }
    }
}

/// Consumer end of one streamed response.
///
/// Yields `Chunk`s followed by exactly one terminal event (`Done` or
/// `Error`), then `None`. After cancellation no further chunk is yielded.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatStreamEvent>,
    cancel: CancellationToken,
    delivered: String,
    finished: bool,
}

impl ChatStream {
    fn new(rx: mpsc::Receiver<ChatStreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            delivered: String::new(),
            finished: false,
        }
    }

    /// A clone of the token that cancels this generation.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Text yielded so far.
    pub fn delivered(&self) -> &str {
        &self.delivered
    }

    pub async fn next(&mut self) -> Option<ChatStreamEvent> {
        if self.finished {
            return None;
        }
        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => Some(event),
        };
        let Some(event) = event else {
            return Some(self.finish_cancelled(None));
        };
        // A chunk may race a cancel that landed while waiting
        if self.cancel.is_cancelled() {
            let usage = match &event {
                Some(ChatStreamEvent::Done { usage, .. }) => *usage,
                _ => None,
            };
            return Some(self.finish_cancelled(usage));
        }

        match event {
            Some(ChatStreamEvent::Chunk { content }) => {
                self.delivered.push_str(&content);
                Some(ChatStreamEvent::Chunk { content })
            }
            Some(ChatStreamEvent::Done {
                usage, cancelled, ..
            }) => {
                self.finished = true;
                Some(ChatStreamEvent::Done {
                    text: self.delivered.clone(),
                    usage,
                    cancelled,
                })
            }
            Some(ChatStreamEvent::Error { message, .. }) => {
                self.finished = true;
                Some(ChatStreamEvent::Error {
                    message,
                    partial: self.delivered.clone(),
                })
            }
            None => {
                self.finished = true;
                Some(ChatStreamEvent::Error {
                    message: "generation task ended without a result".into(),
                    partial: self.delivered.clone(),
                })
            }
        }
    }

    /// Drain the stream and return its terminal event.
    pub async fn finish(mut self) -> ChatStreamEvent {
        let mut last = None;
        while let Some(event) = self.next().await {
            last = Some(event);
        }
        last.unwrap_or_else(|| ChatStreamEvent::Done {
            text: self.delivered.clone(),
            usage: None,
            cancelled: self.cancel.is_cancelled(),
        })
    }

    fn finish_cancelled(&mut self, usage: Option<Usage>) -> ChatStreamEvent {
        self.finished = true;
        self.rx.close();
        ChatStreamEvent::Done {
            text: self.delivered.clone(),
            usage,
            cancelled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, TokenStreamProvider, host_with};
    use localmind_core::{KnowledgeRecord, RecordContent, RecordLimits};
    use std::time::Duration;

    fn orchestrator(host: Arc<ModelHost>) -> ChatOrchestrator {
        ChatOrchestrator::new(host, ContextAssembler::default())
    }

    fn one_record() -> StoreSnapshot {
        let content = RecordContent {
            summary: "Rust ownership rules.".into(),
            key_concepts: vec!["borrowing".into()],
            ..RecordContent::default()
        };
        StoreSnapshot::from_records(
            vec![KnowledgeRecord::new("rust.md", content, &RecordLimits::default())],
            1024,
        )
    }

    #[tokio::test]
    async fn not_ready_without_model() {
        let orch = orchestrator(Arc::new(ModelHost::new()));
        let result = orch
            .respond(&[], "hello", &StoreSnapshot::default(), Profile::General)
            .await;
        assert!(matches!(result, Err(ChatError::NotReady)));
    }

    #[tokio::test]
    async fn streams_chunks_then_done() {
        let provider = Arc::new(TokenStreamProvider::new(
            &["Hel", "lo", " world"],
            Duration::from_millis(1),
        ));
        let orch = orchestrator(host_with(provider.clone(), 4096).await);
        let mut stream = orch
            .respond(&[], "hi", &StoreSnapshot::default(), Profile::General)
            .await
            .unwrap();

        let mut chunks = Vec::new();
        let terminal = loop {
            match stream.next().await.unwrap() {
                ChatStreamEvent::Chunk { content } => chunks.push(content),
                other => break other,
            }
        };
        assert_eq!(chunks, vec!["Hel", "lo", " world"]);
        match terminal {
            ChatStreamEvent::Done {
                text,
                cancelled,
                usage,
            } => {
                assert_eq!(text, "Hello world");
                assert!(!cancelled);
                assert_eq!(usage.unwrap().completion_tokens, 3);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_after_five_tokens_keeps_exactly_those() {
        let provider = Arc::new(TokenStreamProvider::numbered(200, Duration::from_millis(5)));
        let orch = orchestrator(host_with(provider.clone(), 4096).await);
        let mut stream = orch
            .respond(&[], "count", &StoreSnapshot::default(), Profile::General)
            .await
            .unwrap();

        let mut seen = String::new();
        for _ in 0..5 {
            match stream.next().await.unwrap() {
                ChatStreamEvent::Chunk { content } => seen.push_str(&content),
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        stream.cancel_handle().cancel();

        match stream.next().await.unwrap() {
            ChatStreamEvent::Done {
                text, cancelled, ..
            } => {
                assert!(cancelled);
                assert_eq!(text, "t0 t1 t2 t3 t4 ");
                assert_eq!(text, seen);
            }
            other => panic!("expected cancelled done, got {other:?}"),
        }
        assert!(stream.next().await.is_none());

        // The backend notices the token and stops producing
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = provider.sent();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.sent(), sent);
        assert!(sent < 200);
    }

    #[tokio::test]
    async fn mid_stream_failure_preserves_partial_text() {
        let provider = Arc::new(
            TokenStreamProvider::new(&["a", "b", "c"], Duration::from_millis(1)).failing_after(2),
        );
        let orch = orchestrator(host_with(provider, 4096).await);
        let stream = orch
            .respond(&[], "hi", &StoreSnapshot::default(), Profile::Code)
            .await
            .unwrap();

        match stream.finish().await {
            ChatStreamEvent::Error { message, partial } => {
                assert_eq!(partial, "ab");
                assert!(message.contains("connection lost"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_failure_before_streaming_is_generation_error() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::Network(
            "refused".into(),
        )));
        let orch = orchestrator(host_with(provider, 4096).await);
        let result = orch
            .respond(&[], "hi", &StoreSnapshot::default(), Profile::General)
            .await;
        assert!(matches!(result, Err(ChatError::Generation(_))));
    }

    #[tokio::test]
    async fn request_carries_profile_knowledge_and_history() {
        let provider = Arc::new(ScriptedProvider::text("Sure."));
        let orch = orchestrator(host_with(provider.clone(), 4096).await);
        let history = vec![
            Message::system("old system prompt"),
            Message::user("first question"),
            Message::assistant("first answer"),
        ];
        let done = orch
            .respond(&history, "what is borrowing?", &one_record(), Profile::Document)
            .await
            .unwrap()
            .finish()
            .await;
        assert!(matches!(done, ChatStreamEvent::Done { ref text, .. } if text == "Sure."));

        let request = &provider.requests()[0];
        assert_eq!(request.model, "test-model");
        assert!((request.temperature - 0.30).abs() < f32::EPSILON);
        assert!(request.stream);
        assert_eq!(request.max_tokens, Some(512));

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        let system = &request.messages[0].content;
        assert!(system.starts_with(Profile::Document.preamble()));
        assert!(system.contains("=== LEARNED KNOWLEDGE ==="));
        assert!(system.contains("From: rust.md"));
        assert_eq!(request.messages[3].content, "what is borrowing?");
    }

    #[tokio::test]
    async fn history_is_limited_to_window() {
        let provider = Arc::new(ScriptedProvider::text("ok"));
        let orch = orchestrator(host_with(provider.clone(), 4096).await).with_settings(
            OrchestratorSettings {
                history_window: 4,
                ..OrchestratorSettings::default()
            },
        );
        let history: Vec<Message> = (0..10).map(|i| Message::user(format!("m{i}"))).collect();
        orch.respond(&history, "now", &StoreSnapshot::default(), Profile::General)
            .await
            .unwrap()
            .finish()
            .await;

        let messages = &provider.requests()[0].messages;
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].content, "m6");
        assert_eq!(messages[4].content, "m9");
    }

    #[test]
    fn no_documents_notice_only_when_store_empty_and_asked() {
        let with = system_prompt(Profile::General, "", true, "Summarize chapter 2");
        assert!(with.contains(NO_DOCUMENTS_NOTICE));

        let unrelated = system_prompt(Profile::General, "", true, "What is 2+2?");
        assert!(!unrelated.contains(NO_DOCUMENTS_NOTICE));

        let stored = system_prompt(Profile::General, "=== LEARNED KNOWLEDGE ===", false, "the book");
        assert!(!stored.contains(NO_DOCUMENTS_NOTICE));
    }

    #[tokio::test]
    async fn oldest_history_dropped_then_reserve_shrinks() {
        let orch = orchestrator(Arc::new(ModelHost::new()));
        let history: Vec<Message> = (0..4).map(|_| Message::user("x".repeat(400))).collect();
        // system and user cost 5 each, every history message 104
        let prepared = orch
            .prepare("sys".into(), &history, "hi", 10 + 2 * 104 + 512)
            .unwrap();
        assert_eq!(prepared.history_dropped, 2);
        assert_eq!(prepared.messages.len(), 4);
        assert_eq!(prepared.response_tokens, 512);

        let tight = orch.prepare("sys".into(), &history, "hi", 10 + 150).unwrap();
        assert_eq!(tight.history_dropped, 4);
        assert_eq!(tight.response_tokens, 150);
    }

    #[tokio::test]
    async fn user_turn_larger_than_window_overflows() {
        let provider = Arc::new(ScriptedProvider::text("never"));
        let orch = orchestrator(host_with(provider.clone(), 256).await);
        let huge = "word ".repeat(400);
        let result = orch
            .respond(&[], &huge, &StoreSnapshot::default(), Profile::General)
            .await;
        match result {
            Err(ChatError::ContextOverflow { required, window }) => {
                assert_eq!(window, 256);
                assert!(required > window);
            }
            other => panic!("expected overflow, got {:?}", other.map(|_| ())),
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn events_published_for_finished_and_cancelled_turns() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let provider = Arc::new(ScriptedProvider::text("done"));
        let orch = orchestrator(host_with(provider, 4096).await).with_events(Arc::clone(&bus));

        orch.respond(&[], "hi", &StoreSnapshot::default(), Profile::General)
            .await
            .unwrap()
            .finish()
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ResponseGenerated { tokens_used: 5, .. }
        ));

        let slow = Arc::new(TokenStreamProvider::numbered(200, Duration::from_millis(5)));
        let orch = orchestrator(host_with(slow, 4096).await).with_events(Arc::clone(&bus));
        let mut stream = orch
            .respond(&[], "count", &StoreSnapshot::default(), Profile::General)
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(matches!(
                stream.next().await,
                Some(ChatStreamEvent::Chunk { .. })
            ));
        }
        stream.cancel();
        stream.finish().await;

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event.as_ref() {
            DomainEvent::GenerationCancelled {
                delivered_chars, ..
            } => assert!(*delivered_chars >= "t0 t1 t2 ".len()),
            other => panic!("expected a cancellation event, got {other:?}"),
        }
    }
}
