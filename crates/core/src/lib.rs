//! # LocalMind Core
//!
//! Domain types, traits, and error definitions for LocalMind.
//! This crate has **zero framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The generation capability is defined as a trait here (`Provider`) and the
//! compressed document model (`KnowledgeRecord`) is plain data with a derived,
//! never-stale size. Implementations live in their respective crates:
//! - `localmind-memory` stores records under a byte ceiling
//! - `localmind-providers` implements `Provider` for local models
//! - `localmind-agent` compresses documents and orchestrates chat turns

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod record;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use record::{
    CompressionStats, KnowledgeRecord, RecordContent, RecordLimits, RecordSummary, document_id,
    truncate_chars,
};
