//! Domain event system — decoupled communication between bounded contexts.
//!
//! The memory store, the learning pipeline and the orchestrator publish events
//! here; the CLI (or any other surface) subscribes and renders what it wants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A record was inserted or replaced in the bounded store
    RecordStored {
        id: String,
        name: String,
        size_bytes: usize,
        replaced: bool,
        total_bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// A record was evicted to bring the store back under capacity
    RecordEvicted {
        id: String,
        name: String,
        size_bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// A record was removed on user request
    RecordForgotten {
        id: String,
        timestamp: DateTime<Utc>,
    },

    /// The store file could not be written; in-memory state is still valid
    PersistenceFailed {
        path: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A document finished the learning pipeline
    DocumentLearned {
        id: String,
        name: String,
        source_bytes: usize,
        size_bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator finished streaming a response
    ResponseGenerated {
        conversation_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A generation was cancelled by the user
    GenerationCancelled {
        conversation_id: String,
        delivered_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// A model was loaded into (or removed from) the host slot
    ModelChanged {
        model: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
