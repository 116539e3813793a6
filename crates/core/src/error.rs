//! Error types for the LocalMind domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; all of them are recoverable.

use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all LocalMind operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Document pipeline errors ---
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    // --- Chat turn errors ---
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store lock not acquired within {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },
}

/// A durable write failed while the in-memory state stayed valid.
///
/// Never fatal: the next mutation rewrites the whole file, so the failure is
/// retried implicitly.
#[derive(Debug, Clone, Error)]
#[error("Failed to persist memory store to {path}: {reason}")]
pub struct PersistenceWarning {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Unsupported document format '{extension}' ({path})")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Could not read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum CompressionError {
    #[error("Document '{0}' contains no text")]
    EmptyDocument(String),

    #[error("No model loaded — load a model before importing documents")]
    NotReady,

    #[error("Model call failed: {0}")]
    Generation(#[from] ProviderError),

    #[error("Compression of '{0}' was cancelled")]
    Cancelled(String),

    #[error("Model returned no usable output for '{0}'")]
    EmptyResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("No model loaded — load a model before chatting")]
    NotReady,

    #[error("Prompt needs ~{required} tokens but the model window is {window}")]
    ContextOverflow { required: usize, window: usize },

    #[error("Generation failed: {0}")]
    Generation(#[from] ProviderError),

    #[error("Memory unavailable: {0}")]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 503,
            message: "model still loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model still loading"));
    }

    #[test]
    fn context_overflow_displays_sizes() {
        let err = Error::Chat(ChatError::ContextOverflow {
            required: 5000,
            window: 4096,
        });
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn compression_error_wraps_provider_error() {
        let err: CompressionError = ProviderError::Inference("oom".into()).into();
        assert!(matches!(err, CompressionError::Generation(_)));
        assert!(err.to_string().contains("oom"));
    }
}
