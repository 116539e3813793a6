//! LocalMind's document-learning and chat core.
//!
//! Documents are digested once into compact knowledge records and every
//! stored record is injected into each chat turn; there is no retrieval step.
//!
//! 1. **Learn**: extract text, compress it with one model call, store it
//! 2. **Assemble**: render the whole store snapshot within a token budget
//! 3. **Respond**: profile preamble + knowledge + history + user turn,
//!    streamed and cancellable

pub mod compressor;
pub mod context;
pub mod extract;
pub mod learn;
pub mod orchestrator;
pub mod profile;
pub mod runtime;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use compressor::{Compressor, CompressorSettings, Extraction, ExtractionParse, parse_extraction};
pub use context::{AssembledContext, AssemblyReport, ContextAssembler, TrimInfo, TrimTier};
pub use extract::{FileExtractor, TextExtractor};
pub use learn::{LearnEvent, LearnHandle, LearnReport, LearnStage, Librarian};
pub use orchestrator::{ChatOrchestrator, ChatStream, OrchestratorSettings, PreparedPrompt};
pub use profile::{Profile, UnknownProfile};
pub use runtime::LocalMind;
pub use stream_event::ChatStreamEvent;
