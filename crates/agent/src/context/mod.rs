//! Prompt context: token estimation and the learned-knowledge assembler.
//!
//! The assembler turns the full store snapshot into one system-prompt
//! fragment. There is no retrieval step; every stored record is rendered,
//! degraded only as far as the token budget requires.

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyReport, ContextAssembler, KNOWLEDGE_FOOTER, KNOWLEDGE_HEADER,
    TRUNCATION_MARKER, TrimInfo, TrimTier,
};
