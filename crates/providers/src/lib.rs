//! Generation backends for LocalMind.
//!
//! All providers implement the `localmind_core::Provider` trait. The
//! [`ModelHost`] holds whichever one is currently loaded.

pub mod host;
#[cfg(feature = "local")]
pub mod local;
pub mod openai_compat;
pub mod template;

pub use host::{DEFAULT_SERVER_URL, LoadedModel, ModelHost};
#[cfg(feature = "local")]
pub use local::LocalProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use template::{ChatTemplate, Scan, StopScanner};
