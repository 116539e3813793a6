//! Bounded knowledge memory for LocalMind.
//!
//! One JSON file holds every compressed document. The store keeps them in
//! import order, evicts the oldest when the byte ceiling is crossed, and hands
//! out immutable snapshots for context assembly.

pub mod citation;
pub mod persist;
pub mod store;

pub use citation::find_citation;
pub use store::{
    BoundedStore, ClearOutcome, InsertOutcome, RemoveOutcome, StoreSettings, StoreSnapshot,
};
