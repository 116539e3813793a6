//! Structured knowledge records — the compressed form of one imported document.
//!
//! A record keeps the handful of things a model needs to talk about a document
//! (summary, key concepts, facts, glossary, structure) plus a bounded excerpt
//! of the raw text for citation lookups. Its `size_bytes` is derived from the
//! content fields and recomputed on every mutation and on deserialization, so
//! the bounded store can trust it without re-measuring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Number of hex characters kept from the name digest.
const ID_HEX_LEN: usize = 12;

/// Stable record id for a document display name.
///
/// Re-importing a document with the same name targets the same id, which is
/// what makes re-import an overwrite rather than a duplicate.
pub fn document_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut id = String::with_capacity(ID_HEX_LEN);
    for byte in digest.iter().take(ID_HEX_LEN / 2) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Cut `text` to at most `max_chars` characters, always on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Per-field caps applied when a record is built or its content replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLimits {
    pub summary_max_chars: usize,
    pub max_key_concepts: usize,
    pub max_facts: usize,
    pub excerpt_max_chars: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            summary_max_chars: 500,
            max_key_concepts: 15,
            max_facts: 20,
            excerpt_max_chars: 10_000,
        }
    }
}

/// Uncapped content for a record, as produced by the compressor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordContent {
    pub summary: String,
    pub key_concepts: Vec<String>,
    pub facts: Vec<String>,
    pub glossary: BTreeMap<String, String>,
    pub structure: String,
    pub excerpt: String,
}

impl RecordContent {
    fn capped(self, limits: &RecordLimits) -> Self {
        let mut key_concepts = self.key_concepts;
        key_concepts.truncate(limits.max_key_concepts);
        let mut facts = self.facts;
        facts.truncate(limits.max_facts);
        Self {
            summary: truncate_chars(&self.summary, limits.summary_max_chars).to_string(),
            key_concepts,
            facts,
            glossary: self.glossary,
            structure: self.structure,
            excerpt: truncate_chars(&self.excerpt, limits.excerpt_max_chars).to_string(),
        }
    }
}

/// One compressed document.
///
/// Fields are private; every mutator recomputes `size_bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct KnowledgeRecord {
    id: String,
    name: String,
    summary: String,
    key_concepts: Vec<String>,
    facts: Vec<String>,
    glossary: BTreeMap<String, String>,
    structure: String,
    excerpt: String,
    size_bytes: usize,
    imported_at: DateTime<Utc>,
    source_bytes: usize,
    sequence: u64,
}

/// On-disk shape. A stored `size_bytes` is ignored and recomputed.
#[derive(Deserialize)]
struct StoredRecord {
    id: String,
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_concepts: Vec<String>,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    glossary: BTreeMap<String, String>,
    #[serde(default)]
    structure: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default = "Utc::now")]
    imported_at: DateTime<Utc>,
    #[serde(default)]
    source_bytes: usize,
    #[serde(default)]
    sequence: u64,
}

impl From<StoredRecord> for KnowledgeRecord {
    fn from(stored: StoredRecord) -> Self {
        let mut record = Self {
            id: stored.id,
            name: stored.name,
            summary: stored.summary,
            key_concepts: stored.key_concepts,
            facts: stored.facts,
            glossary: stored.glossary,
            structure: stored.structure,
            excerpt: stored.excerpt,
            size_bytes: 0,
            imported_at: stored.imported_at,
            source_bytes: stored.source_bytes,
            sequence: stored.sequence,
        };
        record.recompute_size();
        record
    }
}

/// Borrowed view of the fields that count towards `size_bytes`.
#[derive(Serialize)]
struct SizedFields<'a> {
    id: &'a str,
    name: &'a str,
    summary: &'a str,
    key_concepts: &'a [String],
    facts: &'a [String],
    glossary: &'a BTreeMap<String, String>,
    structure: &'a str,
    excerpt: &'a str,
}

impl KnowledgeRecord {
    /// Build a record for `name`, capping `content` with `limits`.
    pub fn new(name: impl Into<String>, content: RecordContent, limits: &RecordLimits) -> Self {
        let name = name.into();
        let content = content.capped(limits);
        let mut record = Self {
            id: document_id(&name),
            name,
            summary: content.summary,
            key_concepts: content.key_concepts,
            facts: content.facts,
            glossary: content.glossary,
            structure: content.structure,
            excerpt: content.excerpt,
            size_bytes: 0,
            imported_at: Utc::now(),
            source_bytes: 0,
            sequence: 0,
        };
        record.recompute_size();
        record
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn key_concepts(&self) -> &[String] {
        &self.key_concepts
    }

    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    pub fn glossary(&self) -> &BTreeMap<String, String> {
        &self.glossary
    }

    pub fn structure(&self) -> &str {
        &self.structure
    }

    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }

    /// Byte length of the compact JSON encoding of the content fields.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn imported_at(&self) -> DateTime<Utc> {
        self.imported_at
    }

    /// Size of the extracted source text this record was compressed from.
    pub fn source_bytes(&self) -> usize {
        self.source_bytes
    }

    /// Store-assigned insertion sequence; lower is older.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Replace the content, keeping id, name and bookkeeping.
    pub fn replace_content(&mut self, content: RecordContent, limits: &RecordLimits) {
        let content = content.capped(limits);
        self.summary = content.summary;
        self.key_concepts = content.key_concepts;
        self.facts = content.facts;
        self.glossary = content.glossary;
        self.structure = content.structure;
        self.excerpt = content.excerpt;
        self.recompute_size();
    }

    pub fn set_source_bytes(&mut self, source_bytes: usize) {
        self.source_bytes = source_bytes;
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn summarize(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            size_bytes: self.size_bytes,
        }
    }

    fn recompute_size(&mut self) {
        let fields = SizedFields {
            id: &self.id,
            name: &self.name,
            summary: &self.summary,
            key_concepts: &self.key_concepts,
            facts: &self.facts,
            glossary: &self.glossary,
            structure: &self.structure,
            excerpt: &self.excerpt,
        };
        // String-keyed maps and plain strings cannot fail to encode
        self.size_bytes = serde_json::to_vec(&fields).map(|v| v.len()).unwrap_or(0);
    }
}

/// Listing view of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: String,
    pub name: String,
    pub size_bytes: usize,
}

/// How much a document shrank on its way into memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_kb: f64,
    pub compressed_kb: f64,
    /// original / compressed; 0 when the record is empty
    pub ratio: f64,
    pub savings_percent: f64,
}

impl CompressionStats {
    pub fn of(record: &KnowledgeRecord) -> Self {
        let original = record.source_bytes as f64;
        let compressed = record.size_bytes as f64;
        let ratio = if compressed > 0.0 { original / compressed } else { 0.0 };
        let savings_percent = if original > 0.0 {
            (1.0 - compressed / original) * 100.0
        } else {
            0.0
        };
        Self {
            original_kb: original / 1024.0,
            compressed_kb: compressed / 1024.0,
            ratio,
            savings_percent,
        }
    }
}
