//! Compressor — one model call turns a document into a knowledge record.
//!
//! The model is asked for five delimited sections (`SUMMARY:`,
//! `KEY CONCEPTS:`, `FACTS:`, `GLOSSARY:`, `STRUCTURE:`). Small local models
//! rarely follow a format exactly, so the parser accepts markdown headers,
//! bold labels, numbered or bulleted lists, and falls back to using the whole
//! answer as the summary when no section is recognizable.

use localmind_config::AppConfig;
use localmind_core::error::CompressionError;
use localmind_core::message::Message;
use localmind_core::provider::ProviderRequest;
use localmind_core::record::truncate_chars;
use localmind_core::{KnowledgeRecord, RecordContent, RecordLimits};
use localmind_providers::ModelHost;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract key information from documents concisely.";

#[derive(Debug, Clone, PartialEq)]
pub struct CompressorSettings {
    /// Document text beyond this many chars is not sent to the model
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub limits: RecordLimits,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl CompressorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_input_chars: config.compression.max_input_chars,
            max_output_tokens: config.compression.max_output_tokens,
            temperature: config.compression.temperature,
            limits: config.record_limits(),
        }
    }
}

pub struct Compressor {
    host: Arc<ModelHost>,
    settings: CompressorSettings,
}

impl Compressor {
    pub fn new(host: Arc<ModelHost>) -> Self {
        Self {
            host,
            settings: CompressorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CompressorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    pub async fn compress(
        &self,
        document_text: &str,
        document_name: &str,
    ) -> Result<KnowledgeRecord, CompressionError> {
        self.compress_cancellable(document_text, document_name, CancellationToken::new())
            .await
    }

    pub async fn compress_cancellable(
        &self,
        document_text: &str,
        document_name: &str,
        cancel: CancellationToken,
    ) -> Result<KnowledgeRecord, CompressionError> {
        let output = self
            .extract(document_text, document_name, cancel)
            .await?;
        self.build_record(document_text, document_name, &output)
    }

    /// Run the single extraction call and return the raw model output.
    pub async fn extract(
        &self,
        document_text: &str,
        document_name: &str,
        cancel: CancellationToken,
    ) -> Result<String, CompressionError> {
        if document_text.trim().is_empty() {
            return Err(CompressionError::EmptyDocument(document_name.to_string()));
        }
        let loaded = self.host.current().await.ok_or(CompressionError::NotReady)?;

        let sample = truncate_chars(document_text, self.settings.max_input_chars);
        info!(
            document = document_name,
            chars = document_text.chars().count(),
            sent_chars = sample.chars().count(),
            "Compressing document"
        );

        let mut request = ProviderRequest::new(
            loaded.model.clone(),
            vec![
                Message::system(EXTRACTION_SYSTEM_PROMPT),
                Message::user(extraction_prompt(sample)),
            ],
        );
        request.temperature = self.settings.temperature;
        request.max_tokens = Some(self.settings.max_output_tokens);

        let cancelled = || CompressionError::Cancelled(document_name.to_string());
        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            chunks = loaded.provider.stream(request, cancel.clone()) => chunks?,
        };

        let mut output = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                next = chunks.recv() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if let Some(content) = chunk.content {
                        output.push_str(&content);
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(e)) => return Err(CompressionError::Generation(e)),
                None if cancel.is_cancelled() => return Err(cancelled()),
                None => break,
            }
        }

        if output.trim().is_empty() {
            warn!(document = document_name, "Model returned an empty extraction");
            return Err(CompressionError::EmptyResponse(document_name.to_string()));
        }
        debug!(document = document_name, output_chars = output.len(), "Extraction received");
        Ok(output)
    }

    /// Parse model output into a capped record for `document_name`.
    pub fn build_record(
        &self,
        document_text: &str,
        document_name: &str,
        output: &str,
    ) -> Result<KnowledgeRecord, CompressionError> {
        if output.trim().is_empty() {
            return Err(CompressionError::EmptyResponse(document_name.to_string()));
        }
        let mut content = match parse_extraction(output) {
            ExtractionParse::Parsed(extraction) => extraction.into_content(),
            ExtractionParse::Fallback { summary } => {
                warn!(
                    document = document_name,
                    "No extraction sections recognized, keeping whole answer as summary"
                );
                RecordContent {
                    summary,
                    ..RecordContent::default()
                }
            }
        };
        content.excerpt = document_text.to_string();

        let mut record = KnowledgeRecord::new(document_name, content, &self.settings.limits);
        record.set_source_bytes(document_text.len());
        info!(
            id = %record.id(),
            document = document_name,
            size_bytes = record.size_bytes(),
            source_bytes = document_text.len(),
            "Document compressed"
        );
        Ok(record)
    }
}

pub fn extraction_prompt(document_text: &str) -> String {
    format!(
        "Extract key information from this document.\n\
         \n\
         DOCUMENT:\n\
         {document_text}\n\
         \n\
         Respond using exactly these sections:\n\
         SUMMARY: 2-3 sentences describing the document\n\
         KEY CONCEPTS:\n\
         - main concepts or topics (5-10 items)\n\
         FACTS:\n\
         - important facts or key points (5-10 items)\n\
         GLOSSARY:\n\
         - term: definition\n\
         STRUCTURE: one sentence on how the document is organized"
    )
}

// ── Parsing ───────────────────────────────────────────────────────────────

/// Fields recognized in model output, before record caps apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub summary: String,
    pub key_concepts: Vec<String>,
    pub facts: Vec<String>,
    pub glossary: BTreeMap<String, String>,
    pub structure: String,
}

impl Extraction {
    pub fn into_content(self) -> RecordContent {
        RecordContent {
            summary: self.summary,
            key_concepts: self.key_concepts,
            facts: self.facts,
            glossary: self.glossary,
            structure: self.structure,
            excerpt: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionParse {
    Parsed(Extraction),
    /// No section header was found; the trimmed answer is the summary
    Fallback { summary: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Concepts,
    Facts,
    Glossary,
    Structure,
}

impl Section {
    fn is_list(self) -> bool {
        matches!(self, Self::Concepts | Self::Facts | Self::Glossary)
    }
}

/// Header labels, longest first so `KEY CONCEPTS` wins over `CONCEPTS`.
const LABELS: [(&str, Section); 11] = [
    ("IMPORTANT FACTS", Section::Facts),
    ("MAIN CONCEPTS", Section::Concepts),
    ("KEY CONCEPTS", Section::Concepts),
    ("DEFINITIONS", Section::Glossary),
    ("KEY POINTS", Section::Facts),
    ("STRUCTURE", Section::Structure),
    ("KEY FACTS", Section::Facts),
    ("CONCEPTS", Section::Concepts),
    ("GLOSSARY", Section::Glossary),
    ("SUMMARY", Section::Summary),
    ("FACTS", Section::Facts),
];

pub fn parse_extraction(output: &str) -> ExtractionParse {
    let mut extraction = Extraction::default();
    let mut current: Option<Section> = None;
    let mut found_header = false;
    let mut last_marker: Option<Marker> = None;
    // Prose before the first header
    let mut lead = String::new();

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (marker, text) = strip_list_marker(line);
        if let Some((section, inline)) = section_header(line) {
            // `- Summary: short overview` inside a list is an entry, not a header
            let list_entry = !inline.is_empty()
                && current.is_some_and(Section::is_list)
                && match marker {
                    Some(Marker::Bullet) => true,
                    Some(Marker::Numbered) => last_marker == Some(Marker::Numbered),
                    None => false,
                };
            if !list_entry {
                found_header = true;
                current = Some(section);
                last_marker = None;
                if !inline.is_empty() {
                    extraction.add(section, inline, false);
                }
                continue;
            }
        }
        match current {
            Some(section) => {
                if marker.is_some() {
                    last_marker = marker;
                }
                extraction.add(section, text, marker.is_some());
            }
            None => append_sentence(&mut lead, clean(line)),
        }
    }

    if found_header {
        if extraction.summary.is_empty() {
            extraction.summary = lead;
        }
        ExtractionParse::Parsed(extraction)
    } else {
        ExtractionParse::Fallback {
            summary: output.trim().to_string(),
        }
    }
}

impl Extraction {
    fn add(&mut self, section: Section, text: &str, is_item: bool) {
        let text = clean(text);
        if text.is_empty() {
            return;
        }
        match section {
            Section::Summary => append_sentence(&mut self.summary, text),
            Section::Structure => append_sentence(&mut self.structure, text),
            Section::Concepts if !is_item && text.contains(',') => {
                self.key_concepts.extend(
                    text.split(',')
                        .map(|c| clean(c).trim_end_matches('.').to_string())
                        .filter(|c| !c.is_empty()),
                );
            }
            Section::Concepts => self.key_concepts.push(text.trim_end_matches('.').to_string()),
            Section::Facts => self.facts.push(text.to_string()),
            Section::Glossary => {
                if let Some((term, definition)) = split_definition(text) {
                    self.glossary.insert(term.to_string(), definition.to_string());
                }
            }
        }
    }
}

fn append_sentence(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

/// Recognize a section header and return the text following it.
fn section_header(line: &str) -> Option<(Section, &str)> {
    let (_, stripped) = strip_list_marker(line);
    let stripped = stripped.trim_start_matches(['#', '*', '_', ' ']);
    for (label, section) in LABELS {
        let Some(head) = stripped.get(..label.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(label) {
            continue;
        }
        let rest = stripped[label.len()..].trim_start_matches(['*', '_', ' ']);
        if rest.is_empty() {
            return Some((section, ""));
        }
        if let Some(inline) = rest.strip_prefix(':') {
            return Some((section, inline.trim_start_matches(['*', '_', ' '])));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Bullet,
    Numbered,
}

/// Strip `-`, `*`, `•`, `N.` or `N)` list prefixes.
fn strip_list_marker(line: &str) -> (Option<Marker>, &str) {
    for bullet in ['-', '*', '•'] {
        if let Some(rest) = line.strip_prefix(bullet) {
            if rest.starts_with(' ') || rest.starts_with('\t') {
                return (Some(Marker::Bullet), rest.trim_start());
            }
        }
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && digits <= 3 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if rest.starts_with(' ') || rest.starts_with('\t') {
                return (Some(Marker::Numbered), rest.trim_start());
            }
        }
    }
    (None, line)
}

/// Split a glossary item on the first `:` or ` - `.
fn split_definition(text: &str) -> Option<(&str, &str)> {
    let colon = text.find(':');
    let dash = text.find(" - ");
    let (term, definition) = match (colon, dash) {
        (Some(c), Some(d)) if d < c => (&text[..d], &text[d + 3..]),
        (Some(c), _) => (&text[..c], &text[c + 1..]),
        (None, Some(d)) => (&text[..d], &text[d + 3..]),
        (None, None) => return None,
    };
    let term = clean(term);
    let definition = clean(definition);
    if term.is_empty() || definition.is_empty() {
        return None;
    }
    Some((term, definition))
}

/// Trim whitespace and markdown emphasis from both ends.
fn clean(text: &str) -> &str {
    text.trim().trim_matches(['*', '_', '`']).trim()
}
