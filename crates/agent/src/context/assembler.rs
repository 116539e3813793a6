//! Knowledge assembler: renders the whole store snapshot into the prompt
//! fragment injected on every chat turn.
//!
//! Every stored record is included. When the full rendering exceeds the
//! token budget, records are degraded one tier at a time, oldest record
//! first, re-checking the budget after every step:
//!
//! | Tier | Step |
//! |------|------|
//! | 1 | drop `Structure:` |
//! | 2 | drop `Definitions:` |
//! | 3 | drop `Important Facts:` |
//! | 4 | key concepts cut to 5, summary cut to 160 chars |
//! | 5 | only the `From:` line remains |
//!
//! If even header-only records do not fit, the oldest `From:` lines are
//! dropped until the rest fits and the fragment ends with
//! [`TRUNCATION_MARKER`]. A budget too small for the frame alone gets a
//! plain cut at the budget.

use super::token;
use localmind_config::ContextConfig;
use localmind_core::KnowledgeRecord;
use localmind_core::record::truncate_chars;
use localmind_memory::StoreSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const KNOWLEDGE_HEADER: &str = "=== LEARNED KNOWLEDGE ===";
pub const KNOWLEDGE_FOOTER: &str = "=== END LEARNED KNOWLEDGE ===";
pub const TRUNCATION_MARKER: &str = "\n[... learned knowledge truncated ...]";

/// Key concepts kept per record once tier 4 applies.
pub const SHORT_KEY_CONCEPTS: usize = 5;
/// Summary length kept per record once tier 4 applies.
pub const SHORT_SUMMARY_CHARS: usize = 160;

/// Degradation steps, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimTier {
    Structure,
    Glossary,
    Facts,
    Shortened,
    HeaderOnly,
}

impl TrimTier {
    const ALL: [TrimTier; 5] = [
        TrimTier::Structure,
        TrimTier::Glossary,
        TrimTier::Facts,
        TrimTier::Shortened,
        TrimTier::HeaderOnly,
    ];
}

/// One degradation applied to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrimInfo {
    pub record_id: String,
    pub tier: TrimTier,
}

/// What assembly did to fit the budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyReport {
    /// Estimated tokens of the final fragment
    pub tokens: usize,
    pub budget: usize,
    pub records_included: usize,
    /// Records that lost at least one section
    pub records_trimmed: usize,
    /// Every degradation step, in application order
    pub trims: Vec<TrimInfo>,
    /// The fragment was cut mid-text
    pub hard_cut: bool,
}

/// Output of [`ContextAssembler::assemble_with_report`].
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub fragment: String,
    pub report: AssemblyReport,
}

/// Serializes a store snapshot into a bounded prompt fragment.
///
/// Pure: the same snapshot and budget always give the same text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    max_tokens: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextAssembler {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.max_memory_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn assemble(&self, snapshot: &StoreSnapshot) -> String {
        self.assemble_with_report(snapshot).fragment
    }

    pub fn assemble_with_report(&self, snapshot: &StoreSnapshot) -> AssembledContext {
        let budget = self.max_tokens;
        if snapshot.is_empty() {
            return AssembledContext {
                fragment: String::new(),
                report: AssemblyReport {
                    tokens: 0,
                    budget,
                    records_included: 0,
                    records_trimmed: 0,
                    trims: Vec::new(),
                    hard_cut: false,
                },
            };
        }

        let mut drafts: Vec<Draft<'_>> = snapshot.records().iter().map(Draft::new).collect();
        let mut blocks: Vec<String> = drafts.iter().map(Draft::render).collect();
        let mut length = fragment_len(&blocks);
        let mut trims = Vec::new();

        // ── Tiered degradation, oldest record first within each tier ──────
        'tiers: for tier in TrimTier::ALL {
            if fits(length, budget) {
                break;
            }
            for (idx, draft) in drafts.iter_mut().enumerate() {
                if !draft.apply(tier) {
                    continue;
                }
                let block = draft.render();
                length = length - blocks[idx].len() + block.len();
                blocks[idx] = block;
                trims.push(TrimInfo {
                    record_id: draft.id.to_string(),
                    tier,
                });
                if fits(length, budget) {
                    break 'tiers;
                }
            }
        }

        let mut fragment = join_fragment(&blocks);
        let hard_cut = !fits(fragment.len(), budget);
        let mut dropped = 0;
        if hard_cut {
            // Every record is header-only here; the oldest names go first
            let marked = |kept: &[String]| fragment_len(kept) + TRUNCATION_MARKER.len();
            while dropped < blocks.len() && !fits(marked(&blocks[dropped..]), budget) {
                dropped += 1;
            }
            let kept = join_fragment(&blocks[dropped..]);
            fragment = if fits(marked(&blocks[dropped..]), budget) {
                kept + TRUNCATION_MARKER
            } else {
                hard_cut_fragment(&kept, budget)
            };
        }

        let records_trimmed = drafts.iter().filter(|d| d.trimmed).count();
        let tokens = token::estimate_tokens(&fragment);
        if !trims.is_empty() || hard_cut {
            debug!(
                budget,
                tokens,
                records = drafts.len(),
                records_trimmed,
                hard_cut,
                "Learned knowledge trimmed to fit budget"
            );
        }

        AssembledContext {
            fragment,
            report: AssemblyReport {
                tokens,
                budget,
                records_included: drafts.len() - dropped,
                records_trimmed,
                trims,
                hard_cut,
            },
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────

/// Borrowed, progressively degraded view of one record.
struct Draft<'a> {
    id: &'a str,
    name: &'a str,
    summary: &'a str,
    key_concepts: &'a [String],
    facts: &'a [String],
    glossary: Option<&'a BTreeMap<String, String>>,
    structure: &'a str,
    header_only: bool,
    trimmed: bool,
}

impl<'a> Draft<'a> {
    fn new(record: &'a KnowledgeRecord) -> Self {
        Self {
            id: record.id(),
            name: record.name(),
            summary: record.summary(),
            key_concepts: record.key_concepts(),
            facts: record.facts(),
            glossary: Some(record.glossary()),
            structure: record.structure(),
            header_only: false,
            trimmed: false,
        }
    }

    /// Apply `tier`; false when it would change nothing.
    fn apply(&mut self, tier: TrimTier) -> bool {
        if self.header_only {
            return false;
        }
        let changed = match tier {
            TrimTier::Structure => !std::mem::take(&mut self.structure).is_empty(),
            TrimTier::Glossary => self.glossary.take().is_some_and(|g| !g.is_empty()),
            TrimTier::Facts => !std::mem::take(&mut self.facts).is_empty(),
            TrimTier::Shortened => {
                let all = self.key_concepts;
                let concepts = &all[..all.len().min(SHORT_KEY_CONCEPTS)];
                let summary = truncate_chars(self.summary, SHORT_SUMMARY_CHARS);
                let changed = summary.len() < self.summary.len() || concepts.len() < all.len();
                self.summary = summary;
                self.key_concepts = concepts;
                changed
            }
            TrimTier::HeaderOnly => {
                self.header_only = true;
                true
            }
        };
        self.trimmed |= changed;
        changed
    }

    fn render(&self) -> String {
        let mut out = format!("From: {}", self.name);
        if self.header_only {
            return out;
        }
        out.push_str("\nSummary: ");
        out.push_str(self.summary);
        if !self.key_concepts.is_empty() {
            out.push_str("\nKey Concepts: ");
            out.push_str(&self.key_concepts.join(", "));
        }
        if !self.facts.is_empty() {
            out.push_str("\nImportant Facts:");
            for fact in self.facts {
                out.push_str("\n  • ");
                out.push_str(fact);
            }
        }
        if let Some(glossary) = self.glossary.filter(|g| !g.is_empty()) {
            out.push_str("\nDefinitions:");
            for (term, definition) in glossary {
                out.push_str(&format!("\n  • {term}: {definition}"));
            }
        }
        if !self.structure.is_empty() {
            out.push_str("\nStructure: ");
            out.push_str(self.structure);
        }
        out
    }
}

/// Byte length of `join_fragment(blocks)` without building it.
fn fragment_len(blocks: &[String]) -> usize {
    let separators = 2 * (blocks.len() + 1);
    KNOWLEDGE_HEADER.len()
        + KNOWLEDGE_FOOTER.len()
        + separators
        + blocks.iter().map(String::len).sum::<usize>()
}

fn join_fragment(blocks: &[String]) -> String {
    let mut out = String::with_capacity(fragment_len(blocks));
    out.push_str(KNOWLEDGE_HEADER);
    for block in blocks {
        out.push_str("\n\n");
        out.push_str(block);
    }
    out.push_str("\n\n");
    out.push_str(KNOWLEDGE_FOOTER);
    out
}

fn fits(length: usize, budget: usize) -> bool {
    length.div_ceil(4) <= budget
}

fn hard_cut_fragment(fragment: &str, budget: usize) -> String {
    let marker_tokens = token::estimate_tokens(TRUNCATION_MARKER);
    if budget <= marker_tokens {
        return String::new();
    }
    let mut cut = token::fit_to_tokens(fragment, budget - marker_tokens).to_string();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use localmind_core::{RecordContent, RecordLimits};

    fn record(name: &str, facts: usize) -> KnowledgeRecord {
        let content = RecordContent {
            summary: format!("{name} explains a topic in a few sentences of overview text."),
            key_concepts: (0..8).map(|i| format!("concept {i}")).collect(),
            facts: (0..facts)
                .map(|i| format!("{name} fact number {i} with some supporting detail"))
                .collect(),
            glossary: BTreeMap::from([
                ("alpha".to_string(), "first letter".to_string()),
                ("beta".to_string(), "second letter".to_string()),
            ]),
            structure: "Introduction, three chapters and an appendix".into(),
            excerpt: "SECRET EXCERPT TEXT".into(),
        };
        KnowledgeRecord::new(name, content, &RecordLimits::default())
    }

    fn snapshot(records: Vec<KnowledgeRecord>) -> StoreSnapshot {
        StoreSnapshot::from_records(records, 2000 * 1024)
    }

    fn unbounded() -> ContextAssembler {
        ContextAssembler::new(usize::MAX / 8)
    }

    #[test]
    fn empty_snapshot_is_empty_string() {
        let assembled = ContextAssembler::default().assemble_with_report(&snapshot(vec![]));
        assert_eq!(assembled.fragment, "");
        assert_eq!(assembled.report.tokens, 0);
        assert!(!assembled.report.hard_cut);
    }

    #[test]
    fn layout_matches_format() {
        let content = RecordContent {
            summary: "About plants.".into(),
            key_concepts: vec!["chlorophyll".into(), "light".into()],
            facts: vec!["Leaves are green".into()],
            glossary: BTreeMap::from([("ATP".to_string(), "energy carrier".to_string())]),
            structure: "Two parts".into(),
            excerpt: "raw".into(),
        };
        let rec = KnowledgeRecord::new("plants.txt", content, &RecordLimits::default());
        let text = unbounded().assemble(&snapshot(vec![rec]));
        let expected = "=== LEARNED KNOWLEDGE ===\n\n\
            From: plants.txt\n\
            Summary: About plants.\n\
            Key Concepts: chlorophyll, light\n\
            Important Facts:\n  • Leaves are green\n\
            Definitions:\n  • ATP: energy carrier\n\
            Structure: Two parts\n\n\
            === END LEARNED KNOWLEDGE ===";
        assert_eq!(text, expected);
    }

    #[test]
    fn empty_sections_are_omitted() {
        let content = RecordContent {
            summary: "Only a summary.".into(),
            ..RecordContent::default()
        };
        let rec = KnowledgeRecord::new("bare.md", content, &RecordLimits::default());
        let text = unbounded().assemble(&snapshot(vec![rec]));
        assert!(text.contains("From: bare.md\nSummary: Only a summary.\n\n==="));
        assert!(!text.contains("Key Concepts"));
        assert!(!text.contains("Structure"));
    }

    #[test]
    fn excerpt_is_never_included() {
        let text = unbounded().assemble(&snapshot(vec![record("a.txt", 3)]));
        assert!(!text.contains("SECRET EXCERPT"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let snap = snapshot(vec![record("a.txt", 5), record("b.txt", 5)]);
        let assembler = ContextAssembler::new(120);
        assert_eq!(assembler.assemble(&snap), assembler.assemble(&snap));
        assert_eq!(
            assembler.assemble_with_report(&snap).report,
            assembler.assemble_with_report(&snap).report
        );
    }

    #[test]
    fn records_render_in_insertion_order() {
        let text = unbounded().assemble(&snapshot(vec![record("first.txt", 1), record("second.txt", 1)]));
        let first = text.find("From: first.txt").unwrap();
        let second = text.find("From: second.txt").unwrap();
        assert!(first < second);
    }

    #[test]
    fn full_rendering_within_budget_is_untouched() {
        let snap = snapshot(vec![record("a.txt", 3)]);
        let full = unbounded().assemble_with_report(&snap);
        let exact = ContextAssembler::new(full.report.tokens).assemble_with_report(&snap);
        assert_eq!(exact.fragment, full.fragment);
        assert!(exact.report.trims.is_empty());
        assert_eq!(exact.report.records_trimmed, 0);
    }

    #[test]
    fn oldest_record_degrades_first() {
        let snap = snapshot(vec![record("old.txt", 3), record("new.txt", 3)]);
        let full = unbounded().assemble_with_report(&snap);
        let trimmed = ContextAssembler::new(full.report.tokens - 1).assemble_with_report(&snap);

        assert_eq!(trimmed.report.records_trimmed, 1);
        assert_eq!(
            trimmed.report.trims,
            vec![TrimInfo {
                record_id: snap.records()[0].id().to_string(),
                tier: TrimTier::Structure,
            }]
        );
        let old_block = &trimmed.fragment[..trimmed.fragment.find("From: new.txt").unwrap()];
        let new_block = &trimmed.fragment[trimmed.fragment.find("From: new.txt").unwrap()..];
        assert!(!old_block.contains("Structure:"));
        assert!(new_block.contains("Structure:"));
    }

    #[test]
    fn each_tier_completes_before_the_next() {
        let snap = snapshot(vec![record("a.txt", 6), record("b.txt", 6)]);
        let full = unbounded().assemble_with_report(&snap);
        // Dropping both structures is not enough; glossary of the oldest goes next
        let structure_savings = 2 * "\nStructure: Introduction, three chapters and an appendix".len();
        let budget = (full.fragment.len() - structure_savings).div_ceil(4) - 1;
        let report = ContextAssembler::new(budget).assemble_with_report(&snap).report;
        let tiers: Vec<TrimTier> = report.trims.iter().map(|t| t.tier).collect();
        assert_eq!(
            &tiers[..3],
            &[TrimTier::Structure, TrimTier::Structure, TrimTier::Glossary]
        );
        assert_eq!(report.trims[2].record_id, snap.records()[0].id());
    }

    #[test]
    fn summaries_outlive_facts() {
        let snap = snapshot(vec![record("a.txt", 20), record("b.txt", 20)]);
        let assembled = ContextAssembler::new(150).assemble_with_report(&snap);
        assert!(assembled.report.tokens <= 150);
        assert!(!assembled.fragment.contains("Important Facts:"));
        assert!(assembled.fragment.contains("Summary: a.txt explains"));
        assert!(assembled.fragment.contains("Summary: b.txt explains"));
        assert!(!assembled.report.hard_cut);
    }

    #[test]
    fn header_only_before_hard_cut() {
        let records: Vec<_> = (0..6).map(|i| record(&format!("doc{i}.txt"), 4)).collect();
        let snap = snapshot(records);
        let assembled = ContextAssembler::new(80).assemble_with_report(&snap);
        assert!(assembled.report.tokens <= 80);
        assert!(
            assembled
                .report
                .trims
                .iter()
                .any(|t| t.tier == TrimTier::HeaderOnly)
        );
        // The newest record keeps its summary the longest
        assert!(
            assembled
                .fragment
                .contains("From: doc4.txt\n\nFrom: doc5.txt\nSummary: doc5.txt explains")
        );
        assert!(assembled.fragment.contains("From: doc0.txt\n\nFrom: doc1.txt"));
        assert!(!assembled.report.hard_cut);
    }

    #[test]
    fn hard_cut_when_headers_alone_overflow() {
        let records: Vec<_> = (0..20).map(|i| record(&format!("document-{i}.txt"), 2)).collect();
        let snap = snapshot(records);
        let assembled = ContextAssembler::new(40).assemble_with_report(&snap);
        assert!(assembled.report.hard_cut);
        assert!(assembled.fragment.ends_with(TRUNCATION_MARKER));
        assert!(token::estimate_tokens(&assembled.fragment) <= 40);
        assert_eq!(assembled.report.records_trimmed, 20);
    }

    #[test]
    fn hard_cut_keeps_the_newest_document_names() {
        let records: Vec<_> = (0..20).map(|i| record(&format!("document-{i}.txt"), 2)).collect();
        let snap = snapshot(records);
        let assembled = ContextAssembler::new(50).assemble_with_report(&snap);
        let fragment = &assembled.fragment;
        assert!(assembled.report.hard_cut);
        assert!(fragment.starts_with(KNOWLEDGE_HEADER));
        assert!(fragment.contains("From: document-19.txt"));
        assert!(!fragment.contains("From: document-0.txt"));
        assert!(fragment.ends_with(&format!("{KNOWLEDGE_FOOTER}{TRUNCATION_MARKER}")));
        assert!(token::estimate_tokens(fragment) <= 50);
        let kept = fragment.matches("From: ").count();
        assert!(kept > 0);
        assert_eq!(assembled.report.records_included, kept);
    }

    #[test]
    fn fragment_never_exceeds_budget() {
        let snap = snapshot((0..4).map(|i| record(&format!("f{i}.md"), 10)).collect());
        for budget in [0, 1, 5, 11, 30, 64, 100, 200, 400, 800, 1536] {
            let assembled = ContextAssembler::new(budget).assemble_with_report(&snap);
            assert!(
                token::estimate_tokens(&assembled.fragment) <= budget,
                "budget {budget} exceeded"
            );
            assert_eq!(assembled.report.tokens, token::estimate_tokens(&assembled.fragment));
        }
    }
}
