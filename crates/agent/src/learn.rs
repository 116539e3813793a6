//! Learning pipeline — extract, compress, store, in the background.
//!
//! Each document runs on its own tokio task and reports progress over an
//! mpsc channel, so a front end can render a progress bar while the user
//! keeps chatting.
//!
//! | Stage | Percent |
//! |-------|---------|
//! | Reading | 40 |
//! | Compressing | 60 |
//! | Parsing | 85 |
//! | Storing | 90 |

use crate::compressor::Compressor;
use crate::extract::TextExtractor;
use chrono::Utc;
use localmind_core::error::{CompressionError, Error};
use localmind_core::{CompressionStats, DomainEvent, EventBus, RecordSummary};
use localmind_memory::BoundedStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnStage {
    Reading,
    Compressing,
    Parsing,
    Storing,
}

impl LearnStage {
    pub fn percent(&self) -> u8 {
        match self {
            Self::Reading => 40,
            Self::Compressing => 60,
            Self::Parsing => 85,
            Self::Storing => 90,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reading => "Reading document...",
            Self::Compressing => "Compressing with LLM...",
            Self::Parsing => "Parsing compression...",
            Self::Storing => "Storing in memory...",
        }
    }
}

/// What a finished learning run produced.
#[derive(Debug, Clone, Serialize)]
pub struct LearnReport {
    pub document: String,
    pub record: RecordSummary,
    /// The document replaced an earlier import of the same name
    pub replaced: bool,
    /// Records pushed out to make room, oldest first
    pub evicted: Vec<RecordSummary>,
    pub stats: CompressionStats,
    /// Set when the store file could not be written
    pub persistence_warning: Option<String>,
}

/// Progress and outcome of one learning run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearnEvent {
    Progress {
        document: String,
        stage: LearnStage,
        percent: u8,
    },
    Done(LearnReport),
    Failed { document: String, error: String },
    Cancelled { document: String },
}

impl LearnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Runs the learning pipeline against one store.
#[derive(Clone)]
pub struct Librarian {
    extractor: Arc<dyn TextExtractor>,
    compressor: Arc<Compressor>,
    store: Arc<BoundedStore>,
    events: Option<Arc<EventBus>>,
}

impl Librarian {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        compressor: Arc<Compressor>,
        store: Arc<BoundedStore>,
    ) -> Self {
        Self {
            extractor,
            compressor,
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Learn `path` on a background task.
    pub fn spawn(&self, path: impl Into<PathBuf>) -> LearnHandle {
        let path = path.into();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let librarian = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let document = display_name(&path);
            let terminal = match librarian.learn(&path, token, &tx).await {
                Ok(report) => LearnEvent::Done(report),
                Err(Error::Compression(CompressionError::Cancelled(_))) => {
                    info!(document = %document, "Learning cancelled");
                    LearnEvent::Cancelled { document }
                }
                Err(e) => {
                    warn!(document = %document, error = %e, "Learning failed");
                    LearnEvent::Failed {
                        document,
                        error: e.to_string(),
                    }
                }
            };
            let _ = tx.send(terminal).await;
        });
        LearnHandle { rx, cancel, task }
    }

    /// Run the pipeline inline, reporting stages on `progress`.
    pub async fn learn(
        &self,
        path: &Path,
        cancel: CancellationToken,
        progress: &mpsc::Sender<LearnEvent>,
    ) -> Result<LearnReport, Error> {
        let document = display_name(path);
        let stage = |stage: LearnStage| LearnEvent::Progress {
            document: document.clone(),
            stage,
            percent: stage.percent(),
        };
        let cancelled = || Error::Compression(CompressionError::Cancelled(document.clone()));

        let _ = progress.send(stage(LearnStage::Reading)).await;
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            text = self.extractor.extract_text(path) => text?,
        };

        let _ = progress.send(stage(LearnStage::Compressing)).await;
        let output = self
            .compressor
            .extract(&text, &document, cancel.clone())
            .await?;

        let _ = progress.send(stage(LearnStage::Parsing)).await;
        let record = self.compressor.build_record(&text, &document, &output)?;
        let stats = CompressionStats::of(&record);
        let summary = record.summarize();
        let source_bytes = record.source_bytes();

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let _ = progress.send(stage(LearnStage::Storing)).await;
        let outcome = self.store.insert_or_replace(record).await;

        info!(
            id = %summary.id,
            document = %document,
            size_bytes = summary.size_bytes,
            ratio = stats.ratio,
            evicted = outcome.evicted.len(),
            "Document learned"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::DocumentLearned {
                id: summary.id.clone(),
                name: summary.name.clone(),
                source_bytes,
                size_bytes: summary.size_bytes,
                timestamp: Utc::now(),
            });
        }

        Ok(LearnReport {
            document,
            record: summary,
            replaced: outcome.replaced,
            evicted: outcome.evicted,
            stats,
            persistence_warning: outcome.persistence.map(|w| w.to_string()),
        })
    }
}

/// File name used as the document's display name (and id source).
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Receiving end of a background learning run.
pub struct LearnHandle {
    rx: mpsc::Receiver<LearnEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LearnHandle {
    /// Next progress or terminal event; `None` once the run is over.
    pub async fn next(&mut self) -> Option<LearnEvent> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain progress and return the terminal event.
    pub async fn wait(mut self) -> LearnEvent {
        let mut last = None;
        while let Some(event) = self.rx.recv().await {
            if event.is_terminal() {
                last = Some(event);
            }
        }
        let _ = self.task.await;
        last.unwrap_or_else(|| LearnEvent::Failed {
            document: String::new(),
            error: "learning task ended without a result".into(),
        })
    }
}
