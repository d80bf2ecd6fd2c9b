//! Sequential batch ingestion with partial-failure accounting

use async_trait::async_trait;
use lantern_common::cancel::CancellationToken;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::{ErrorKind, IngestError};

/// What a successful record did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PersistOutcome {
    /// New canonical entity
    Inserted,
    /// Existing entity overwritten
    Updated,
    /// Nothing written
    Unchanged,
    /// Only a fresh observation snapshot was written
    Refreshed,
}

/// Reconcile and write one record. Implementations perform every store call
/// through the cancellable wrapper and surface its cancellation errors.
#[async_trait]
pub trait RecordPersister: Send + Sync {
    type Record: Send + Sync;

    /// Short identification of a record for logs and skip reports
    fn describe(&self, record: &Self::Record) -> String;

    async fn persist(
        &self,
        record: &Self::Record,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome, IngestError>;
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Log progress every this many records; 0 disables progress lines
    pub progress_interval: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl From<&IngestConfig> for BatchOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            progress_interval: config.progress_interval,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub record: String,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: ErrorKind,
    pub reason: String,
}

fn serialize_kind<S: serde::Serializer>(kind: &ErrorKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

/// Per-batch accounting
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub refreshed: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self { total, ..Self::default() }
    }

    fn count(&mut self, outcome: PersistOutcome) {
        match outcome {
            PersistOutcome::Inserted => self.inserted += 1,
            PersistOutcome::Updated => self.updated += 1,
            PersistOutcome::Unchanged => self.unchanged += 1,
            PersistOutcome::Refreshed => self.refreshed += 1,
        }
    }

    /// Records handled without error
    pub fn persisted(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.refreshed
    }

    /// Records handled, successfully or not
    pub fn processed(&self) -> usize {
        self.persisted() + self.skipped.len()
    }

    pub fn skipped_with(&self, kind: ErrorKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == kind).count()
    }
}

/// The record that was in flight when the cancellation signal fired
#[derive(Debug, Clone, Serialize)]
pub struct InterruptedRecord {
    pub index: usize,
    pub record: String,
    /// The record's store call ran to completion after the signal, so its
    /// write may be in the store even though the record is not counted.
    pub may_be_written: bool,
}

/// The batch stopped early because the cancellation signal fired
#[derive(Debug, Error)]
#[error(
    "persisted {processed} out of {total} records before cancellation{}",
    durability_note(.interrupted.as_ref())
)]
pub struct BatchCanceled {
    pub processed: usize,
    pub total: usize,
    pub report: BatchReport,
    pub interrupted: Option<InterruptedRecord>,
}

impl BatchCanceled {
    /// True when a write completed after the signal and is not in the report
    pub fn may_have_written_in_flight(&self) -> bool {
        self.interrupted.as_ref().is_some_and(|r| r.may_be_written)
    }
}

fn durability_note(interrupted: Option<&InterruptedRecord>) -> String {
    match interrupted {
        Some(r) if r.may_be_written => {
            format!("; record {} ({}) may have been written", r.index, r.record)
        },
        _ => String::new(),
    }
}

impl From<BatchCanceled> for IngestError {
    fn from(c: BatchCanceled) -> Self {
        IngestError::Canceled(Box::new(c))
    }
}

/// Persist `records` in order, one at a time.
///
/// A failing record is logged and skipped. The signal is checked before each
/// record; a record already in flight when it fires is awaited, never
/// abandoned, and a cancellation error coming out of a record stops the batch
/// as well.
pub async fn ingest_batch<P: RecordPersister>(
    persister: &P,
    records: &[P::Record],
    cancel: &CancellationToken,
    options: &BatchOptions,
) -> Result<BatchReport, BatchCanceled> {
    let total = records.len();
    let mut report = BatchReport::new(total);

    for (index, record) in records.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(stop(report, total, None));
        }

        match persister.persist(record, cancel).await {
            Ok(outcome) => report.count(outcome),
            Err(err) if err.is_cancellation() => {
                let interrupted = InterruptedRecord {
                    index,
                    record: persister.describe(record),
                    may_be_written: matches!(err, IngestError::CompletedDespiteCancellation),
                };
                warn!(
                    index,
                    record = %interrupted.record,
                    may_be_written = interrupted.may_be_written,
                    error = %err,
                    "Record interrupted by cancellation"
                );
                return Err(stop(report, total, Some(interrupted)));
            },
            Err(err) => {
                let description = persister.describe(record);
                warn!(
                    index,
                    record = %description,
                    kind = %err.kind(),
                    error = %err,
                    "Skipping record"
                );
                report.skipped.push(SkippedRecord {
                    index,
                    record: description,
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            },
        }

        let done = index + 1;
        if options.progress_interval > 0 && done % options.progress_interval == 0 {
            info!(processed = done, total, "Batch progress");
        }
    }

    info!(
        total,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        refreshed = report.refreshed,
        skipped = report.skipped.len(),
        "Batch complete"
    );
    Ok(report)
}

fn stop(
    report: BatchReport,
    total: usize,
    interrupted: Option<InterruptedRecord>,
) -> BatchCanceled {
    let processed = report.processed();
    warn!(processed, total, "Batch canceled");
    BatchCanceled {
        processed,
        total,
        report,
        interrupted,
    }
}
