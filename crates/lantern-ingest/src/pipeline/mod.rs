//! Batch ingestion pipeline

pub mod batch;

pub use batch::{
    ingest_batch, BatchCanceled, BatchOptions, BatchReport, InterruptedRecord, PersistOutcome,
    RecordPersister, SkippedRecord,
};
