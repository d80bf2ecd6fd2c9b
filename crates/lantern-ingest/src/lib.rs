//! Lantern ingestion
//!
//! Reconciles two feeds into the canonical Lantern store:
//! - certified health IT products from the CHPL registry ([`chpl`])
//! - FHIR endpoint query results from the capability querier ([`capability`])
//!
//! Every store call goes through the cancellable operation wrapper, so a
//! cancelled run never leaves a write half applied.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod capability;
pub mod chpl;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod store;

pub use config::Config;
pub use error::{ErrorKind, IngestError, Result};
pub use pipeline::{
    ingest_batch, BatchCanceled, BatchOptions, BatchReport, PersistOutcome, RecordPersister,
};
pub use store::{CancellableEndpointStore, CancellableProductStore, StoreError};
