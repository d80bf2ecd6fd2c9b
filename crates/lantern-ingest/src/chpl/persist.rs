//! Reconcile registry products into the canonical store

use async_trait::async_trait;
use lantern_common::cancel::CancellationToken;
use tracing::{debug, info, instrument};

use super::client::ChplClient;
use super::normalize::normalize_product;
use super::wire::{decode_product_list, ChplCertifiedProduct};
use crate::error::{IngestError, Result};
use crate::models::ProductRecord;
use crate::pipeline::{ingest_batch, BatchOptions, BatchReport, PersistOutcome, RecordPersister};
use crate::reconcile::{resolve, Resolution};
use crate::store::CancellableProductStore;

/// Writes normalized products: insert when the key is new, otherwise
/// overwrite only when conflict resolution says so.
#[derive(Clone)]
pub struct ProductPersister {
    store: CancellableProductStore,
}

impl ProductPersister {
    pub fn new(store: CancellableProductStore) -> Self {
        Self { store }
    }

    /// Persist one already normalized product.
    pub async fn persist_product(
        &self,
        incoming: ProductRecord,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome> {
        let key = incoming.key();
        let existing = self.store.get_product_by_key(cancel, key.clone()).await?;

        let Some(existing) = existing else {
            let added = self.store.add_product(cancel, incoming).await?;
            debug!(product_id = %added.id, key = %key, "Inserted product");
            return Ok(PersistOutcome::Inserted);
        };

        match resolve(&existing.record, &incoming)? {
            Resolution::NoChange => Ok(PersistOutcome::Unchanged),
            Resolution::Overwrite => {
                self.store.update_product(cancel, existing.id, incoming).await?;
                debug!(product_id = %existing.id, key = %key, "Overwrote product");
                Ok(PersistOutcome::Updated)
            },
            Resolution::Unresolvable(ambiguity) => {
                Err(IngestError::ConflictAmbiguous { key, ambiguity })
            },
        }
    }
}

#[async_trait]
impl RecordPersister for ProductPersister {
    type Record = ChplCertifiedProduct;

    fn describe(&self, record: &ChplCertifiedProduct) -> String {
        format!(
            "{} {} (CHPL {})",
            record.product, record.version, record.chpl_product_number
        )
    }

    async fn persist(
        &self,
        record: &ChplCertifiedProduct,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome> {
        let incoming = normalize_product(record)?;
        self.persist_product(incoming, cancel).await
    }
}

/// Fetch, decode and persist the full CHPL product list
pub struct ProductIngestor {
    client: ChplClient,
    persister: ProductPersister,
    options: BatchOptions,
}

impl ProductIngestor {
    pub fn new(client: ChplClient, persister: ProductPersister, options: BatchOptions) -> Self {
        Self {
            client,
            persister,
            options,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let body = self.client.fetch_product_list(cancel).await?;
        let products = decode_product_list(&body, cancel)?;
        info!(count = products.len(), "Decoded CHPL products");

        let report = ingest_batch(&self.persister, &products, cancel, &self.options).await?;
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chpl::parse::FormatError;
    use crate::chpl::wire::fixtures::carefluence_wire;
    use crate::models::product::fixtures::carefluence;
    use crate::models::{HealthItProduct, ProductHistory, ProductKey};
    use crate::store::{MemoryStore, ProductStore, StoreResult};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    /// Fires the token while an insert is being written, then lets it land.
    struct CancelDuringAdd {
        inner: Arc<MemoryStore>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ProductStore for CancelDuringAdd {
        async fn get_product(&self, id: Uuid) -> StoreResult<HealthItProduct> {
            self.inner.get_product(id).await
        }

        async fn get_product_by_key(
            &self,
            key: &ProductKey,
        ) -> StoreResult<Option<HealthItProduct>> {
            self.inner.get_product_by_key(key).await
        }

        async fn add_product(&self, record: &ProductRecord) -> StoreResult<HealthItProduct> {
            self.cancel.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.add_product(record).await
        }

        async fn update_product(
            &self,
            id: Uuid,
            record: &ProductRecord,
        ) -> StoreResult<HealthItProduct> {
            self.inner.update_product(id, record).await
        }

        async fn delete_product(&self, id: Uuid) -> StoreResult<()> {
            self.inner.delete_product(id).await
        }

        async fn product_history(&self, id: Uuid) -> StoreResult<Vec<ProductHistory>> {
            self.inner.product_history(id).await
        }
    }

    fn persister() -> (Arc<MemoryStore>, ProductPersister) {
        let memory = Arc::new(MemoryStore::new());
        let persister = ProductPersister::new(CancellableProductStore::new(memory.clone()));
        (memory, persister)
    }

    async fn stored(memory: &MemoryStore) -> ProductRecord {
        memory
            .get_product_by_key(&carefluence().key())
            .await
            .unwrap()
            .expect("product stored")
            .record
    }

    #[tokio::test]
    async fn test_persist_product_sequence() {
        let (memory, persister) = persister();
        let cancel = CancellationToken::new();

        let canceled = CancellationToken::new();
        canceled.cancel();
        let err = persister.persist_product(carefluence(), &canceled).await.unwrap_err();
        assert!(matches!(err, IngestError::CanceledBeforeStart));
        assert_eq!(memory.product_count().await, 0);

        let outcome = persister.persist_product(carefluence(), &cancel).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Inserted);

        let mut newer = carefluence();
        newer.certification_edition = "2015".to_string();
        let outcome = persister.persist_product(newer, &cancel).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Updated);
        assert_eq!(stored(&memory).await.certification_edition, "2015");

        let outcome = persister.persist_product(carefluence(), &cancel).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Unchanged);
        assert_eq!(stored(&memory).await.certification_edition, "2015");

        let mut retired = carefluence();
        retired.certification_edition = "2015".to_string();
        retired.certification_status = "Retired".to_string();
        let err = persister.persist_product(retired, &cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::ConflictAmbiguous { .. }));
        assert_eq!(stored(&memory).await.certification_status, "Active");
        assert_eq!(memory.product_count().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_api_doc_is_rejected_before_store() {
        let (memory, persister) = persister();
        let mut wire = carefluence_wire();
        wire.api_documentation = "170.315 (g)(7),http://carefluence.com".to_string();

        let err = persister.persist(&wire, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Format(FormatError::ApiDocShape(_))));
        assert_eq!(memory.product_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_numeric_edition_leaves_store_untouched() {
        let (memory, persister) = persister();
        let cancel = CancellationToken::new();
        persister.persist_product(carefluence(), &cancel).await.unwrap();

        let mut bad = carefluence();
        bad.certification_edition = "abc".to_string();
        let err = persister.persist_product(bad, &cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert_eq!(stored(&memory).await, carefluence());

        let product = memory.get_product_by_key(&carefluence().key()).await.unwrap().unwrap();
        assert_eq!(memory.product_history(product.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chpl_id_is_overwritten_with_winner() {
        let (memory, persister) = persister();
        let cancel = CancellationToken::new();
        persister.persist_product(carefluence(), &cancel).await.unwrap();

        let mut newer = carefluence();
        newer.certification_edition = "2015".to_string();
        newer.chpl_id = "15.04.04.2657.Care.01.00.0.180101".to_string();
        persister.persist_product(newer, &cancel).await.unwrap();
        assert_eq!(stored(&memory).await.chpl_id, "15.04.04.2657.Care.01.00.0.180101");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_landing_after_cancel_is_reported() {
        let memory = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let slow = Arc::new(CancelDuringAdd { inner: memory.clone(), cancel: cancel.clone() });
        let persister = ProductPersister::new(CancellableProductStore::new(slow));

        let stopped = ingest_batch(
            &persister,
            &[carefluence_wire()],
            &cancel,
            &BatchOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(memory.product_count().await, 1);
        assert_eq!(stopped.report.persisted(), 0);
        assert!(stopped.may_have_written_in_flight());
        let interrupted = stopped.interrupted.as_ref().unwrap();
        assert_eq!(interrupted.index, 0);
        assert!(interrupted.record.starts_with("Carefluence Open API"));
        assert!(stopped.to_string().contains("record 0 (Carefluence Open API"));

        match IngestError::from(stopped) {
            IngestError::Canceled(c) => {
                assert_eq!(c.total, 1);
                assert!(c.may_have_written_in_flight());
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
