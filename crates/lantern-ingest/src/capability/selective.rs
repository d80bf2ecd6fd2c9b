//! Selective persistence of endpoint observations
//!
//! A query of an endpoint whose identity fields are unchanged only refreshes
//! the metadata snapshot. The info row, its `updated_at`, the audit trail and
//! the validation lineage are left alone so history records real changes.

use lantern_common::cancel::CancellationToken;
use tracing::debug;

use super::validation::validate;
use crate::error::Result;
use crate::models::{EndpointInfoRecord, FhirEndpointInfo, ObservationRecord};
use crate::pipeline::PersistOutcome;
use crate::store::CancellableEndpointStore;

pub async fn persist_selective(
    store: &CancellableEndpointStore,
    existing: Option<&FhirEndpointInfo>,
    info: EndpointInfoRecord,
    observation: ObservationRecord,
    cancel: &CancellationToken,
) -> Result<PersistOutcome> {
    match existing {
        None => {
            let validations = validate(&info);
            let added = store.add_endpoint_info(cancel, info, observation, validations).await?;
            debug!(info_id = %added.id, url = %added.record.url, "Inserted endpoint info");
            Ok(PersistOutcome::Inserted)
        },
        Some(existing) if !existing.core_eq(&info) => {
            let validations = validate(&info);
            let updated = store
                .update_endpoint_info(cancel, existing.id, info, observation, validations)
                .await?;
            debug!(
                info_id = %updated.id,
                validation_result_id = %updated.validation_result_id,
                "Endpoint identity changed"
            );
            Ok(PersistOutcome::Updated)
        },
        Some(existing) => {
            let refreshed = store.refresh_endpoint_metadata(cancel, existing.id, observation).await?;
            debug!(info_id = %refreshed.id, metadata_id = %refreshed.metadata_id, "Refreshed snapshot");
            Ok(PersistOutcome::Refreshed)
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capability::message::fixtures::cerner_message;
    use crate::store::{EndpointStore, MemoryStore};
    use std::sync::Arc;

    fn store() -> (Arc<MemoryStore>, CancellableEndpointStore) {
        let memory = Arc::new(MemoryStore::new());
        (memory.clone(), CancellableEndpointStore::new(memory))
    }

    #[tokio::test]
    async fn test_unchanged_identity_refreshes_only() {
        let (memory, store) = store();
        let cancel = CancellationToken::new();
        let (info, observation) = cerner_message().normalize();

        let outcome = persist_selective(&store, None, info.clone(), observation.clone(), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, PersistOutcome::Inserted);
        let first = memory.get_endpoint_info_by_url(&info.url).await.unwrap().unwrap();

        let mut slower = observation.clone();
        slower.response_time_secs = 2.5;
        let outcome = persist_selective(&store, Some(&first), info.clone(), slower, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, PersistOutcome::Refreshed);

        let second = memory.get_endpoint_info_by_url(&info.url).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.validation_result_id, first.validation_result_id);
        assert_eq!(second.updated_at, first.updated_at);
        assert_ne!(second.metadata_id, first.metadata_id);
        assert_eq!(memory.endpoint_info_history(&info.url).await.unwrap().len(), 1);
        assert_eq!(memory.metadata_count().await, 2);
    }

    #[tokio::test]
    async fn test_identity_change_starts_new_lineage() {
        let (memory, store) = store();
        let cancel = CancellationToken::new();
        let (info, observation) = cerner_message().normalize();
        persist_selective(&store, None, info.clone(), observation.clone(), &cancel)
            .await
            .unwrap();
        let first = memory.get_endpoint_info_by_url(&info.url).await.unwrap().unwrap();

        let mut changed = info.clone();
        changed.tls_version = "TLS 1.3".to_string();
        let outcome = persist_selective(&store, Some(&first), changed, observation, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, PersistOutcome::Updated);

        let second = memory.get_endpoint_info_by_url(&info.url).await.unwrap().unwrap();
        assert_eq!(second.record.tls_version, "TLS 1.3");
        assert_ne!(second.validation_result_id, first.validation_result_id);
        assert_eq!(memory.lineage_count().await, 2);
        assert_eq!(memory.endpoint_info_history(&info.url).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let (memory, store) = store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (info, observation) = cerner_message().normalize();

        let err = persist_selective(&store, None, info, observation, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(memory.metadata_count().await, 0);
        assert_eq!(memory.lineage_count().await, 0);
    }
}
