//! Capability receiver against a real Postgres schema
//!
//! Covers lineage creation, availability accounting, selective persistence
//! and the cascade delete, observed through the history triggers.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{cerner_message, init_tracing, raw, TestPostgres, CERNER_URL};
use lantern_common::cancel::CancellationToken;
use serial_test::serial;

use lantern_ingest::capability::CapabilityReceiver;
use lantern_ingest::models::{EndpointListing, HistoryOperation};
use lantern_ingest::store::{EndpointStore, PgStore};
use lantern_ingest::{CancellableEndpointStore, IngestError, PersistOutcome};

async fn setup() -> Result<(TestPostgres, Arc<PgStore>, CapabilityReceiver)> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let store = Arc::new(PgStore::new(pg.pool().clone()));
    let receiver = CapabilityReceiver::new(CancellableEndpointStore::new(store.clone()));
    Ok((pg, store, receiver))
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_new_endpoint_gets_three_validations() -> Result<()> {
    let (_pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();

    let outcome = receiver.receive(&raw(&cerner_message()), &cancel).await?;
    assert_eq!(outcome, PersistOutcome::Inserted);

    let info = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");
    assert_eq!(info.record.tls_version, "TLS 1.2");
    assert_eq!(
        info.record.capability_statement.as_ref().and_then(|c| c.fhir_version()),
        Some("1.0.2")
    );

    let validations = store.get_validations(info.validation_result_id).await?;
    assert_eq!(validations.len(), 3);

    let metadata = store.get_metadata(info.metadata_id).await?;
    assert_eq!(metadata.record.http_response, 200);
    assert!((metadata.availability - 1.0).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_availability_halves_after_not_found() -> Result<()> {
    let (_pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();
    receiver.receive(&raw(&cerner_message()), &cancel).await?;

    let mut not_found = cerner_message();
    not_found.http_response = 404;
    receiver.receive(&raw(&not_found), &cancel).await?;

    let info = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");
    let metadata = store.get_metadata(info.metadata_id).await?;
    assert_eq!(metadata.record.http_response, 404);
    assert!((metadata.availability - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_tls_change_creates_new_lineage() -> Result<()> {
    let (_pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();
    receiver.receive(&raw(&cerner_message()), &cancel).await?;
    let first = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");

    let mut upgraded = cerner_message();
    upgraded.tls_version = "TLS 1.3".to_string();
    let outcome = receiver.receive(&raw(&upgraded), &cancel).await?;
    assert_eq!(outcome, PersistOutcome::Updated);

    let second = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");
    assert_eq!(second.id, first.id);
    assert_ne!(second.validation_result_id, first.validation_result_id);
    assert_eq!(second.record.tls_version, "TLS 1.3");

    let history = store.endpoint_info_history(CERNER_URL).await?;
    let ops: Vec<_> = history.iter().map(|h| h.operation).collect();
    assert_eq!(ops, vec![HistoryOperation::Insert, HistoryOperation::Update]);
    assert_eq!(history[1].tls_version, "TLS 1.3");
    assert_eq!(history[1].validation_result_id, second.validation_result_id);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_oversized_tls_version_rolls_back() -> Result<()> {
    let (pg, store, receiver) = setup().await?;
    let mut message = cerner_message();
    message.tls_version = "x".repeat(510);

    let err = receiver
        .receive(&raw(&message), &CancellationToken::new())
        .await
        .expect_err("tls_version exceeds its column");
    assert!(matches!(err, IngestError::Store(_)));
    assert!(store.get_endpoint_info_by_url(CERNER_URL).await?.is_none());

    let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fhir_endpoints_metadata")
        .fetch_one(pg.pool())
        .await?;
    assert_eq!(snapshots, 0);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_identical_resend_only_refreshes_snapshot() -> Result<()> {
    let (_pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();
    receiver.receive(&raw(&cerner_message()), &cancel).await?;
    let first = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");

    let outcome = receiver.receive(&raw(&cerner_message()), &cancel).await?;
    assert_eq!(outcome, PersistOutcome::Refreshed);

    let second = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");
    assert_ne!(second.metadata_id, first.metadata_id);
    assert_eq!(second.validation_result_id, first.validation_result_id);
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(store.endpoint_info_history(CERNER_URL).await?.len(), 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_response_time_change_is_not_an_identity_change() -> Result<()> {
    let (_pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();
    receiver.receive(&raw(&cerner_message()), &cancel).await?;
    let first = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");

    let mut slower = cerner_message();
    slower.response_time = 3.75;
    let outcome = receiver.receive(&raw(&slower), &cancel).await?;
    assert_eq!(outcome, PersistOutcome::Refreshed);

    let second = store.get_endpoint_info_by_url(CERNER_URL).await?.expect("info row");
    assert_eq!(second.validation_result_id, first.validation_result_id);
    let metadata = store.get_metadata(second.metadata_id).await?;
    assert!((metadata.record.response_time_secs - 3.75).abs() < f64::EPSILON);
    assert_eq!(store.endpoint_info_history(CERNER_URL).await?.len(), 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_deleting_endpoint_cascades_to_info() -> Result<()> {
    let (pg, store, receiver) = setup().await?;
    let cancel = CancellationToken::new();
    let endpoint = store
        .add_fhir_endpoint(&EndpointListing {
            url: CERNER_URL.to_string(),
            organization_names: vec!["Cerner Sandbox".to_string()],
            list_source: "https://github.com/cerner/ignite-endpoints".to_string(),
        })
        .await?;
    receiver.receive(&raw(&cerner_message()), &cancel).await?;

    let wrapper = receiver.store().clone();
    wrapper.delete_fhir_endpoint(&cancel, endpoint.id).await?;

    assert!(store.get_fhir_endpoint_by_url(CERNER_URL).await?.is_none());
    assert!(store.get_endpoint_info_by_url(CERNER_URL).await?.is_none());

    let history = store.endpoint_info_history(CERNER_URL).await?;
    let deletes = history
        .iter()
        .filter(|h| h.operation == HistoryOperation::Delete)
        .count();
    assert_eq!(deletes, 1);

    let snapshots: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM fhir_endpoints_metadata WHERE url = $1")
            .bind(CERNER_URL)
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(snapshots, 0);
    Ok(())
}
