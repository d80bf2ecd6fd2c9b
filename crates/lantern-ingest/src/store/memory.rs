//! In-process store
//!
//! Mirrors the Postgres schema closely enough to stand in for it in tests and
//! `--dry-run` runs: unique keys, column length limits, history rows written
//! exactly where the triggers write them, and the cascade from a listing to
//! its endpoint info. Every write validates before it mutates, so a failed
//! call leaves no partial state behind.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{limits, EndpointStore, ProductStore, StoreError, StoreResult};
use crate::models::{
    AvailabilityCounts, EndpointInfoHistory, EndpointInfoRecord, EndpointListing, FhirEndpoint,
    FhirEndpointInfo, FhirEndpointMetadata, HealthItProduct, HistoryOperation, ObservationRecord,
    ProductHistory, ProductKey, ProductRecord, Validation,
};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, HealthItProduct>,
    product_history: Vec<ProductHistory>,
    endpoints: HashMap<Uuid, FhirEndpoint>,
    infos: HashMap<Uuid, FhirEndpointInfo>,
    info_history: Vec<EndpointInfoHistory>,
    metadata: HashMap<Uuid, FhirEndpointMetadata>,
    availability: HashMap<String, AvailabilityCounts>,
    lineages: HashMap<Uuid, Vec<Validation>>,
}

impl State {
    fn record_product(&mut self, operation: HistoryOperation, product: &HealthItProduct) {
        self.product_history.push(ProductHistory {
            operation,
            entered_at: Utc::now(),
            product_id: product.id,
            certification_edition: product.record.certification_edition.clone(),
            chpl_id: product.record.chpl_id.clone(),
            updated_at: product.updated_at,
        });
    }

    fn record_info(&mut self, operation: HistoryOperation, info: &FhirEndpointInfo) {
        self.info_history.push(EndpointInfoHistory {
            operation,
            entered_at: Utc::now(),
            url: info.record.url.clone(),
            tls_version: info.record.tls_version.clone(),
            validation_result_id: info.validation_result_id,
            metadata_id: info.metadata_id,
            updated_at: info.updated_at,
        });
    }

    fn insert_snapshot(&mut self, observation: &ObservationRecord) -> FhirEndpointMetadata {
        let counts = self
            .availability
            .entry(observation.url.clone())
            .or_default();
        *counts = counts.record(observation.http_response);
        let availability = counts.ratio();

        let now = Utc::now();
        let snapshot = FhirEndpointMetadata {
            id: Uuid::new_v4(),
            record: observation.clone(),
            availability,
            created_at: now,
            updated_at: now,
        };
        self.metadata.insert(snapshot.id, snapshot.clone());
        snapshot
    }

    fn insert_lineage(&mut self, validations: &[Validation]) -> Uuid {
        let id = Uuid::new_v4();
        self.lineages.insert(id, validations.to_vec());
        id
    }

    fn info_url_taken(&self, url: &str, except: Option<Uuid>) -> bool {
        self.infos
            .values()
            .any(|i| i.record.url == url && Some(i.id) != except)
    }

    fn remove_info(&mut self, id: Uuid) -> Option<FhirEndpointInfo> {
        let info = self.infos.remove(&id)?;
        self.record_info(HistoryOperation::Delete, &info);
        Some(info)
    }
}

fn check_len(column: &str, value: &str, max: usize) -> StoreResult<()> {
    let len = value.chars().count();
    if len > max {
        return Err(StoreError::too_long(column, max, len));
    }
    Ok(())
}

fn check_info(info: &EndpointInfoRecord) -> StoreResult<()> {
    check_len("url", &info.url, limits::URL_MAX)?;
    check_len("tls_version", &info.tls_version, limits::TLS_VERSION_MAX)
}

/// Store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn product_count(&self) -> usize {
        self.state.lock().await.products.len()
    }

    pub async fn metadata_count(&self) -> usize {
        self.state.lock().await.metadata.len()
    }

    pub async fn lineage_count(&self) -> usize {
        self.state.lock().await.lineages.len()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> StoreResult<HealthItProduct> {
        self.state
            .lock()
            .await
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Product", id))
    }

    async fn get_product_by_key(&self, key: &ProductKey) -> StoreResult<Option<HealthItProduct>> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|p| p.record.name == key.name && p.record.version == key.version)
            .cloned())
    }

    async fn add_product(&self, record: &ProductRecord) -> StoreResult<HealthItProduct> {
        let mut state = self.state.lock().await;
        let key = record.key();
        if state.products.values().any(|p| p.key() == key) {
            return Err(StoreError::duplicate("Product", key));
        }

        let now = Utc::now();
        let product = HealthItProduct {
            id: Uuid::new_v4(),
            record: record.clone(),
            created_at: now,
            updated_at: now,
        };
        state.products.insert(product.id, product.clone());
        state.record_product(HistoryOperation::Insert, &product);
        Ok(product)
    }

    async fn update_product(&self, id: Uuid, record: &ProductRecord) -> StoreResult<HealthItProduct> {
        let mut state = self.state.lock().await;
        let key = record.key();
        if state.products.values().any(|p| p.id != id && p.key() == key) {
            return Err(StoreError::duplicate("Product", key));
        }
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Product", id))?;

        product.record = record.clone();
        product.updated_at = Utc::now();
        let updated = product.clone();
        state.record_product(HistoryOperation::Update, &updated);
        Ok(updated)
    }

    async fn delete_product(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let product = state
            .products
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("Product", id))?;
        state.record_product(HistoryOperation::Delete, &product);
        Ok(())
    }

    async fn product_history(&self, id: Uuid) -> StoreResult<Vec<ProductHistory>> {
        let state = self.state.lock().await;
        Ok(state
            .product_history
            .iter()
            .filter(|h| h.product_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EndpointStore for MemoryStore {
    async fn add_fhir_endpoint(&self, listing: &EndpointListing) -> StoreResult<FhirEndpoint> {
        check_len("url", &listing.url, limits::URL_MAX)?;
        let mut state = self.state.lock().await;
        if state.endpoints.values().any(|e| e.listing.url == listing.url) {
            return Err(StoreError::duplicate("FHIR endpoint", &listing.url));
        }

        let now = Utc::now();
        let endpoint = FhirEndpoint {
            id: Uuid::new_v4(),
            listing: listing.clone(),
            created_at: now,
            updated_at: now,
        };
        state.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    async fn get_fhir_endpoint_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpoint>> {
        let state = self.state.lock().await;
        Ok(state.endpoints.values().find(|e| e.listing.url == url).cloned())
    }

    async fn delete_fhir_endpoint(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("FHIR endpoint", id))?;

        let url = endpoint.listing.url;
        let info_ids: Vec<Uuid> = state
            .infos
            .values()
            .filter(|i| i.record.url == url)
            .map(|i| i.id)
            .collect();
        for info_id in info_ids {
            state.remove_info(info_id);
        }
        state.metadata.retain(|_, m| m.record.url != url);
        state.availability.remove(&url);
        Ok(())
    }

    async fn get_endpoint_info(&self, id: Uuid) -> StoreResult<FhirEndpointInfo> {
        self.state
            .lock()
            .await
            .infos
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Endpoint info", id))
    }

    async fn get_endpoint_info_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpointInfo>> {
        let state = self.state.lock().await;
        Ok(state.infos.values().find(|i| i.record.url == url).cloned())
    }

    async fn get_metadata(&self, id: Uuid) -> StoreResult<FhirEndpointMetadata> {
        self.state
            .lock()
            .await
            .metadata
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Endpoint metadata", id))
    }

    async fn get_validations(&self, validation_result_id: Uuid) -> StoreResult<Vec<Validation>> {
        self.state
            .lock()
            .await
            .lineages
            .get(&validation_result_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Validation result", validation_result_id))
    }

    async fn get_availability(&self, url: &str) -> StoreResult<AvailabilityCounts> {
        let state = self.state.lock().await;
        Ok(state.availability.get(url).copied().unwrap_or_default())
    }

    async fn endpoint_info_history(&self, url: &str) -> StoreResult<Vec<EndpointInfoHistory>> {
        let state = self.state.lock().await;
        Ok(state
            .info_history
            .iter()
            .filter(|h| h.url == url)
            .cloned()
            .collect())
    }

    async fn add_endpoint_info(
        &self,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo> {
        check_info(info)?;
        let mut state = self.state.lock().await;
        if state.info_url_taken(&info.url, None) {
            return Err(StoreError::duplicate("Endpoint info", &info.url));
        }

        let validation_result_id = state.insert_lineage(validations);
        let snapshot = state.insert_snapshot(observation);
        let now = Utc::now();
        let stored = FhirEndpointInfo {
            id: Uuid::new_v4(),
            record: info.clone(),
            validation_result_id,
            metadata_id: snapshot.id,
            created_at: now,
            updated_at: now,
        };
        state.infos.insert(stored.id, stored.clone());
        state.record_info(HistoryOperation::Insert, &stored);
        Ok(stored)
    }

    async fn update_endpoint_info(
        &self,
        id: Uuid,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo> {
        check_info(info)?;
        let mut state = self.state.lock().await;
        if !state.infos.contains_key(&id) {
            return Err(StoreError::not_found("Endpoint info", id));
        }
        if state.info_url_taken(&info.url, Some(id)) {
            return Err(StoreError::duplicate("Endpoint info", &info.url));
        }

        let validation_result_id = state.insert_lineage(validations);
        let snapshot = state.insert_snapshot(observation);
        let stored = state
            .infos
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Endpoint info", id))?;
        stored.record = info.clone();
        stored.validation_result_id = validation_result_id;
        stored.metadata_id = snapshot.id;
        stored.updated_at = Utc::now();
        let updated = stored.clone();
        state.record_info(HistoryOperation::Update, &updated);
        Ok(updated)
    }

    async fn refresh_endpoint_metadata(
        &self,
        id: Uuid,
        observation: &ObservationRecord,
    ) -> StoreResult<FhirEndpointInfo> {
        let mut state = self.state.lock().await;
        if !state.infos.contains_key(&id) {
            return Err(StoreError::not_found("Endpoint info", id));
        }

        let snapshot = state.insert_snapshot(observation);
        let stored = state
            .infos
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Endpoint info", id))?;
        stored.metadata_id = snapshot.id;
        Ok(stored.clone())
    }

    async fn delete_endpoint_info(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .remove_info(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("Endpoint info", id))
    }
}
