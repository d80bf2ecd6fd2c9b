//! Canonical store interfaces
//!
//! [`ProductStore`] and [`EndpointStore`] are implemented by the Postgres
//! store ([`postgres::PgStore`]) and by an in-process store
//! ([`memory::MemoryStore`]) with the same history and lineage semantics.
//! Pipelines only ever reach a store through [`CancellableProductStore`] /
//! [`CancellableEndpointStore`], which route every call through
//! [`run_cancellable`].

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use lantern_common::cancel::{run_cancellable, CancellationToken, OpError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AvailabilityCounts, EndpointInfoHistory, EndpointInfoRecord, EndpointListing, FhirEndpoint,
    FhirEndpointInfo, FhirEndpointMetadata, HealthItProduct, ObservationRecord, ProductHistory,
    ProductKey, ProductRecord, Validation,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Requested record does not exist
    #[error("{0}")]
    NotFound(String),

    /// Record already exists (unique constraint violation)
    #[error("{0}")]
    Duplicate(String),

    /// A value does not fit the column it is written to
    #[error("{0}")]
    Constraint(String),

    /// A stored row could not be mapped back to a model
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found in database", resource_type, identifier))
    }

    pub fn duplicate(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::Duplicate(format!("{} '{}' already exists", resource_type, identifier))
    }

    pub fn too_long(column: &str, max: usize, actual: usize) -> Self {
        Self::Constraint(format!(
            "value too long for {} ({} characters, limit {})",
            column, actual, max
        ))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Column limits shared by the schema and the in-process store.
pub mod limits {
    pub const TLS_VERSION_MAX: usize = 500;
    pub const URL_MAX: usize = 2048;
}

#[async_trait]
pub trait ProductStore: Send + Sync + 'static {
    async fn get_product(&self, id: Uuid) -> StoreResult<HealthItProduct>;

    async fn get_product_by_key(&self, key: &ProductKey) -> StoreResult<Option<HealthItProduct>>;

    async fn add_product(&self, record: &ProductRecord) -> StoreResult<HealthItProduct>;

    /// Replace every attribute of product `id`; `created_at` is preserved.
    async fn update_product(&self, id: Uuid, record: &ProductRecord)
        -> StoreResult<HealthItProduct>;

    async fn delete_product(&self, id: Uuid) -> StoreResult<()>;

    /// Audit rows for product `id`, oldest first
    async fn product_history(&self, id: Uuid) -> StoreResult<Vec<ProductHistory>>;
}

#[async_trait]
pub trait EndpointStore: Send + Sync + 'static {
    async fn add_fhir_endpoint(&self, listing: &EndpointListing) -> StoreResult<FhirEndpoint>;

    async fn get_fhir_endpoint_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpoint>>;

    /// Delete the listing together with its endpoint info and snapshots.
    async fn delete_fhir_endpoint(&self, id: Uuid) -> StoreResult<()>;

    async fn get_endpoint_info(&self, id: Uuid) -> StoreResult<FhirEndpointInfo>;

    async fn get_endpoint_info_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpointInfo>>;

    async fn get_metadata(&self, id: Uuid) -> StoreResult<FhirEndpointMetadata>;

    async fn get_validations(&self, validation_result_id: Uuid) -> StoreResult<Vec<Validation>>;

    async fn get_availability(&self, url: &str) -> StoreResult<AvailabilityCounts>;

    /// Audit rows for the endpoint at `url`, oldest first
    async fn endpoint_info_history(&self, url: &str) -> StoreResult<Vec<EndpointInfoHistory>>;

    /// Atomically insert a new endpoint: lineage, snapshot and info row.
    async fn add_endpoint_info(
        &self,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo>;

    /// Atomically replace the identity fields of `id` under a new lineage and
    /// link a fresh snapshot.
    async fn update_endpoint_info(
        &self,
        id: Uuid,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo>;

    /// Atomically write a fresh snapshot and relink it. Identity fields,
    /// lineage, `updated_at` and the audit trail stay untouched.
    async fn refresh_endpoint_metadata(
        &self,
        id: Uuid,
        observation: &ObservationRecord,
    ) -> StoreResult<FhirEndpointInfo>;

    async fn delete_endpoint_info(&self, id: Uuid) -> StoreResult<()>;
}

pub type OpResult<T> = Result<T, OpError<StoreError>>;

/// [`ProductStore`] behind the cancellable operation wrapper
#[derive(Clone)]
pub struct CancellableProductStore {
    inner: Arc<dyn ProductStore>,
}

impl CancellableProductStore {
    pub fn new(inner: Arc<dyn ProductStore>) -> Self {
        Self { inner }
    }

    pub async fn get_product(&self, cancel: &CancellationToken, id: Uuid) -> OpResult<HealthItProduct> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_product(id).await }).await
    }

    pub async fn get_product_by_key(
        &self,
        cancel: &CancellationToken,
        key: ProductKey,
    ) -> OpResult<Option<HealthItProduct>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_product_by_key(&key).await }).await
    }

    pub async fn add_product(
        &self,
        cancel: &CancellationToken,
        record: ProductRecord,
    ) -> OpResult<HealthItProduct> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.add_product(&record).await }).await
    }

    pub async fn update_product(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        record: ProductRecord,
    ) -> OpResult<HealthItProduct> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.update_product(id, &record).await })
            .await
    }

    pub async fn delete_product(&self, cancel: &CancellationToken, id: Uuid) -> OpResult<()> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.delete_product(id).await }).await
    }

    pub async fn product_history(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> OpResult<Vec<ProductHistory>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.product_history(id).await }).await
    }
}

/// [`EndpointStore`] behind the cancellable operation wrapper
#[derive(Clone)]
pub struct CancellableEndpointStore {
    inner: Arc<dyn EndpointStore>,
}

impl CancellableEndpointStore {
    pub fn new(inner: Arc<dyn EndpointStore>) -> Self {
        Self { inner }
    }

    pub async fn add_fhir_endpoint(
        &self,
        cancel: &CancellationToken,
        listing: EndpointListing,
    ) -> OpResult<FhirEndpoint> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.add_fhir_endpoint(&listing).await })
            .await
    }

    pub async fn delete_fhir_endpoint(&self, cancel: &CancellationToken, id: Uuid) -> OpResult<()> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.delete_fhir_endpoint(id).await }).await
    }

    pub async fn get_fhir_endpoint_by_url(
        &self,
        cancel: &CancellationToken,
        url: String,
    ) -> OpResult<Option<FhirEndpoint>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_fhir_endpoint_by_url(&url).await })
            .await
    }

    pub async fn get_endpoint_info(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> OpResult<FhirEndpointInfo> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_endpoint_info(id).await }).await
    }

    pub async fn get_endpoint_info_by_url(
        &self,
        cancel: &CancellationToken,
        url: String,
    ) -> OpResult<Option<FhirEndpointInfo>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_endpoint_info_by_url(&url).await })
            .await
    }

    pub async fn get_metadata(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> OpResult<FhirEndpointMetadata> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_metadata(id).await }).await
    }

    pub async fn get_validations(
        &self,
        cancel: &CancellationToken,
        validation_result_id: Uuid,
    ) -> OpResult<Vec<Validation>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move {
            store.get_validations(validation_result_id).await
        })
        .await
    }

    pub async fn get_availability(
        &self,
        cancel: &CancellationToken,
        url: String,
    ) -> OpResult<AvailabilityCounts> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.get_availability(&url).await }).await
    }

    pub async fn endpoint_info_history(
        &self,
        cancel: &CancellationToken,
        url: String,
    ) -> OpResult<Vec<EndpointInfoHistory>> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.endpoint_info_history(&url).await })
            .await
    }

    pub async fn add_endpoint_info(
        &self,
        cancel: &CancellationToken,
        info: EndpointInfoRecord,
        observation: ObservationRecord,
        validations: Vec<Validation>,
    ) -> OpResult<FhirEndpointInfo> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move {
            store.add_endpoint_info(&info, &observation, &validations).await
        })
        .await
    }

    pub async fn update_endpoint_info(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        info: EndpointInfoRecord,
        observation: ObservationRecord,
        validations: Vec<Validation>,
    ) -> OpResult<FhirEndpointInfo> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move {
            store.update_endpoint_info(id, &info, &observation, &validations).await
        })
        .await
    }

    pub async fn refresh_endpoint_metadata(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        observation: ObservationRecord,
    ) -> OpResult<FhirEndpointInfo> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move {
            store.refresh_endpoint_metadata(id, &observation).await
        })
        .await
    }

    pub async fn delete_endpoint_info(&self, cancel: &CancellationToken, id: Uuid) -> OpResult<()> {
        let store = Arc::clone(&self.inner);
        run_cancellable(cancel, move || async move { store.delete_endpoint_info(id).await }).await
    }
}
