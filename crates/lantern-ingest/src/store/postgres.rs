//! PostgreSQL store
//!
//! Each multi-row write runs in one transaction. Audit rows are written by the
//! history triggers in the schema, never by this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{EndpointStore, ProductStore, StoreError, StoreResult};
use crate::models::{
    AvailabilityCounts, CapabilityStatement, EndpointInfoHistory, EndpointInfoRecord,
    EndpointListing, FhirEndpoint, FhirEndpointInfo, FhirEndpointMetadata, HealthItProduct,
    HistoryOperation, ObservationRecord, ProductHistory, ProductKey, ProductRecord, Validation,
};

/// Store backed by a Postgres connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Translate unique and length violations into their store error kinds.
fn classify(err: sqlx::Error, resource_type: &str, identifier: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::duplicate(resource_type, identifier);
        }
        // string_data_right_truncation
        if db.code().as_deref() == Some("22001") {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    StoreError::Sqlx(err)
}

fn parse_operation(code: &str) -> StoreResult<HistoryOperation> {
    HistoryOperation::parse(code.trim())
        .ok_or_else(|| StoreError::Corrupt(format!("unknown history operation '{}'", code)))
}

// ============================================================================
// Row mappings
// ============================================================================

#[derive(sqlx::FromRow)]
struct ProductHistoryRow {
    operation: String,
    entered_at: DateTime<Utc>,
    id: Uuid,
    certification_edition: String,
    chpl_id: String,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: Uuid,
    url: String,
    organization_names: Vec<String>,
    list_source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EndpointRow> for FhirEndpoint {
    fn from(row: EndpointRow) -> Self {
        Self {
            id: row.id,
            listing: EndpointListing {
                url: row.url,
                organization_names: row.organization_names,
                list_source: row.list_source,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct InfoRow {
    id: Uuid,
    url: String,
    tls_version: String,
    mime_types: Vec<String>,
    vendor_id: Option<Uuid>,
    capability_statement: Option<Json<serde_json::Value>>,
    validation_result_id: Uuid,
    metadata_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InfoRow> for FhirEndpointInfo {
    fn from(row: InfoRow) -> Self {
        Self {
            id: row.id,
            record: EndpointInfoRecord {
                url: row.url,
                tls_version: row.tls_version,
                mime_types: row.mime_types,
                vendor_id: row.vendor_id,
                capability_statement: row.capability_statement.map(|j| CapabilityStatement::new(j.0)),
            },
            validation_result_id: row.validation_result_id,
            metadata_id: row.metadata_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    id: Uuid,
    url: String,
    http_response: i32,
    availability: f64,
    errors: String,
    response_time_seconds: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MetadataRow> for FhirEndpointMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            id: row.id,
            record: ObservationRecord {
                url: row.url,
                http_response: row.http_response,
                response_time_secs: row.response_time_seconds,
                errors: row.errors,
            },
            availability: row.availability,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ValidationRow {
    rule_name: String,
    valid: bool,
    expected: String,
    actual: String,
    comment: String,
}

#[derive(sqlx::FromRow)]
struct InfoHistoryRow {
    operation: String,
    entered_at: DateTime<Utc>,
    url: String,
    tls_version: String,
    validation_result_id: Uuid,
    metadata_id: Uuid,
    updated_at: DateTime<Utc>,
}

// ============================================================================
// Transaction helpers
// ============================================================================

/// Bump availability counters and write a new snapshot. Returns its id.
async fn insert_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    observation: &ObservationRecord,
) -> StoreResult<Uuid> {
    let ok = i64::from(observation.is_ok());
    let (http_200_count, http_all_count): (i64, i64) = sqlx::query_as(
        r#"
        INSERT INTO fhir_endpoints_availability (url, http_200_count, http_all_count)
        VALUES ($1, $2, 1)
        ON CONFLICT (url) DO UPDATE SET
            http_200_count = fhir_endpoints_availability.http_200_count + EXCLUDED.http_200_count,
            http_all_count = fhir_endpoints_availability.http_all_count + 1,
            updated_at = NOW()
        RETURNING http_200_count, http_all_count
        "#,
    )
    .bind(&observation.url)
    .bind(ok)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify(e, "Availability", &observation.url))?;

    let availability = AvailabilityCounts { http_200_count, http_all_count }.ratio();

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO fhir_endpoints_metadata
            (url, http_response, availability, errors, response_time_seconds)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&observation.url)
    .bind(observation.http_response)
    .bind(availability)
    .bind(&observation.errors)
    .bind(observation.response_time_secs)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify(e, "Endpoint metadata", &observation.url))?;

    Ok(id)
}

/// Create a validation result and its validations. Returns the result id.
async fn insert_lineage(
    tx: &mut Transaction<'_, Postgres>,
    validations: &[Validation],
) -> StoreResult<Uuid> {
    let id: Uuid =
        sqlx::query_scalar("INSERT INTO validation_results DEFAULT VALUES RETURNING id")
            .fetch_one(&mut **tx)
            .await?;

    for (ordinal, validation) in validations.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO validations
                (validation_result_id, ordinal, rule_name, valid, expected, actual, comment)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(ordinal as i32)
        .bind(&validation.rule_name)
        .bind(validation.valid)
        .bind(&validation.expected)
        .bind(&validation.actual)
        .bind(&validation.comment)
        .execute(&mut **tx)
        .await?;
    }

    Ok(id)
}

fn statement_json(info: &EndpointInfoRecord) -> Option<Json<&serde_json::Value>> {
    info.capability_statement.as_ref().map(|s| Json(s.as_value()))
}

// ============================================================================
// Products
// ============================================================================

#[async_trait]
impl ProductStore for PgStore {
    async fn get_product(&self, id: Uuid) -> StoreResult<HealthItProduct> {
        sqlx::query_as::<_, HealthItProduct>(
            r#"
            SELECT id, name, version, developer, api_url, certification_criteria,
                   certification_status, certification_date, certification_edition,
                   chpl_id, created_at, updated_at
            FROM healthit_products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Product", id))
    }

    async fn get_product_by_key(&self, key: &ProductKey) -> StoreResult<Option<HealthItProduct>> {
        let product = sqlx::query_as::<_, HealthItProduct>(
            r#"
            SELECT id, name, version, developer, api_url, certification_criteria,
                   certification_status, certification_date, certification_edition,
                   chpl_id, created_at, updated_at
            FROM healthit_products
            WHERE name = $1 AND version = $2
            "#,
        )
        .bind(&key.name)
        .bind(&key.version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    async fn add_product(&self, record: &ProductRecord) -> StoreResult<HealthItProduct> {
        let product = sqlx::query_as::<_, HealthItProduct>(
            r#"
            INSERT INTO healthit_products (
                name, version, developer, api_url, certification_criteria,
                certification_status, certification_date, certification_edition, chpl_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, name, version, developer, api_url, certification_criteria,
                      certification_status, certification_date, certification_edition,
                      chpl_id, created_at, updated_at
            "#,
        )
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.developer)
        .bind(&record.api_url)
        .bind(&record.certification_criteria)
        .bind(&record.certification_status)
        .bind(record.certification_date)
        .bind(&record.certification_edition)
        .bind(&record.chpl_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "Product", &record.key().to_string()))?;

        debug!(product_id = %product.id, key = %record.key(), "Added product");
        Ok(product)
    }

    async fn update_product(&self, id: Uuid, record: &ProductRecord) -> StoreResult<HealthItProduct> {
        let product = sqlx::query_as::<_, HealthItProduct>(
            r#"
            UPDATE healthit_products SET
                name = $2,
                version = $3,
                developer = $4,
                api_url = $5,
                certification_criteria = $6,
                certification_status = $7,
                certification_date = $8,
                certification_edition = $9,
                chpl_id = $10,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, version, developer, api_url, certification_criteria,
                      certification_status, certification_date, certification_edition,
                      chpl_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.developer)
        .bind(&record.api_url)
        .bind(&record.certification_criteria)
        .bind(&record.certification_status)
        .bind(record.certification_date)
        .bind(&record.certification_edition)
        .bind(&record.chpl_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "Product", &record.key().to_string()))?
        .ok_or_else(|| StoreError::not_found("Product", id))?;

        debug!(product_id = %id, key = %record.key(), "Updated product");
        Ok(product)
    }

    async fn delete_product(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM healthit_products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Product", id));
        }
        Ok(())
    }

    async fn product_history(&self, id: Uuid) -> StoreResult<Vec<ProductHistory>> {
        let rows = sqlx::query_as::<_, ProductHistoryRow>(
            r#"
            SELECT operation, entered_at, id, certification_edition, chpl_id, updated_at
            FROM healthit_products_history
            WHERE id = $1
            ORDER BY entered_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProductHistory {
                    operation: parse_operation(&row.operation)?,
                    entered_at: row.entered_at,
                    product_id: row.id,
                    certification_edition: row.certification_edition,
                    chpl_id: row.chpl_id,
                    updated_at: row.updated_at,
                })
            })
            .collect()
    }
}

// ============================================================================
// Endpoints
// ============================================================================

#[async_trait]
impl EndpointStore for PgStore {
    async fn add_fhir_endpoint(&self, listing: &EndpointListing) -> StoreResult<FhirEndpoint> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            INSERT INTO fhir_endpoints (url, organization_names, list_source)
            VALUES ($1, $2, $3)
            RETURNING id, url, organization_names, list_source, created_at, updated_at
            "#,
        )
        .bind(&listing.url)
        .bind(&listing.organization_names)
        .bind(&listing.list_source)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "FHIR endpoint", &listing.url))?;

        Ok(row.into())
    }

    async fn get_fhir_endpoint_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, url, organization_names, list_source, created_at, updated_at
            FROM fhir_endpoints
            WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn delete_fhir_endpoint(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let url: Option<String> =
            sqlx::query_scalar("DELETE FROM fhir_endpoints WHERE id = $1 RETURNING url")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let url = url.ok_or_else(|| StoreError::not_found("FHIR endpoint", id))?;

        sqlx::query("DELETE FROM fhir_endpoints_info WHERE url = $1")
            .bind(&url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fhir_endpoints_metadata WHERE url = $1")
            .bind(&url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fhir_endpoints_availability WHERE url = $1")
            .bind(&url)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(endpoint_id = %id, url = %url, "Deleted FHIR endpoint and its observations");
        Ok(())
    }

    async fn get_endpoint_info(&self, id: Uuid) -> StoreResult<FhirEndpointInfo> {
        sqlx::query_as::<_, InfoRow>(
            r#"
            SELECT id, url, tls_version, mime_types, vendor_id, capability_statement,
                   validation_result_id, metadata_id, created_at, updated_at
            FROM fhir_endpoints_info
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or_else(|| StoreError::not_found("Endpoint info", id))
    }

    async fn get_endpoint_info_by_url(&self, url: &str) -> StoreResult<Option<FhirEndpointInfo>> {
        let row = sqlx::query_as::<_, InfoRow>(
            r#"
            SELECT id, url, tls_version, mime_types, vendor_id, capability_statement,
                   validation_result_id, metadata_id, created_at, updated_at
            FROM fhir_endpoints_info
            WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_metadata(&self, id: Uuid) -> StoreResult<FhirEndpointMetadata> {
        sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT id, url, http_response, availability, errors, response_time_seconds,
                   created_at, updated_at
            FROM fhir_endpoints_metadata
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or_else(|| StoreError::not_found("Endpoint metadata", id))
    }

    async fn get_validations(&self, validation_result_id: Uuid) -> StoreResult<Vec<Validation>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM validation_results WHERE id = $1)")
                .bind(validation_result_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(StoreError::not_found("Validation result", validation_result_id));
        }

        let rows = sqlx::query_as::<_, ValidationRow>(
            r#"
            SELECT rule_name, valid, expected, actual, comment
            FROM validations
            WHERE validation_result_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(validation_result_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Validation {
                rule_name: r.rule_name,
                valid: r.valid,
                expected: r.expected,
                actual: r.actual,
                comment: r.comment,
            })
            .collect())
    }

    async fn get_availability(&self, url: &str) -> StoreResult<AvailabilityCounts> {
        let counts: Option<(i64, i64)> = sqlx::query_as(
            "SELECT http_200_count, http_all_count FROM fhir_endpoints_availability WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(counts
            .map(|(http_200_count, http_all_count)| AvailabilityCounts {
                http_200_count,
                http_all_count,
            })
            .unwrap_or_default())
    }

    async fn endpoint_info_history(&self, url: &str) -> StoreResult<Vec<EndpointInfoHistory>> {
        let rows = sqlx::query_as::<_, InfoHistoryRow>(
            r#"
            SELECT operation, entered_at, url, tls_version, validation_result_id,
                   metadata_id, updated_at
            FROM fhir_endpoints_info_history
            WHERE url = $1
            ORDER BY entered_at, updated_at
            "#,
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(EndpointInfoHistory {
                    operation: parse_operation(&row.operation)?,
                    entered_at: row.entered_at,
                    url: row.url,
                    tls_version: row.tls_version,
                    validation_result_id: row.validation_result_id,
                    metadata_id: row.metadata_id,
                    updated_at: row.updated_at,
                })
            })
            .collect()
    }

    async fn add_endpoint_info(
        &self,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo> {
        let mut tx = self.pool.begin().await?;

        let validation_result_id = insert_lineage(&mut tx, validations).await?;
        let metadata_id = insert_snapshot(&mut tx, observation).await?;

        let row = sqlx::query_as::<_, InfoRow>(
            r#"
            INSERT INTO fhir_endpoints_info (
                url, tls_version, mime_types, vendor_id, capability_statement,
                validation_result_id, metadata_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, url, tls_version, mime_types, vendor_id, capability_statement,
                      validation_result_id, metadata_id, created_at, updated_at
            "#,
        )
        .bind(&info.url)
        .bind(&info.tls_version)
        .bind(&info.mime_types)
        .bind(info.vendor_id)
        .bind(statement_json(info))
        .bind(validation_result_id)
        .bind(metadata_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify(e, "Endpoint info", &info.url))?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_endpoint_info(
        &self,
        id: Uuid,
        info: &EndpointInfoRecord,
        observation: &ObservationRecord,
        validations: &[Validation],
    ) -> StoreResult<FhirEndpointInfo> {
        let mut tx = self.pool.begin().await?;

        let validation_result_id = insert_lineage(&mut tx, validations).await?;
        let metadata_id = insert_snapshot(&mut tx, observation).await?;

        let row = sqlx::query_as::<_, InfoRow>(
            r#"
            UPDATE fhir_endpoints_info SET
                url = $2,
                tls_version = $3,
                mime_types = $4,
                vendor_id = $5,
                capability_statement = $6,
                validation_result_id = $7,
                metadata_id = $8,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, url, tls_version, mime_types, vendor_id, capability_statement,
                      validation_result_id, metadata_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&info.url)
        .bind(&info.tls_version)
        .bind(&info.mime_types)
        .bind(info.vendor_id)
        .bind(statement_json(info))
        .bind(validation_result_id)
        .bind(metadata_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify(e, "Endpoint info", &info.url))?
        .ok_or_else(|| StoreError::not_found("Endpoint info", id))?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn refresh_endpoint_metadata(
        &self,
        id: Uuid,
        observation: &ObservationRecord,
    ) -> StoreResult<FhirEndpointInfo> {
        let mut tx = self.pool.begin().await?;

        let metadata_id = insert_snapshot(&mut tx, observation).await?;

        // metadata_id only: the history trigger does not watch this column
        let row = sqlx::query_as::<_, InfoRow>(
            r#"
            UPDATE fhir_endpoints_info SET metadata_id = $2
            WHERE id = $1
            RETURNING id, url, tls_version, mime_types, vendor_id, capability_statement,
                      validation_result_id, metadata_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(metadata_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("Endpoint info", id))?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn delete_endpoint_info(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM fhir_endpoints_info WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Endpoint info", id));
        }
        Ok(())
    }
}
