//! FHIR endpoint entities: listing, identity projection, observation snapshot
//! and validation lineage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parsed capability statement document. Opaque to this crate; two
/// statements are equal when their JSON trees are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityStatement(serde_json::Value);

impl CapabilityStatement {
    pub fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn fhir_version(&self) -> Option<&str> {
        self.0.get("fhirVersion").and_then(|v| v.as_str())
    }
}

/// An endpoint as published in an endpoint list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointListing {
    pub url: String,
    pub organization_names: Vec<String>,
    pub list_source: String,
}

/// A row in `fhir_endpoints`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirEndpoint {
    pub id: Uuid,
    #[serde(flatten)]
    pub listing: EndpointListing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity projection of a probed endpoint: the fields validation depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfoRecord {
    pub url: String,
    pub tls_version: String,
    pub mime_types: Vec<String>,
    pub vendor_id: Option<Uuid>,
    pub capability_statement: Option<CapabilityStatement>,
}

impl EndpointInfoRecord {
    /// Equality over identity fields. MIME types compare in order, as the
    /// querier reports them in negotiation order.
    pub fn core_eq(&self, other: &EndpointInfoRecord) -> bool {
        self.url == other.url
            && self.tls_version == other.tls_version
            && self.mime_types == other.mime_types
            && self.vendor_id == other.vendor_id
            && self.capability_statement == other.capability_statement
    }
}

/// A row in `fhir_endpoints_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirEndpointInfo {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: EndpointInfoRecord,
    pub validation_result_id: Uuid,
    pub metadata_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FhirEndpointInfo {
    pub fn core_eq(&self, incoming: &EndpointInfoRecord) -> bool {
        self.record.core_eq(incoming)
    }
}

/// Volatile attributes of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub url: String,
    pub http_response: i32,
    pub response_time_secs: f64,
    pub errors: String,
}

impl ObservationRecord {
    pub fn is_ok(&self) -> bool {
        self.http_response == 200
    }
}

/// A row in `fhir_endpoints_metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirEndpointMetadata {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: ObservationRecord,
    /// Share of probes answering 200, over the endpoint's lifetime
    pub availability: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifetime query counters from `fhir_endpoints_availability`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailabilityCounts {
    pub http_200_count: i64,
    pub http_all_count: i64,
}

impl AvailabilityCounts {
    pub fn record(mut self, http_response: i32) -> Self {
        self.http_all_count += 1;
        if http_response == 200 {
            self.http_200_count += 1;
        }
        self
    }

    pub fn ratio(&self) -> f64 {
        if self.http_all_count == 0 {
            0.0
        } else {
            self.http_200_count as f64 / self.http_all_count as f64
        }
    }
}

/// One check in a validation lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub rule_name: String,
    pub valid: bool,
    pub expected: String,
    pub actual: String,
    pub comment: String,
}
