//! Audit rows written by the `*_history` triggers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation code stored in the `operation` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryOperation {
    Insert,
    Update,
    Delete,
}

impl HistoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "I",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Self::Insert),
            "U" => Some(Self::Update),
            "D" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row in `healthit_products_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHistory {
    pub operation: HistoryOperation,
    pub entered_at: DateTime<Utc>,
    pub product_id: Uuid,
    pub certification_edition: String,
    pub chpl_id: String,
    pub updated_at: DateTime<Utc>,
}

/// A row in `fhir_endpoints_info_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfoHistory {
    pub operation: HistoryOperation,
    pub entered_at: DateTime<Utc>,
    pub url: String,
    pub tls_version: String,
    pub validation_result_id: Uuid,
    pub metadata_id: Uuid,
    pub updated_at: DateTime<Utc>,
}
