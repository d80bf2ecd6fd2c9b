//! Query result messages delivered by the capability querier

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chpl::parse::{validate_absolute_url, FormatError};
use crate::error::Result;
use crate::models::{CapabilityStatement, EndpointInfoRecord, ObservationRecord};

/// Decoded queue payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMessage {
    pub url: String,
    #[serde(default)]
    pub tls_version: String,
    #[serde(default)]
    pub mime_types: Vec<String>,
    pub http_response: i32,
    /// Seconds
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub errors: String,
    #[serde(default)]
    pub capability_statement: Option<serde_json::Value>,
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
}

impl CapabilityMessage {
    /// Decode a raw queue payload
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let message: CapabilityMessage = serde_json::from_slice(raw)?;
        message.check()?;
        Ok(message)
    }

    fn check(&self) -> std::result::Result<(), FormatError> {
        if self.url.trim().is_empty() {
            return Err(FormatError::MissingField("url"));
        }
        validate_absolute_url(&self.url)?;
        Ok(())
    }

    /// Split into the identity projection and the observation snapshot
    pub fn normalize(&self) -> (EndpointInfoRecord, ObservationRecord) {
        let info = EndpointInfoRecord {
            url: self.url.clone(),
            tls_version: self.tls_version.clone(),
            mime_types: self.mime_types.clone(),
            vendor_id: self.vendor_id,
            capability_statement: self
                .capability_statement
                .as_ref()
                .filter(|doc| !doc.is_null())
                .cloned()
                .map(CapabilityStatement::new),
        };
        let observation = ObservationRecord {
            url: self.url.clone(),
            http_response: self.http_response,
            response_time_secs: self.response_time,
            errors: self.errors.clone(),
        };
        (info, observation)
    }
}
