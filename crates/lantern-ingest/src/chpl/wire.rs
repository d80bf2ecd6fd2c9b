//! Wire format of the CHPL certified products collection

use lantern_common::cancel::CancellationToken;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Fields requested from the collection endpoint, in request order
pub const PRODUCT_FIELDS: [&str; 11] = [
    "id",
    "edition",
    "developer",
    "product",
    "version",
    "chplProductNumber",
    "certificationStatus",
    "criteriaMet",
    "apiDocumentation",
    "certificationDate",
    "practiceType",
];

/// One entry of `results`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChplCertifiedProduct {
    pub id: i64,
    pub chpl_product_number: String,
    pub edition: String,
    pub developer: String,
    pub product: String,
    pub version: String,
    /// Milliseconds since the Unix epoch
    pub certification_date: i64,
    pub certification_status: String,
    #[serde(default)]
    pub criteria_met: String,
    #[serde(default)]
    pub api_documentation: String,
    #[serde(default)]
    pub practice_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChplProductList {
    pub results: Vec<ChplCertifiedProduct>,
}

/// Decode a downloaded product list. Nothing is decoded once `cancel` fired.
pub fn decode_product_list(body: &[u8], cancel: &CancellationToken) -> Result<Vec<ChplCertifiedProduct>> {
    if cancel.is_cancelled() {
        return Err(IngestError::Aborted { stage: "decoding the product list" });
    }

    let list: ChplProductList = serde_json::from_slice(body)?;
    Ok(list.results)
}
