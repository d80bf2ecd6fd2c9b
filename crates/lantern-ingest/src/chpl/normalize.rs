//! Registry record to canonical product

use chrono::DateTime;

use super::parse::{api_documentation_url, criteria_list, FormatError};
use super::wire::ChplCertifiedProduct;
use crate::models::ProductRecord;

/// Map one registry entry to a [`ProductRecord`].
///
/// The certification date is truncated to whole seconds. The edition is
/// carried as text; its numeric check belongs to conflict resolution.
pub fn normalize_product(product: &ChplCertifiedProduct) -> Result<ProductRecord, FormatError> {
    let api_url = api_documentation_url(&product.api_documentation)?;

    let seconds = product.certification_date.div_euclid(1000);
    let certification_date = DateTime::from_timestamp(seconds, 0)
        .ok_or(FormatError::CertificationDate(product.certification_date))?;

    Ok(ProductRecord {
        name: product.product.clone(),
        version: product.version.clone(),
        developer: product.developer.clone(),
        api_url,
        certification_criteria: criteria_list(&product.criteria_met),
        certification_status: product.certification_status.clone(),
        certification_date,
        certification_edition: product.edition.clone(),
        chpl_id: product.chpl_product_number.clone(),
    })
}
