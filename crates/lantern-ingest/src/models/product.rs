//! Canonical health IT product

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Natural key of a product: exact, case-sensitive `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey {
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for ProductKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Product attributes as observed in the registry. This is both the
/// normalized incoming record and the mutable part of a stored product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductRecord {
    pub name: String,
    pub version: String,
    pub developer: String,
    /// Absolute URL of the API documentation, or empty when none was given
    pub api_url: String,
    pub certification_criteria: Vec<String>,
    pub certification_status: String,
    pub certification_date: DateTime<Utc>,
    /// Certification edition year, kept as text exactly as received
    pub certification_edition: String,
    pub chpl_id: String,
}

impl ProductRecord {
    pub fn key(&self) -> ProductKey {
        ProductKey {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Field-by-field equality over the attributes the registry owns.
    ///
    /// `chpl_id` is excluded, and criteria compare as multisets.
    pub fn core_eq(&self, other: &ProductRecord) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.developer == other.developer
            && self.api_url == other.api_url
            && self.certification_status == other.certification_status
            && self.certification_date == other.certification_date
            && self.certification_edition == other.certification_edition
            && same_criteria(&self.certification_criteria, &other.certification_criteria)
    }
}

/// Multiset comparison of two criteria lists.
pub fn same_criteria(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<&String> = a.iter().collect();
    let mut right: Vec<&String> = b.iter().collect();
    left.sort();
    right.sort();
    left == right
}

/// A product row in `healthit_products`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HealthItProduct {
    pub id: Uuid,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub record: ProductRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthItProduct {
    pub fn key(&self) -> ProductKey {
        self.record.key()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::carefluence;
    use super::*;

    #[test]
    fn test_core_eq_ignores_chpl_id() {
        let a = carefluence();
        let mut b = carefluence();
        b.chpl_id = "15.04.04.2657.Care.01.00.0.999999".to_string();
        assert!(a.core_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_core_eq_ignores_criteria_order() {
        let a = carefluence();
        let mut b = carefluence();
        b.certification_criteria.reverse();
        assert!(a.core_eq(&b));
    }

    #[test]
    fn test_core_eq_detects_status_change() {
        let a = carefluence();
        let mut b = carefluence();
        b.certification_status = "Retired".to_string();
        assert!(!a.core_eq(&b));
    }

    #[test]
    fn test_same_criteria_counts_duplicates() {
        let a = vec!["x".to_string(), "x".to_string(), "y".to_string()];
        let b = vec!["x".to_string(), "y".to_string(), "y".to_string()];
        assert!(!same_criteria(&a, &b));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(carefluence().key().to_string(), "Carefluence Open API 1");
    }
}
