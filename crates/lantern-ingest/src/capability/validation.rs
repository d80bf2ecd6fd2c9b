//! Checks recorded in a validation lineage
//!
//! Only identity fields feed these rules, so an unchanged identity never
//! needs a new lineage.

use crate::models::{EndpointInfoRecord, Validation};

pub const TLS_RULE: &str = "tlsVersion";
pub const MIME_RULE: &str = "mimeType";
pub const CAPABILITY_RULE: &str = "capabilityStatement";

const ACCEPTED_TLS: [&str; 2] = ["TLS 1.2", "TLS 1.3"];
const FHIR_JSON_MIME_TYPES: [&str; 2] = ["application/fhir+json", "application/json+fhir"];

pub fn validate(info: &EndpointInfoRecord) -> Vec<Validation> {
    vec![tls_check(info), mime_check(info), capability_check(info)]
}

fn tls_check(info: &EndpointInfoRecord) -> Validation {
    Validation {
        rule_name: TLS_RULE.to_string(),
        valid: ACCEPTED_TLS.contains(&info.tls_version.as_str()),
        expected: ACCEPTED_TLS.join(", "),
        actual: info.tls_version.clone(),
        comment: "Systems must use TLS 1.2 or later.".to_string(),
    }
}

fn mime_check(info: &EndpointInfoRecord) -> Validation {
    Validation {
        rule_name: MIME_RULE.to_string(),
        valid: info
            .mime_types
            .iter()
            .any(|m| FHIR_JSON_MIME_TYPES.contains(&m.as_str())),
        expected: FHIR_JSON_MIME_TYPES.join(", "),
        actual: info.mime_types.join(", "),
        comment: "The endpoint must answer with a FHIR JSON MIME type.".to_string(),
    }
}

fn capability_check(info: &EndpointInfoRecord) -> Validation {
    let present = info.capability_statement.is_some();
    Validation {
        rule_name: CAPABILITY_RULE.to_string(),
        valid: present,
        expected: "true".to_string(),
        actual: present.to_string(),
        comment: "Servers shall provide a Capability Statement.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CapabilityStatement;

    fn info(tls: &str, mime: &[&str], statement: bool) -> EndpointInfoRecord {
        EndpointInfoRecord {
            url: "https://fhir.example.org/r4/".to_string(),
            tls_version: tls.to_string(),
            mime_types: mime.iter().map(|m| m.to_string()).collect(),
            vendor_id: None,
            capability_statement: statement
                .then(|| CapabilityStatement::new(serde_json::json!({"kind": "instance"}))),
        }
    }

    #[test]
    fn test_three_rules_in_order() {
        let rules: Vec<_> = validate(&info("TLS 1.2", &["application/fhir+json"], true))
            .into_iter()
            .map(|v| (v.rule_name, v.valid))
            .collect();
        assert_eq!(
            rules,
            vec![
                (TLS_RULE.to_string(), true),
                (MIME_RULE.to_string(), true),
                (CAPABILITY_RULE.to_string(), true)
            ]
        );
    }

    #[test]
    fn test_failures() {
        let checks = validate(&info("TLS 1.0", &["text/html"], false));
        assert!(checks.iter().all(|v| !v.valid));
        assert_eq!(checks[0].actual, "TLS 1.0");
    }
}
