//! Composite CHPL field parsing
//!
//! Multi-valued registry fields use `☺` between entries. `apiDocumentation`
//! entries additionally pair a criterion with a URL using `☹`:
//!
//! ```text
//! 170.315 (g)(7)☹http://example.com/docs☺170.315 (g)(8)☹http://example.com/docs
//! ```

use thiserror::Error;
use url::Url;

/// Separator between entries of a multi-valued field
pub const ENTRY_DELIMITER: char = '☺';

/// Separator inside a `criterion☹value` pair
pub const PAIR_DELIMITER: char = '☹';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected format for api doc string '{0}'")]
    ApiDocShape(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("certification date {0} ms is out of range")]
    CertificationDate(i64),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

/// Extract the documentation URL from the first `apiDocumentation` entry.
///
/// An empty field means the product published no documentation and yields
/// an empty string.
pub fn api_documentation_url(raw: &str) -> Result<String, FormatError> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    let first = raw.split(ENTRY_DELIMITER).next().unwrap_or_default();
    let parts: Vec<&str> = first.split(PAIR_DELIMITER).collect();
    let [_, candidate] = parts.as_slice() else {
        return Err(FormatError::ApiDocShape(first.to_string()));
    };

    validate_absolute_url(candidate)?;
    Ok(candidate.to_string())
}

/// Parse `candidate` as an absolute, hierarchical URL.
pub fn validate_absolute_url(candidate: &str) -> Result<Url, FormatError> {
    let invalid = |reason: String| FormatError::InvalidUrl {
        url: candidate.to_string(),
        reason,
    };

    let url = Url::parse(candidate).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URL".to_string()));
    }
    Ok(url)
}

/// Split `criteriaMet` into criterion codes. An empty field yields no criteria.
pub fn criteria_list(raw: &str) -> Vec<String> {
    raw.split(ENTRY_DELIMITER)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
