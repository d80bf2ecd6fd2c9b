//! HTTP client for the CHPL REST API

use std::time::Duration;

use lantern_common::cancel::CancellationToken;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use super::wire::PRODUCT_FIELDS;
use crate::config::RegistryConfig;
use crate::error::{IngestError, Result};

/// Collection path, relative to the REST base URL
pub const PRODUCT_COLLECTION_PATH: &str = "collections/certified_products";

const USER_AGENT: &str = concat!("lantern-ingest/", env!("CARGO_PKG_VERSION"));

pub struct ChplClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl ChplClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| IngestError::config(format!("invalid CHPL base URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Product collection URL carrying the API key and field list
    pub fn product_list_url(&self) -> Result<Url> {
        let mut url = self
            .base_url
            .join(PRODUCT_COLLECTION_PATH)
            .map_err(|e| IngestError::config(format!("cannot build product URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("fields", &PRODUCT_FIELDS.join(","));
        Ok(url)
    }

    /// Download the raw product collection.
    ///
    /// The request is dropped as soon as `cancel` fires. Any status other than
    /// 200 is an error.
    pub async fn fetch_product_list(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let stage = "downloading the product list";
        if cancel.is_cancelled() {
            return Err(IngestError::Aborted { stage });
        }
        if self.api_key.is_empty() {
            return Err(IngestError::config("LANTERN_CHPL_API_KEY is not set"));
        }

        let url = self.product_list_url()?;
        let display_url = without_query(&url);
        info!(url = %display_url, "Requesting CHPL products");

        let request = async {
            let response = self.client.get(url).send().await.map_err(|e| e.without_url())?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(IngestError::HttpStatus {
                    url: display_url.clone(),
                    status: status.as_u16(),
                });
            }
            let body = response.bytes().await.map_err(|e| e.without_url())?;
            Ok::<_, IngestError>(body.to_vec())
        };

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Aborted { stage }),
            result = request => result?,
        };

        debug!(bytes = body.len(), "Downloaded CHPL products");
        Ok(body)
    }
}

/// URL without its query string, so the API key never reaches the logs.
fn without_query(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
