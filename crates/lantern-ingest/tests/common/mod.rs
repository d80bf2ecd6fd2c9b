//! Shared helpers for Lantern integration tests
//!
//! Postgres-backed tests start a throwaway container with the schema
//! migrations applied. They need a Docker daemon, so they are `#[ignore]`d
//! and run with `cargo test -- --ignored`.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

use lantern_ingest::capability::CapabilityMessage;

pub const CERNER_URL: &str =
    "https://fhir-myrecord.cerner.com/dstu2/sqiLZytFuQ2eXHYm3sJGL4am0kYefbTf/";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lantern_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .context("Failed to get container port")?;
        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        lantern_ingest::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Query result for a DSTU2 Cerner sandbox endpoint
pub fn cerner_message() -> CapabilityMessage {
    CapabilityMessage {
        url: CERNER_URL.to_string(),
        tls_version: "TLS 1.2".to_string(),
        mime_types: vec!["application/json+fhir".to_string()],
        http_response: 200,
        response_time: 0.1234,
        errors: String::new(),
        capability_statement: Some(json!({
            "resourceType": "Conformance",
            "fhirVersion": "1.0.2",
            "kind": "instance",
            "publisher": "Cerner"
        })),
        vendor_id: None,
    }
}

pub fn raw(message: &CapabilityMessage) -> Vec<u8> {
    serde_json::to_vec(message).unwrap_or_default()
}

/// CHPL wire record for Carefluence Open API 1, in the registry's own shape
pub fn carefluence_wire(product: &str, edition: &str) -> serde_json::Value {
    json!({
        "id": 7849,
        "chplProductNumber": "15.04.04.2657.Care.01.00.0.160701",
        "edition": edition,
        "developer": "Carefluence",
        "product": product,
        "version": "1",
        "certificationDate": 1467331200000_i64,
        "certificationStatus": "Active",
        "criteriaMet": "170.315 (d)(1)☺170.315 (d)(10)☺170.315 (d)(9)☺170.315 (g)(4)☺170.315 (g)(5)☺170.315 (g)(6)☺170.315 (g)(7)☺170.315 (g)(8)☺170.315 (g)(9)",
        "apiDocumentation": "170.315 (g)(7)☹http://carefluence.com/Carefluence-OpenAPI-Documentation.html☺170.315 (g)(8)☹http://carefluence.com/Carefluence-OpenAPI-Documentation.html☺170.315 (g)(9)☹http://carefluence.com/Carefluence-OpenAPI-Documentation.html",
        "practiceType": ""
    })
}
