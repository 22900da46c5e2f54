//! Shared fixtures for the mdp-ingest integration tests
//!
//! - [`ScriptedSource`]: a [`JsonSource`] answering from a fixed script
//! - [`MemoryFactTable`] / [`MemorySnapshotTables`]: in-memory sinks with the
//!   same upsert and replace semantics as the Postgres loaders
//! - [`TestPostgres`]: a throwaway PostgreSQL container (needs Docker)

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use mdp_ingest::config::DatabaseTarget;
use mdp_ingest::fetch::{FetchError, JsonSource};
use mdp_ingest::load::{connect_options, BatchSink, LoadError, PgTarget};
use mdp_ingest::models::{InsiderKey, InsiderTransaction, MarketMover, MarketSnapshot, WorkUnit};
use serde_json::Value;
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mdp_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Source
// ============================================================================

/// Answers each work unit from a script keyed by its `Display` form
/// (`FUNCTION:SYMBOL` or `FUNCTION`). Unscripted units fail upstream.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    responses: Arc<Mutex<HashMap<String, Result<Value, FetchError>>>>,
    calls: Arc<Mutex<Vec<(String, tokio::time::Instant)>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, unit: &str, body: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(unit.to_string(), Ok(body));
        self
    }

    pub fn fail(self, unit: &str, err: FetchError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(unit.to_string(), Err(err));
        self
    }

    /// Units requested so far, in order
    pub fn requested(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    /// Virtual time of each request
    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl JsonSource for ScriptedSource {
    async fn get_json(&self, unit: &WorkUnit) -> Result<Value, FetchError> {
        let key = unit.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((key.clone(), tokio::time::Instant::now()));
        self.responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Upstream(format!("no response scripted for {key}"))))
    }
}

// ============================================================================
// In-memory sinks
// ============================================================================

/// Fact table keyed on the insider uniqueness key; conflicts update only the
/// descriptive fields
#[derive(Clone, Default)]
pub struct MemoryFactTable {
    rows: Arc<Mutex<HashMap<InsiderKey, InsiderTransaction>>>,
    loads: Arc<Mutex<usize>>,
}

impl MemoryFactTable {
    pub fn rows(&self) -> Vec<InsiderTransaction> {
        let mut rows: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by(|a, b| (&a.symbol, a.date, &a.executive).cmp(&(&b.symbol, b.date, &b.executive)));
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn loads(&self) -> usize {
        *self.loads.lock().unwrap()
    }
}

#[async_trait]
impl BatchSink<Vec<InsiderTransaction>> for MemoryFactTable {
    async fn load(
        &self,
        batch: &Vec<InsiderTransaction>,
        cancel: &CancellationToken,
    ) -> Result<usize, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        *self.loads.lock().unwrap() += 1;

        let mut rows = self.rows.lock().unwrap();
        for record in batch {
            rows.entry(record.key())
                .and_modify(|existing| existing.update_descriptive(record.clone()))
                .or_insert_with(|| record.clone());
        }
        Ok(batch.len())
    }
}

/// Metadata keyed by `last_updated` plus movers replaced per category
#[derive(Clone, Default)]
pub struct MemorySnapshotTables {
    metadata: Arc<Mutex<HashMap<String, String>>>,
    movers: Arc<Mutex<Vec<MarketMover>>>,
}

impl MemorySnapshotTables {
    pub fn movers(&self) -> Vec<MarketMover> {
        self.movers.lock().unwrap().clone()
    }

    pub fn metadata(&self) -> HashMap<String, String> {
        self.metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink<MarketSnapshot> for MemorySnapshotTables {
    async fn load(
        &self,
        batch: &MarketSnapshot,
        cancel: &CancellationToken,
    ) -> Result<usize, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        if let Some(meta) = &batch.metadata {
            self.metadata
                .lock()
                .unwrap()
                .insert(meta.last_updated.clone(), meta.description.clone());
        }

        // Every category is replaced, so the table becomes the new snapshot
        *self.movers.lock().unwrap() = batch.movers.clone();
        Ok(batch.movers.len())
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL test container
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
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

        Ok(Self {
            _container: container,
            connection_string: format!("postgresql://postgres:postgres@{host}:{port}/postgres"),
        })
    }

    /// Loader target for this container
    pub fn target(&self) -> PgTarget {
        let options = connect_options(&DatabaseTarget::Url(self.connection_string.clone()))
            .expect("container URL is valid");
        PgTarget::new(options, Duration::from_secs(10))
    }

    /// A separate connection for assertions
    pub async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect(&self.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")
    }
}
