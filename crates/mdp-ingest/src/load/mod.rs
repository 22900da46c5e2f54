//! Transactional loaders for PostgreSQL
//!
//! Each `load` call opens one connection, runs one transaction and closes the
//! connection again, whatever the outcome. A batch is committed whole or not
//! at all.
//!
//! - **insider**: fact table, upsert on the natural key
//! - **movers**: snapshot tables, delete-then-insert per category
//! - **schema**: idempotent `CREATE TABLE IF NOT EXISTS` statements

pub mod insider;
pub mod movers;
pub mod schema;

pub use insider::PgInsiderLoader;
pub use movers::PgMoversLoader;

use crate::config::{DatabaseConfig, DatabaseTarget};
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rows per multi-row INSERT statement
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// Load phase failures. All of them are fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Could not reach the database; nothing was written
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed; the batch was rolled back
    #[error("Load failed and was rolled back: {0}")]
    Query(#[from] sqlx::Error),

    /// The run was cancelled mid-load; the batch was rolled back
    #[error("Load cancelled and rolled back")]
    Cancelled,
}

/// Destination for one processed batch
#[async_trait]
pub trait BatchSink<B: Sync>: Send + Sync {
    /// Write `batch` atomically and return the number of rows inserted or
    /// updated. An empty batch is a successful no-op.
    async fn load(&self, batch: &B, cancel: &CancellationToken) -> Result<usize, LoadError>;
}

/// Connection settings shared by the Postgres loaders
#[derive(Debug, Clone)]
pub struct PgTarget {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgTarget {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self, LoadError> {
        let target = config
            .target
            .as_ref()
            .ok_or_else(|| LoadError::Connection("no database target configured".to_string()))?;
        Ok(Self::new(connect_options(target)?, config.connect_timeout))
    }

    async fn connect(&self) -> Result<PgConnection, LoadError> {
        match tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
        {
            Ok(Ok(conn)) => {
                debug!("Database connection established");
                Ok(conn)
            }
            Ok(Err(e)) => Err(LoadError::Connection(e.to_string())),
            Err(_) => Err(LoadError::Connection(format!(
                "timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    /// Open a connection, run `work` on it, and close the connection on every
    /// path. If `cancel` fires first, `work` is dropped, which drops its open
    /// transaction and rolls it back.
    pub(crate) async fn with_connection<F, Fut>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<usize, LoadError>
    where
        F: FnOnce(PgConnection) -> Fut,
        Fut: Future<Output = (PgConnection, Result<usize, LoadError>)>,
    {
        let conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            conn = self.connect() => conn?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The connection went down with the dropped future; the
                // server rolls back the open transaction when it disconnects.
                warn!("Load cancelled, transaction abandoned");
                Err(LoadError::Cancelled)
            }
            (conn, result) = work(conn) => {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close database connection cleanly");
                }
                debug!("Database connection closed");
                result
            }
        }
    }
}

/// Build connect options; a direct URL wins over discrete parameters
pub fn connect_options(target: &DatabaseTarget) -> Result<PgConnectOptions, LoadError> {
    match target {
        DatabaseTarget::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| LoadError::Connection(format!("invalid connection string: {e}"))),
        DatabaseTarget::Params(p) => {
            let mut options = PgConnectOptions::new()
                .host(&p.host)
                .port(p.port)
                .database(&p.database);
            if let Some(user) = &p.user {
                options = options.username(user);
            }
            if let Some(password) = &p.password {
                options = options.password(password);
            }
            Ok(options)
        }
    }
}
