//! Market movers: replace the current snapshot

use super::schema::ensure_movers_schema;
use super::{BatchSink, LoadError, PgTarget, DEFAULT_INSERT_CHUNK_SIZE};
use crate::models::{MarketMover, MarketSnapshot, MoverCategory};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const UPSERT_METADATA: &str = r#"
INSERT INTO stock_metadata (last_updated, description)
VALUES ($1::timestamptz, $2)
ON CONFLICT (last_updated) DO UPDATE SET description = EXCLUDED.description
"#;

/// Loads a [`MarketSnapshot`] into `stock_metadata` and `stock_movers`.
///
/// Every category's rows are deleted and re-inserted from the snapshot, so
/// after a successful load `stock_movers` holds exactly the latest snapshot.
/// An empty category clears that category.
pub struct PgMoversLoader {
    target: PgTarget,
    chunk_size: usize,
}

impl PgMoversLoader {
    pub fn new(target: PgTarget) -> Self {
        Self {
            target,
            chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(target: PgTarget, chunk_size: usize) -> Self {
        Self {
            target,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl BatchSink<MarketSnapshot> for PgMoversLoader {
    async fn load(
        &self,
        batch: &MarketSnapshot,
        cancel: &CancellationToken,
    ) -> Result<usize, LoadError> {
        if batch.metadata.is_none() && batch.movers.is_empty() {
            debug!("Empty movers snapshot, nothing to load");
            return Ok(0);
        }

        let chunk_size = self.chunk_size;
        let affected = self
            .target
            .with_connection(cancel, |mut conn| async move {
                let result = replace_snapshot(&mut conn, batch, chunk_size).await;
                (conn, result)
            })
            .await?;

        info!(records = batch.movers.len(), affected, "Replaced market movers snapshot");
        Ok(affected)
    }
}

async fn replace_snapshot(
    conn: &mut PgConnection,
    snapshot: &MarketSnapshot,
    chunk_size: usize,
) -> Result<usize, LoadError> {
    let mut tx = conn.begin().await?;
    ensure_movers_schema(&mut *tx).await?;

    if let Some(metadata) = &snapshot.metadata {
        sqlx::query(UPSERT_METADATA)
            .bind(&metadata.last_updated)
            .bind(&metadata.description)
            .execute(&mut *tx)
            .await?;
        debug!(last_updated = %metadata.last_updated, "Snapshot metadata stored");
    }

    let mut affected = 0u64;
    for category in MoverCategory::ALL {
        let deleted = sqlx::query("DELETE FROM stock_movers WHERE category = $1")
            .bind(category.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let rows = snapshot.category(category);
        for chunk in rows.chunks(chunk_size) {
            affected += insert_movers(&mut *tx, chunk).await?;
        }
        debug!(%category, deleted, inserted = rows.len(), "Category replaced");
    }

    tx.commit().await?;
    Ok(affected as usize)
}

async fn insert_movers(conn: &mut PgConnection, rows: &[&MarketMover]) -> Result<u64, LoadError> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO stock_movers \
         (ticker, price, change_amount, change_percentage, volume, category, last_updated) ",
    );
    query.push_values(rows, |mut row, m| {
        row.push_bind(&m.ticker)
            .push_bind(m.price)
            .push_bind(m.change_amount)
            .push_bind(m.change_percentage)
            .push_bind(m.volume)
            .push_bind(m.category.as_str())
            .push_bind(&m.last_updated)
            .push_unseparated("::timestamptz");
    });
    Ok(query.build().execute(&mut *conn).await?.rows_affected())
}
