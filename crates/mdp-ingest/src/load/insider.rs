//! Insider transactions: upsert into the fact table

use super::schema::ensure_insider_schema;
use super::{BatchSink, LoadError, PgTarget, DEFAULT_INSERT_CHUNK_SIZE};
use crate::models::InsiderTransaction;
use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// On a key conflict only the descriptive columns are refreshed; key
/// columns and measures keep their stored values.
const UPSERT_SUFFIX: &str = r#"
ON CONFLICT (symbol, date, executive, shares, price) DO UPDATE SET
    title = EXCLUDED.title,
    type = EXCLUDED.type,
    transaction = EXCLUDED.transaction
"#;

/// Loads [`InsiderTransaction`] batches into `insider_transactions`
pub struct PgInsiderLoader {
    target: PgTarget,
    chunk_size: usize,
}

impl PgInsiderLoader {
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
impl BatchSink<Vec<InsiderTransaction>> for PgInsiderLoader {
    async fn load(
        &self,
        batch: &Vec<InsiderTransaction>,
        cancel: &CancellationToken,
    ) -> Result<usize, LoadError> {
        if batch.is_empty() {
            debug!("No insider transactions to load");
            return Ok(0);
        }

        let chunk_size = self.chunk_size;
        let affected = self
            .target
            .with_connection(cancel, |mut conn| async move {
                let result = upsert_batch(&mut conn, batch, chunk_size).await;
                (conn, result)
            })
            .await?;

        info!(records = batch.len(), affected, "Inserted/updated insider transactions");
        Ok(affected)
    }
}

async fn upsert_batch(
    conn: &mut PgConnection,
    batch: &[InsiderTransaction],
    chunk_size: usize,
) -> Result<usize, LoadError> {
    let mut tx = conn.begin().await?;
    ensure_insider_schema(&mut *tx).await?;

    let mut affected = 0u64;
    for chunk in batch.chunks(chunk_size) {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO insider_transactions \
             (symbol, date, executive, title, type, transaction, shares, price) ",
        );
        query.push_values(chunk, |mut row, t| {
            row.push_bind(&t.symbol)
                .push_bind(t.date)
                .push_bind(&t.executive)
                .push_bind(&t.title)
                .push_bind(&t.security_type)
                .push_bind(&t.transaction)
                .push_bind(t.shares)
                .push_bind(t.price);
        });
        query.push(UPSERT_SUFFIX);

        affected += query.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(affected as usize)
}
