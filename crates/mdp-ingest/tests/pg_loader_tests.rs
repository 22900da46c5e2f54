//! Postgres loader tests
//!
//! These start a PostgreSQL container and need Docker:
//!
//! ```bash
//! cargo test -p mdp-ingest --test pg_loader_tests -- --ignored
//! ```

mod common;

use anyhow::Result;
use chrono::NaiveDate;
use common::{init_tracing, TestPostgres};
use mdp_ingest::load::{BatchSink, LoadError, PgInsiderLoader, PgMoversLoader};
use mdp_ingest::models::{
    InsiderTransaction, MarketMover, MarketSnapshot, MoverCategory, SnapshotMetadata,
};
use mdp_ingest::normalize::{normalize_insider, to_column_scale};
use rust_decimal::Decimal;
use serde_json::json;
use serial_test::serial;
use sqlx::Row;
use tokio_util::sync::CancellationToken;

fn transaction(executive: &str, shares: f64, price: f64, title: &str) -> InsiderTransaction {
    InsiderTransaction {
        symbol: "IBM".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        executive: executive.to_string(),
        title: title.to_string(),
        security_type: "Common Stock".to_string(),
        transaction: "A".to_string(),
        shares: to_column_scale(shares),
        price: to_column_scale(price),
    }
}

fn mover(ticker: &str, category: MoverCategory, last_updated: &str) -> MarketMover {
    MarketMover {
        ticker: ticker.to_string(),
        price: 1.2345,
        change_amount: 0.5,
        change_percentage: 68.4932,
        volume: 123_456,
        category,
        last_updated: last_updated.to_string(),
    }
}

fn snapshot(last_updated: &str, gainers: &[&str]) -> MarketSnapshot {
    let mut movers: Vec<MarketMover> = gainers
        .iter()
        .map(|t| mover(t, MoverCategory::Gainers, last_updated))
        .collect();
    movers.push(mover("DOWN", MoverCategory::Losers, last_updated));
    movers.push(mover("SPY", MoverCategory::Active, last_updated));
    MarketSnapshot {
        metadata: Some(SnapshotMetadata {
            last_updated: last_updated.to_string(),
            description: "Top gainers, losers, and most actively traded US tickers".to_string(),
        }),
        movers,
    }
}

async fn count(pg: &TestPostgres, sql: &str) -> Result<i64> {
    let mut conn = pg.connect().await?;
    Ok(sqlx::query(sql).fetch_one(&mut conn).await?.try_get(0)?)
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_insider_upsert_is_idempotent() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let loader = PgInsiderLoader::with_chunk_size(pg.target(), 2);
    let cancel = CancellationToken::new();

    let batch = vec![
        transaction("J. Doe", 100.0, 0.0, "CEO"),
        transaction("A. Smith", 50.0, 12.25, "CFO"),
        transaction("B. Jones", 10.0, 99.99, "Director"),
    ];

    assert_eq!(loader.load(&batch, &cancel).await?, 3);
    assert_eq!(loader.load(&batch, &cancel).await?, 3);
    assert_eq!(count(&pg, "SELECT COUNT(*) FROM insider_transactions").await?, 3);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_insider_conflict_updates_descriptive_fields_only() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgInsiderLoader::new(pg.target());
    let cancel = CancellationToken::new();

    loader.load(&vec![transaction("J. Doe", 100.0, 12.5, "CEO")], &cancel).await?;

    let mut changed = transaction("J. Doe", 100.0, 12.5, "Chairman");
    changed.transaction = "D".to_string();
    loader.load(&vec![changed], &cancel).await?;

    let mut conn = pg.connect().await?;
    let row = sqlx::query(
        "SELECT title, transaction, shares, price, COUNT(*) OVER () AS n \
         FROM insider_transactions",
    )
    .fetch_one(&mut conn)
    .await?;

    assert_eq!(row.try_get::<String, _>("title")?, "Chairman");
    assert_eq!(row.try_get::<String, _>("transaction")?, "D");
    assert_eq!(row.try_get::<Decimal, _>("shares")?, Decimal::new(100, 0));
    assert_eq!(row.try_get::<Decimal, _>("price")?, Decimal::new(125, 1));
    assert_eq!(row.try_get::<i64, _>("n")?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_half_cent_prices_load_as_one_row() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgInsiderLoader::new(pg.target());
    let cancel = CancellationToken::new();

    let body = json!({"data": [
        {"transaction_date": "2024-01-05", "executive": "J. Doe", "shares": "10", "share_price": "1.005", "executive_title": "CEO"},
        {"transaction_date": "2024-01-05", "executive": "J. Doe", "shares": "10", "share_price": "1.01", "executive_title": "CFO"},
        {"transaction_date": "2024-01-05", "executive": "J. Doe", "shares": "10", "share_price": "0.145", "executive_title": "CEO"}
    ]});
    let batch = normalize_insider(&body, "IBM", None).records;
    assert_eq!(batch.len(), 2);

    loader.load(&batch, &cancel).await?;
    loader.load(&batch, &cancel).await?;

    let mut conn = pg.connect().await?;
    let rows: Vec<(Decimal, String)> =
        sqlx::query_as("SELECT price, title FROM insider_transactions ORDER BY price")
            .fetch_all(&mut conn)
            .await?;
    assert_eq!(
        rows,
        vec![
            (Decimal::new(15, 2), "CEO".to_string()),
            (Decimal::new(101, 2), "CFO".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_empty_batch_is_noop() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgInsiderLoader::new(pg.target());

    assert_eq!(loader.load(&Vec::new(), &CancellationToken::new()).await?, 0);

    // Nothing was created: the empty batch never opened a connection
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('insider_transactions') IS NOT NULL")
        .fetch_one(&mut pg.connect().await?)
        .await?;
    assert!(!exists);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_movers_load_replaces_each_category() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgMoversLoader::new(pg.target());
    let cancel = CancellationToken::new();

    loader
        .load(&snapshot("2024-01-05 16:15:59 US/Eastern", &["OLD1", "OLD2"]), &cancel)
        .await?;
    loader
        .load(&snapshot("2024-01-08 16:15:59 US/Eastern", &["NEW1"]), &cancel)
        .await?;

    let mut conn = pg.connect().await?;
    let gainers: Vec<String> =
        sqlx::query_scalar("SELECT ticker FROM stock_movers WHERE category = 'gainers' ORDER BY ticker")
            .fetch_all(&mut conn)
            .await?;
    assert_eq!(gainers, vec!["NEW1"]);

    assert_eq!(count(&pg, "SELECT COUNT(*) FROM stock_movers").await?, 3);
    assert_eq!(count(&pg, "SELECT COUNT(*) FROM stock_metadata").await?, 2);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_failed_movers_load_rolls_back() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgMoversLoader::new(pg.target());
    let cancel = CancellationToken::new();

    loader
        .load(&snapshot("2024-01-05 16:15:59 US/Eastern", &["KEEP"]), &cancel)
        .await?;

    // Ticker longer than VARCHAR(10): the insert fails after the deletes ran
    let bad = snapshot("2024-01-08 16:15:59 US/Eastern", &["WAYTOOLONGTICKER"]);
    let err = loader.load(&bad, &cancel).await.unwrap_err();
    assert!(matches!(err, LoadError::Query(_)));

    assert_eq!(
        count(&pg, "SELECT COUNT(*) FROM stock_movers WHERE ticker = 'KEEP'").await?,
        1
    );
    assert_eq!(count(&pg, "SELECT COUNT(*) FROM stock_metadata").await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_cancelled_load_writes_nothing() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let loader = PgInsiderLoader::new(pg.target());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = loader
        .load(&vec![transaction("J. Doe", 1.0, 1.0, "CEO")], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Cancelled));

    let exists: bool = sqlx::query_scalar("SELECT to_regclass('insider_transactions') IS NOT NULL")
        .fetch_one(&mut pg.connect().await?)
        .await?;
    assert!(!exists);
    Ok(())
}
