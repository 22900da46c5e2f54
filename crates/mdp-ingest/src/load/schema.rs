//! Table definitions. Creation is idempotent and never drops or alters data.

use sqlx::PgConnection;
use tracing::debug;

pub const CREATE_INSIDER_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS insider_transactions (
    id SERIAL PRIMARY KEY,
    symbol VARCHAR(10) NOT NULL,
    date DATE NOT NULL,
    executive VARCHAR(100),
    title VARCHAR(100),
    type VARCHAR(50),
    transaction VARCHAR(50),
    shares DECIMAL(10, 2),
    price DECIMAL(10, 2) NOT NULL DEFAULT 0.00,
    UNIQUE (symbol, date, executive, shares, price)
)
"#;

pub const CREATE_STOCK_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_metadata (
    id SERIAL PRIMARY KEY,
    last_updated TIMESTAMPTZ NOT NULL,
    description TEXT,
    UNIQUE (last_updated)
)
"#;

pub const CREATE_STOCK_MOVERS: &str = r#"
CREATE TABLE IF NOT EXISTS stock_movers (
    id SERIAL PRIMARY KEY,
    ticker VARCHAR(10) NOT NULL,
    price DECIMAL(10, 4) NOT NULL,
    change_amount DECIMAL(10, 4) NOT NULL,
    change_percentage DECIMAL(10, 4) NOT NULL,
    volume BIGINT NOT NULL,
    category VARCHAR(10) NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    UNIQUE (ticker, category, last_updated)
)
"#;

async fn ensure(conn: &mut PgConnection, statements: &[&str]) -> Result<(), sqlx::Error> {
    for statement in statements {
        sqlx::query(*statement).execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn ensure_insider_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    ensure(conn, &[CREATE_INSIDER_TRANSACTIONS]).await?;
    debug!("insider_transactions table verified");
    Ok(())
}

pub async fn ensure_movers_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    ensure(conn, &[CREATE_STOCK_METADATA, CREATE_STOCK_MOVERS]).await?;
    debug!("stock_metadata and stock_movers tables verified");
    Ok(())
}
