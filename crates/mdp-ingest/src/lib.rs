//! MDP Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extract → transform → load pipeline for market data.
//!
//! # Datasets
//!
//! - **Insider transactions**: one request per symbol, upserted into a fact
//!   table keyed on `(symbol, date, executive, shares, price)`
//! - **Market movers**: one request for the top gainers, losers and most
//!   active tickers, replacing the stored snapshot per category
//!
//! # Modules
//!
//! - [`fetch`]: rate-limited HTTP extraction
//! - [`normalize`]: pure payload → record conversion
//! - [`load`]: transactional Postgres loaders
//! - [`snapshot`]: timestamped CSV backups
//! - [`pipeline`]: the orchestrating state machine
//!
//! # Example
//!
//! ```no_run
//! use mdp_ingest::config::PipelineConfig;
//! use mdp_ingest::fetch::{HttpSource, RateLimitedFetcher, RateLimiter};
//! use mdp_ingest::load::{PgInsiderLoader, PgTarget};
//! use mdp_ingest::pipeline::{InsiderDataset, Pipeline};
//! use mdp_ingest::snapshot::SnapshotWriter;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let source = HttpSource::new(&config.api.base_url, config.api.insider_key()?, config.api.timeout)?;
//!     let mut pipeline = Pipeline::new(
//!         RateLimitedFetcher::new(source, RateLimiter::new(config.rate_limit_delay())),
//!         InsiderDataset::new(config.symbols.clone(), config.window_days),
//!         Box::new(PgInsiderLoader::new(PgTarget::from_config(&config.database)?)),
//!         SnapshotWriter::new(&config.snapshot_dir),
//!     );
//!
//!     let report = pipeline.run(&CancellationToken::new()).await;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fetch;
pub mod load;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod snapshot;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineState, RunReport};
