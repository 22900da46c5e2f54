//! MDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces for the market data pipeline workspace.
//!
//! - **Error Handling**: [`MdpError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use mdp_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> mdp_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("pipeline starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{MdpError, Result};
