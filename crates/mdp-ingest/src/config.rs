//! Pipeline configuration
//!
//! Built once at startup from the environment (and `.env`), then passed by
//! reference to the components that need it. Nothing below reads the
//! environment on its own.

use mdp_common::{MdpError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Market data endpoint
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Free tier allows 5 calls per minute
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 12;

/// Recency window for insider transactions (two years)
pub const DEFAULT_WINDOW_DAYS: u32 = 2 * 365;

pub const DEFAULT_SYMBOLS: &[&str] = &["IBM", "AAPL", "MSFT", "GOOGL"];

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_DATABASE_NAME: &str = "postgres";

/// Supabase transaction pooler port
pub const DEFAULT_DATABASE_PORT: u16 = 6543;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_SNAPSHOT_DIR: &str = ".";

// ============================================================================
// Types
// ============================================================================

/// Upstream API settings
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Separate credential for the movers dataset, if configured
    pub movers_api_key: Option<String>,
    pub timeout: Duration,
    pub rate_limit_delay: Duration,
}

impl ApiConfig {
    /// Credential for the insider dataset (`API_KEY`)
    pub fn insider_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(MdpError::Config("API_KEY is not set".to_string()));
        }
        Ok(&self.api_key)
    }

    /// Credential for the movers dataset: `SECOND_API`, else `API_KEY`
    pub fn movers_key(&self) -> Result<&str> {
        match self.movers_api_key.as_deref() {
            Some(key) => Ok(key),
            None => self.insider_key().map_err(|_| {
                MdpError::Config("Neither SECOND_API nor API_KEY is set".to_string())
            }),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("rate_limit_delay", &self.rate_limit_delay)
            .finish()
    }
}

/// Discrete connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

/// Where the loader connects. A direct URL wins over discrete parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Url(String),
    Params(DatabaseParams),
}

impl DatabaseTarget {
    /// Human-readable target with credentials stripped
    pub fn redacted(&self) -> String {
        match self {
            DatabaseTarget::Url(url) => match url.rsplit_once('@') {
                Some((_, host)) => format!("postgresql://***@{host}"),
                None => url.clone(),
            },
            DatabaseTarget::Params(p) => format!("{}:{}/{}", p.host, p.port, p.database),
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub target: Option<DatabaseTarget>,
    pub connect_timeout: Duration,
}

/// Everything one pipeline run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub symbols: Vec<String>,
    /// `None` disables the recency window
    pub window_days: Option<u32>,
    pub snapshot_dir: PathBuf,
}

// ============================================================================
// Loading
// ============================================================================

impl PipelineConfig {
    /// Load from `.env` and the process environment, then validate
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_vars(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary variable lookup. Does not validate.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api = ApiConfig {
            base_url: var("ALPHAVANTAGE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: var("API_KEY").unwrap_or_default(),
            movers_api_key: var("SECOND_API"),
            timeout: Duration::from_secs(parse_or(
                "HTTP_TIMEOUT_SECS",
                var("HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            rate_limit_delay: Duration::from_secs(parse_or(
                "RATE_LIMIT_DELAY_SECS",
                var("RATE_LIMIT_DELAY_SECS"),
                DEFAULT_RATE_LIMIT_DELAY_SECS,
            )?),
        };

        let target = match var("SUPABASE_URL").or_else(|| var("DATABASE_URL")) {
            Some(url) => Some(DatabaseTarget::Url(url)),
            None => match var("SUPABASE_HOST") {
                Some(host) => Some(DatabaseTarget::Params(DatabaseParams {
                    host,
                    port: parse_or("SUPABASE_PORT", var("SUPABASE_PORT"), DEFAULT_DATABASE_PORT)?,
                    user: var("SUPABASE_USER"),
                    password: var("SUPABASE_PASSWORD"),
                    database: var("SUPABASE_DATABASE")
                        .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
                })),
                None => None,
            },
        };

        let database = DatabaseConfig {
            target,
            connect_timeout: Duration::from_secs(parse_or(
                "DB_CONNECT_TIMEOUT",
                var("DB_CONNECT_TIMEOUT"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
        };

        let symbols = match var("SYMBOLS") {
            Some(list) => parse_symbols(&list),
            None => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        };

        let window_days = parse_or("CUTOFF_DAYS", var("CUTOFF_DAYS"), DEFAULT_WINDOW_DAYS)?;

        Ok(Self {
            api,
            database,
            symbols,
            window_days: Some(window_days),
            snapshot_dir: PathBuf::from(
                var("SNAPSHOT_DIR").unwrap_or_else(|| DEFAULT_SNAPSHOT_DIR.to_string()),
            ),
        })
    }

    /// Validate configuration. Which credential is required depends on the
    /// dataset, so only the absence of any key is rejected here.
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.is_empty() && self.api.movers_api_key.is_none() {
            return Err(MdpError::Config(
                "No API key configured: set API_KEY or SECOND_API".to_string(),
            ));
        }

        if self.api.base_url.is_empty() {
            return Err(MdpError::Config("API base URL cannot be empty".to_string()));
        }

        if self.symbols.is_empty() {
            return Err(MdpError::Config("At least one symbol is required".to_string()));
        }

        if self.database.target.is_none() {
            return Err(MdpError::Config(
                "No database configured: set SUPABASE_URL/DATABASE_URL or SUPABASE_HOST".to_string(),
            ));
        }

        if self.api.rate_limit_delay.is_zero() {
            tracing::warn!("Rate limit delay is 0; upstream may throttle or ban the key");
        }

        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        self.api.rate_limit_delay
    }
}

/// Split a comma/whitespace separated symbol list, uppercased and deduplicated
pub fn parse_symbols(list: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in list.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
        let symbol = symbol.to_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn parse_or<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| MdpError::invalid_var(name, &raw, "a non-negative integer")),
        None => Ok(default),
    }
}
