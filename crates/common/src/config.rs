use chrono::NaiveDate;
use serde::Deserialize;

/// Aave v2 LendingPool on Ethereum mainnet.
pub const DEFAULT_LENDING_POOL_ADDRESS: &str = "0x7d2768dE32b0b80b7a3454c06BdAc94A69DDc7A9";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the lending-protocol data service
    pub data_api_url: String,

    /// JSON-RPC endpoint used for collateral-flag lookups
    pub eth_rpc_url: String,

    /// Lending pool contract holding the user configuration bitmaps
    pub lending_pool_address: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// First day to process (inclusive)
    pub start_date: NaiveDate,

    /// Last day to process (inclusive)
    pub stop_date: NaiveDate,

    /// Number of days of daily prices fed to the volatility fit (default: 62)
    pub vol_estimation_days: u32,

    /// Decay constant of the exponential observation weights (default: 62)
    pub vol_decay: f64,

    /// Periods per year used to annualise variance (default: 365)
    pub annualization_factor: f64,

    /// Trajectory step in years (default: 1/365)
    pub delta_t: f64,

    /// Maximum number of user-day tasks running at once (default: 8)
    pub worker_concurrency: usize,

    /// Data-service request timeout in seconds (default: 30)
    pub http_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            data_api_url: std::env::var("DATA_API_URL")
                .unwrap_or_else(|_| "https://aavedata.lab.groupe-genes.fr".to_string()),
            eth_rpc_url: std::env::var("ETH_RPC_URL")
                .map_err(|_| anyhow::anyhow!("ETH_RPC_URL environment variable is required"))?,
            lending_pool_address: std::env::var("LENDING_POOL_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_LENDING_POOL_ADDRESS.to_string()),
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            start_date: parse_date_var("START_DATE")?,
            stop_date: parse_date_var("STOP_DATE")?,
            vol_estimation_days: std::env::var("VOL_ESTIMATION_DAYS")
                .unwrap_or_else(|_| "62".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("VOL_ESTIMATION_DAYS must be a valid u32"))?,
            vol_decay: std::env::var("VOL_DECAY")
                .unwrap_or_else(|_| "62".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("VOL_DECAY must be a valid f64"))?,
            annualization_factor: std::env::var("ANNUALIZATION_FACTOR")
                .unwrap_or_else(|_| "365".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ANNUALIZATION_FACTOR must be a valid f64"))?,
            delta_t: match std::env::var("DELTA_T") {
                Ok(raw) => parse_fraction(&raw)
                    .ok_or_else(|| anyhow::anyhow!("DELTA_T must be a number or a fraction like 1/365"))?,
                Err(_) => 1.0 / 365.0,
            },
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_CONCURRENCY must be a valid usize"))?,
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stop_date < self.start_date {
            anyhow::bail!(
                "STOP_DATE ({}) is before START_DATE ({})",
                self.stop_date,
                self.start_date
            );
        }
        if self.vol_estimation_days < 2 {
            anyhow::bail!("VOL_ESTIMATION_DAYS must be at least 2");
        }
        if self.vol_decay.is_nan() || self.vol_decay <= 0.0 {
            anyhow::bail!("VOL_DECAY must be positive");
        }
        if self.delta_t.is_nan() || self.delta_t <= 0.0 {
            anyhow::bail!("DELTA_T must be positive");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        Ok(())
    }

    /// Days in the configured range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start_date
            .iter_days()
            .take_while(move |day| *day <= self.stop_date)
    }
}

fn parse_date_var(name: &str) -> anyhow::Result<NaiveDate> {
    let raw = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{name} environment variable is required"))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("{name} must be a date formatted YYYY-MM-DD"))
}

/// Parse `0.0027` or `1/365`.
fn parse_fraction(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then_some(num / den)
        }
        None => raw.trim().parse().ok(),
    }
}
