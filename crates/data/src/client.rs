//! HTTP client for the lending-data service.
//!
//! Every endpoint takes a `date` query parameter in `YYYY-Mon-DD` form and
//! returns a JSON array of rows (see [`crate::wire`]).

use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use lendwatch_common::error::AppError;
use lendwatch_common::types::{
    BalanceSnapshot, LedgerEvent, LiquidationRecord, PriceObservation, ReserveConfig,
    ReserveIndexUpdate,
};

use crate::DataSource;
use crate::wire::{
    BalanceRow, LiquidationRow, PriceRow, ReserveIndexRow, ReserveRow, UserEventRow,
};

const PRICES_PATH: &str = "/prices";
const RESERVES_PATH: &str = "/reserves";
const RESERVE_INDEXES_PATH: &str = "/reserves/index-updates";
const USER_BALANCES_PATH: &str = "/user-selec-balances";
const USER_EVENTS_PATH: &str = "/events/user";
const LIQUIDATIONS_PATH: &str = "/events/liquidation";

/// Date key expected by the service, e.g. `2023-Jan-27`.
pub fn date_key(day: NaiveDate) -> String {
    day.format("%Y-%b-%d").to_string()
}

#[derive(Debug, Clone)]
pub struct DataServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl DataServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, AppError> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::DataUnavailable(format!("GET {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::DataUnavailable(format!(
                "GET {path} returned {status}"
            )));
        }

        let rows: Vec<T> = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("GET {path}: {e}")))?;

        tracing::debug!(path, rows = rows.len(), "Fetched rows from data service");
        Ok(rows)
    }
}

/// Convert wire rows, failing on the first row that does not decode.
fn convert<W, T>(rows: Vec<W>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<W, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

impl DataSource for DataServiceClient {
    async fn fetch_prices(&self, day: NaiveDate) -> Result<Vec<PriceObservation>, AppError> {
        let rows: Vec<PriceRow> = self
            .get_rows(PRICES_PATH, &[("date", date_key(day))])
            .await?;
        convert(rows)
    }

    async fn fetch_reserve_configs(&self, day: NaiveDate) -> Result<Vec<ReserveConfig>, AppError> {
        let rows: Vec<ReserveRow> = self
            .get_rows(RESERVES_PATH, &[("date", date_key(day))])
            .await?;
        convert(rows)
    }

    async fn fetch_reserve_index_updates(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<ReserveIndexUpdate>, AppError> {
        let rows: Vec<ReserveIndexRow> = self
            .get_rows(RESERVE_INDEXES_PATH, &[("date", date_key(day))])
            .await?;
        Ok(rows.into_iter().map(ReserveIndexUpdate::from).collect())
    }

    async fn fetch_user_balance_snapshot(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> Result<Vec<BalanceSnapshot>, AppError> {
        let rows: Vec<BalanceRow> = self
            .get_rows(
                USER_BALANCES_PATH,
                &[("date", date_key(day)), ("user", user.to_string())],
            )
            .await?;
        Ok(rows.into_iter().map(BalanceSnapshot::from).collect())
    }

    async fn fetch_user_events(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> Result<Vec<LedgerEvent>, AppError> {
        let rows: Vec<UserEventRow> = self
            .get_rows(
                USER_EVENTS_PATH,
                &[("date", date_key(day)), ("user", user.to_string())],
            )
            .await?;
        convert(rows)
    }

    async fn fetch_liquidation_events(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<LiquidationRecord>, AppError> {
        let rows: Vec<LiquidationRow> = self
            .get_rows(LIQUIDATIONS_PATH, &[("date", date_key(day))])
            .await?;
        convert(rows)
    }
}
