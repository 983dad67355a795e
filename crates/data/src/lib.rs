//! Adapters for the collaborators the risk engine depends on: the HTTP data
//! service (prices, reserves, balances, events) and the on-chain collateral
//! oracle.
//!
//! Both sit behind traits so the runner can be driven by in-memory fakes.
//! Every failure surfaces as [`AppError`]; transport, decode and RPC
//! failures all count as "data unavailable" for the user-day they hit.

pub mod client;
pub mod oracle;
pub mod wire;

use std::future::Future;

use chrono::NaiveDate;

use lendwatch_common::error::AppError;
use lendwatch_common::types::{
    Asset, BalanceSnapshot, LedgerEvent, LiquidationRecord, PriceObservation, ReserveConfig,
    ReserveIndexUpdate,
};

pub use client::DataServiceClient;
pub use oracle::LendingPoolOracle;

/// Read access to the historical lending-protocol data.
pub trait DataSource: Send + Sync {
    /// Every price tick observed on `day`.
    fn fetch_prices(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<PriceObservation>, AppError>> + Send;

    /// Price ticks for the inclusive day range, restricted to `assets`
    /// (all assets when empty).
    fn fetch_daily_prices(
        &self,
        assets: &[Asset],
        start: NaiveDate,
        stop: NaiveDate,
    ) -> impl Future<Output = Result<Vec<PriceObservation>, AppError>> + Send {
        async move {
            let mut all = Vec::new();
            for day in start.iter_days().take_while(|d| *d <= stop) {
                let prices = self.fetch_prices(day).await?;
                all.extend(
                    prices
                        .into_iter()
                        .filter(|p| assets.is_empty() || assets.contains(&p.asset)),
                );
            }
            Ok(all)
        }
    }

    fn fetch_reserve_configs(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ReserveConfig>, AppError>> + Send;

    fn fetch_reserve_index_updates(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ReserveIndexUpdate>, AppError>> + Send;

    /// Scaled balances at the end of `day`.
    fn fetch_user_balance_snapshot(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<BalanceSnapshot>, AppError>> + Send;

    fn fetch_user_events(
        &self,
        user: &str,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<LedgerEvent>, AppError>> + Send;

    fn fetch_liquidation_events(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<LiquidationRecord>, AppError>> + Send;
}

/// Whether a user has a reserve enabled as collateral at a given block.
pub trait CollateralOracle: Send + Sync {
    fn is_collateral_enabled(
        &self,
        user: &str,
        reserve: &ReserveConfig,
        block_number: u64,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Flags for several reserves of one user at one block, in input order.
    fn collateral_flags(
        &self,
        user: &str,
        reserves: &[&ReserveConfig],
        block_number: u64,
    ) -> impl Future<Output = Result<Vec<bool>, AppError>> + Send {
        async move {
            let mut flags = Vec::with_capacity(reserves.len());
            for reserve in reserves {
                flags.push(self.is_collateral_enabled(user, reserve, block_number).await?);
            }
            Ok(flags)
        }
    }
}
