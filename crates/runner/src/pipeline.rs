//! Day-by-day orchestration.
//!
//! For each day the shared inputs (reserves, index updates, intraday prices,
//! the fitted volatility model, liquidation records) are fetched once and
//! frozen behind an `Arc`. Each liquidated user is then evaluated in its own
//! task, bounded by a semaphore. A failing user is logged and skipped; the
//! day's rows are collected before anything is written.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use lendwatch_common::config::AppConfig;
use lendwatch_common::error::AppError;
use lendwatch_common::types::{
    Asset, LiquidationRecord, PriceObservation, ReserveConfig, UserTrajectoryRow, VolatilityEntry,
};
use lendwatch_data::{CollateralOracle, DataSource};
use lendwatch_engine::index::IndexBook;
use lendwatch_engine::ledger::{liquidated_users, merge_liquidations, reconstruct_balances};
use lendwatch_engine::normalizer::{CollateralFlags, collateral_query_block, normalize_risk};
use lendwatch_engine::trajectory::{TrajectoryConfig, compute_trajectory, user_trajectory};
use lendwatch_engine::volatility::{VolatilityConfig, VolatilityModel, estimate_volatility};

/// Tunables of a run, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub volatility: VolatilityConfig,
    pub trajectory: TrajectoryConfig,
    /// Days of price history before the processed day fed to the fit
    pub history_days: u32,
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            volatility: VolatilityConfig::default(),
            trajectory: TrajectoryConfig::default(),
            history_days: 62,
            concurrency: 8,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            volatility: VolatilityConfig {
                window: config.vol_estimation_days as usize,
                decay: config.vol_decay,
                annualization: config.annualization_factor,
            },
            trajectory: TrajectoryConfig {
                delta_t: config.delta_t,
            },
            history_days: config.vol_estimation_days,
            concurrency: config.worker_concurrency.max(1),
        }
    }
}

/// Inputs shared by every user evaluated on one day. Read-only once built.
#[derive(Debug)]
pub struct DayContext {
    pub day: NaiveDate,
    pub reserves: Vec<ReserveConfig>,
    pub indexes: IndexBook,
    /// Intraday price ticks of `day`
    pub prices: Vec<PriceObservation>,
    pub volatility: VolatilityModel,
    pub liquidations: Vec<LiquidationRecord>,
}

impl DayContext {
    pub fn reserve(&self, asset: &Asset) -> Option<&ReserveConfig> {
        self.reserves.iter().find(|r| &r.asset == asset)
    }
}

/// Everything produced for one day, ready for the sink.
#[derive(Debug, Clone, Default)]
pub struct DayReport {
    pub day: NaiveDate,
    /// Ordered by user then block
    pub trajectories: Vec<UserTrajectoryRow>,
    pub volatility: Vec<VolatilityEntry>,
    pub users_evaluated: usize,
    pub users_failed: usize,
}

pub struct Pipeline<S, O> {
    source: Arc<S>,
    oracle: Arc<O>,
    settings: PipelineSettings,
}

impl<S, O> Pipeline<S, O>
where
    S: DataSource + 'static,
    O: CollateralOracle + 'static,
{
    pub fn new(source: S, oracle: O, settings: PipelineSettings) -> Self {
        Self {
            source: Arc::new(source),
            oracle: Arc::new(oracle),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Fetch and fit the inputs shared by all users of `day`.
    pub async fn prepare_day(&self, day: NaiveDate) -> Result<DayContext, AppError> {
        let history_start = day
            .checked_sub_days(Days::new(u64::from(self.settings.history_days)))
            .ok_or_else(|| AppError::Internal(format!("history window underflows at {day}")))?;

        let (reserves, updates, prices, history, liquidations) = tokio::try_join!(
            self.source.fetch_reserve_configs(day),
            self.source.fetch_reserve_index_updates(day),
            self.source.fetch_prices(day),
            self.source.fetch_daily_prices(&[], history_start, day),
            self.source.fetch_liquidation_events(day),
        )?;

        let volatility = estimate_volatility(&history, &self.settings.volatility)?;
        let indexes = IndexBook::new(&reserves, &updates);

        tracing::info!(
            day = %day,
            reserves = reserves.len(),
            index_updates = updates.len(),
            price_ticks = prices.len(),
            history_ticks = history.len(),
            liquidations = liquidations.len(),
            model_assets = volatility.assets().len(),
            "Prepared day inputs"
        );

        Ok(DayContext {
            day,
            reserves,
            indexes,
            prices,
            volatility,
            liquidations,
        })
    }

    /// Evaluate every user liquidated on `day`.
    ///
    /// Fails only when the shared inputs cannot be built; individual user
    /// failures are counted in the report.
    pub async fn run_day(&self, day: NaiveDate) -> Result<DayReport, AppError> {
        let context = Arc::new(self.prepare_day(day).await?);
        let users = liquidated_users(&context.liquidations);
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();

        for (first_block, user) in users {
            let source = Arc::clone(&self.source);
            let oracle = Arc::clone(&self.oracle);
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            let trajectory = self.settings.trajectory;

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        evaluate_user(
                            source.as_ref(),
                            oracle.as_ref(),
                            &context,
                            &user,
                            &trajectory,
                        )
                        .await
                    }
                    Err(e) => Err(AppError::Internal(format!("worker semaphore closed: {e}"))),
                };
                (user, first_block, result)
            });
        }

        let mut report = DayReport {
            day,
            volatility: context.volatility.entries(),
            ..DayReport::default()
        };

        while let Some(joined) = tasks.join_next().await {
            report.users_evaluated += 1;
            match joined {
                Ok((_, _, Ok(rows))) => report.trajectories.extend(rows),
                Ok((user, first_block, Err(e))) => {
                    report.users_failed += 1;
                    if e.is_data_unavailable() {
                        tracing::warn!(
                            day = %day,
                            user = %user,
                            liquidation_block = first_block,
                            error = %e,
                            "User skipped, data unavailable"
                        );
                    } else {
                        tracing::error!(
                            day = %day,
                            user = %user,
                            liquidation_block = first_block,
                            error = %e,
                            "User evaluation failed"
                        );
                    }
                }
                Err(e) => {
                    report.users_failed += 1;
                    tracing::error!(day = %day, error = %e, "User task panicked");
                }
            }
        }

        report
            .trajectories
            .sort_by(|a, b| (&a.user, a.block_number).cmp(&(&b.user, b.block_number)));

        tracing::info!(
            day = %day,
            users = report.users_evaluated,
            failed = report.users_failed,
            rows = report.trajectories.len(),
            "Day evaluated"
        );

        Ok(report)
    }
}

/// Full chain for one liquidated user: snapshot at the end of the previous
/// day, ledger replay over the day's price ticks, collateral flags,
/// normalization and trajectory.
pub async fn evaluate_user<S, O>(
    source: &S,
    oracle: &O,
    context: &DayContext,
    user: &str,
    trajectory: &TrajectoryConfig,
) -> Result<Vec<UserTrajectoryRow>, AppError>
where
    S: DataSource,
    O: CollateralOracle,
{
    let snapshot_day = context
        .day
        .pred_opt()
        .ok_or_else(|| AppError::Internal(format!("no day before {}", context.day)))?;

    let (snapshot, events) = tokio::try_join!(
        source.fetch_user_balance_snapshot(user, snapshot_day),
        source.fetch_user_events(user, context.day),
    )?;
    let events = merge_liquidations(user, events, &context.liquidations)?;

    let balances = reconstruct_balances(&snapshot, &context.prices, &events, &context.indexes);
    let Some(query_block) = collateral_query_block(&balances) else {
        tracing::debug!(user, day = %context.day, "No priced position, nothing to evaluate");
        return Ok(Vec::new());
    };

    // Assets without a reserve config never count as collateral.
    let assets: BTreeSet<&Asset> = balances.iter().map(|b| &b.asset).collect();
    let reserves: Vec<&ReserveConfig> = assets
        .into_iter()
        .filter_map(|asset| context.reserve(asset))
        .collect();
    let enabled = oracle
        .collateral_flags(user, &reserves, query_block)
        .await?;
    let flags: CollateralFlags = reserves
        .iter()
        .map(|reserve| reserve.asset.clone())
        .zip(enabled)
        .collect();

    let rows = normalize_risk(&balances, &context.reserves, &flags);
    let points = compute_trajectory(&rows, &context.volatility, trajectory);

    tracing::debug!(
        user,
        day = %context.day,
        balance_rows = balances.len(),
        points = points.len(),
        "User trajectory computed"
    );

    Ok(user_trajectory(user, &points))
}
