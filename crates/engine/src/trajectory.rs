//! Liquidation-risk trajectory.
//!
//! For every block the per-asset risk quantities `a` are aggregated into
//! `S = sum(a)` and the quadratic form `aᵗ Σ a · Δt`, where Σ is the annualised
//! covariance built from the volatility model. The first liquidation
//! probability estimate is `Φ(S / sqrt(aᵗ Σ a · Δt))`; the second doubles it,
//! capped at 1.
//!
//! Assets with no entry in the volatility model are excluded from both `S`
//! and the quadratic form. They still count in the health factor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use lendwatch_common::types::{NormalizedBalanceRow, RiskTrajectoryPoint, UserTrajectoryRow};

use crate::stats::normal_cdf;
use crate::volatility::VolatilityModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryConfig {
    /// Horizon in years
    pub delta_t: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            delta_t: 1.0 / 365.0,
        }
    }
}

/// Outcome of the probability model for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRisk {
    /// Sum of `a` over covered assets
    pub total_risk: f64,
    /// `aᵗ Σ a · Δt` over covered assets
    pub variance: f64,
    /// NaN when `variance` is not strictly positive
    pub probability: f64,
    pub excluded_assets: usize,
}

/// Liquidation probability for the rows of a single block.
pub fn liquidation_probability(
    rows: &[&NormalizedBalanceRow],
    model: &VolatilityModel,
    delta_t: f64,
) -> BlockRisk {
    let (covered, excluded): (Vec<&NormalizedBalanceRow>, Vec<&NormalizedBalanceRow>) =
        rows.iter().copied().partition(|r| model.contains(&r.asset));

    for row in &excluded {
        tracing::warn!(
            asset = %row.asset,
            block = row.block_number,
            a = row.a,
            "Asset missing from volatility model, excluded from liquidation probability"
        );
    }

    let total_risk: f64 = covered.iter().map(|r| r.a).sum();

    let mut variance = 0.0;
    for from in &covered {
        for to in &covered {
            let (Some(sigma_from), Some(sigma_to), Some(rho)) = (
                model.sigma(&from.asset),
                model.sigma(&to.asset),
                model.rho(&from.asset, &to.asset),
            ) else {
                continue;
            };
            variance += from.a * to.a * sigma_from * sigma_to * rho * delta_t;
        }
    }

    let probability = if variance > 0.0 && variance.is_finite() {
        normal_cdf(total_risk / variance.sqrt())
    } else {
        f64::NAN
    };

    BlockRisk {
        total_risk,
        variance,
        probability,
        excluded_assets: excluded.len(),
    }
}

/// Two-sided barrier approximation: `min(1, 2 p)`, NaN preserved.
pub fn conservative_probability(p1: f64) -> f64 {
    if p1.is_nan() { f64::NAN } else { (2.0 * p1).min(1.0) }
}

/// Threshold-weighted enabled collateral over debt; +inf without debt.
pub fn health_factor(rows: &[&NormalizedBalanceRow]) -> f64 {
    let (collateral, debt) = rows.iter().fold((0.0, 0.0), |(collateral, debt), r| {
        let enabled = if r.collateral_enabled { 1.0 } else { 0.0 };
        (
            collateral + r.current_a_token_balance_usd * r.reserve_liquidation_threshold * enabled,
            debt + r.current_variable_debt_usd,
        )
    });

    if debt == 0.0 {
        f64::INFINITY
    } else {
        collateral / debt
    }
}

/// One trajectory point per distinct (block, timestamp), in block order.
pub fn compute_trajectory(
    rows: &[NormalizedBalanceRow],
    model: &VolatilityModel,
    config: &TrajectoryConfig,
) -> Vec<RiskTrajectoryPoint> {
    let mut blocks: BTreeMap<(u64, DateTime<Utc>), Vec<&NormalizedBalanceRow>> = BTreeMap::new();
    for row in rows {
        blocks
            .entry((row.block_number, row.timestamp))
            .or_default()
            .push(row);
    }

    blocks
        .into_iter()
        .map(|((block_number, timestamp), block_rows)| {
            let risk = liquidation_probability(&block_rows, model, config.delta_t);
            RiskTrajectoryPoint {
                block_number,
                timestamp,
                liquidation_probability_p1: risk.probability,
                liquidation_probability_p2: conservative_probability(risk.probability),
                health_factor: health_factor(&block_rows),
                excluded_assets: risk.excluded_assets,
            }
        })
        .collect()
}

/// Tag a user's trajectory for persistence.
pub fn user_trajectory(user: &str, points: &[RiskTrajectoryPoint]) -> Vec<UserTrajectoryRow> {
    points
        .iter()
        .map(|p| UserTrajectoryRow::from_point(user, p))
        .collect()
}
