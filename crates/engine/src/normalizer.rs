//! Collateral/risk normalization.
//!
//! Weights reconstructed USD balances by the reserve liquidation threshold and
//! the user's collateral-enabled flag, producing the signed risk quantity
//! `a = debt - threshold * collateral * enabled` per asset and block.

use std::collections::HashMap;

use lendwatch_common::types::{Asset, NormalizedBalanceRow, ReconstructedBalance, ReserveConfig};

/// Per-asset collateral-enabled flags for one user, sampled once per day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollateralFlags {
    flags: HashMap<Asset, bool>,
}

impl CollateralFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: Asset, enabled: bool) {
        self.flags.insert(asset, enabled);
    }

    /// Unknown assets are not counted as collateral.
    pub fn is_enabled(&self, asset: &Asset) -> bool {
        self.flags.get(asset).copied().unwrap_or(false)
    }
}

impl FromIterator<(Asset, bool)> for CollateralFlags {
    fn from_iter<T: IntoIterator<Item = (Asset, bool)>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// Block at which collateral flags are sampled: the earliest block of the
/// user's reconstructed state.
pub fn collateral_query_block(balances: &[ReconstructedBalance]) -> Option<u64> {
    balances.iter().map(|b| b.block_number).min()
}

/// Signed net risk of one asset position in USD.
pub fn risk_quantity(
    debt_usd: f64,
    liquidation_threshold: f64,
    collateral_usd: f64,
    collateral_enabled: bool,
) -> f64 {
    let enabled = if collateral_enabled { 1.0 } else { 0.0 };
    debt_usd - liquidation_threshold * collateral_usd * enabled
}

/// Attach thresholds and collateral flags to reconstructed balances.
///
/// An asset without a reserve configuration gets a zero threshold: its debt
/// still counts, its collateral does not.
pub fn normalize_risk(
    balances: &[ReconstructedBalance],
    reserves: &[ReserveConfig],
    collateral: &CollateralFlags,
) -> Vec<NormalizedBalanceRow> {
    let thresholds: HashMap<&Asset, f64> = reserves
        .iter()
        .map(|r| (&r.asset, r.liquidation_threshold()))
        .collect();

    balances
        .iter()
        .map(|balance| {
            let threshold = thresholds.get(&balance.asset).copied().unwrap_or_else(|| {
                tracing::warn!(
                    asset = %balance.asset,
                    block = balance.block_number,
                    "No reserve configuration, liquidation threshold taken as 0"
                );
                0.0
            });
            let enabled = collateral.is_enabled(&balance.asset);

            NormalizedBalanceRow {
                block_number: balance.block_number,
                timestamp: balance.timestamp,
                asset: balance.asset.clone(),
                name: balance.name.clone(),
                collateral_enabled: enabled,
                current_a_token_balance_usd: balance.current_a_token_balance_usd,
                current_variable_debt_usd: balance.current_variable_debt_usd,
                reserve_liquidation_threshold: threshold,
                a: risk_quantity(
                    balance.current_variable_debt_usd,
                    threshold,
                    balance.current_a_token_balance_usd,
                    enabled,
                ),
            }
        })
        .collect()
}
