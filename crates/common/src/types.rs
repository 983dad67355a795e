use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-point scale of ray-valued interest indexes (27 decimals).
pub const RAY: f64 = 1e27;

/// Fixed-point scale of oracle prices (8 decimals).
pub const PRICE_SCALE: f64 = 1e8;

/// Basis-point denominator for thresholds, bonuses and fees.
pub const BPS: f64 = 1e4;

/// Underlying asset identifier (lowercased contract address).
///
/// Used as the join key between prices, reserves, balances and events, so two
/// spellings of the same checksummed address always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Asset(String);

impl Asset {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Asset {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Asset {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Asset> for String {
    fn from(value: Asset) -> Self {
        value.0
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One on-chain oracle price update for an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub asset: Asset,
    /// Token symbol (e.g., "WETH")
    pub name: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    /// USD price, 8-decimal fixed point
    pub price: u128,
    /// Token decimals
    pub decimals: u32,
}

impl PriceObservation {
    /// Price as a float with the fixed-point scale removed.
    pub fn price_usd(&self) -> f64 {
        self.price as f64 / PRICE_SCALE
    }

    /// USD value of a raw token amount at this price.
    pub fn to_usd(&self, amount: f64) -> f64 {
        amount / 10f64.powi(self.decimals as i32) * self.price as f64 * 1e-8
    }
}

/// Day-level reserve configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveConfig {
    pub asset: Asset,
    pub name: String,
    /// Liquidation threshold in basis points
    pub liquidation_threshold_bps: u32,
    /// Ray-scaled supply index
    pub liquidity_index: u128,
    /// Ray-scaled variable borrow index
    pub variable_borrow_index: u128,
    /// Reserve id in the pool's user-configuration bitmap
    pub reserve_id: Option<u16>,
}

impl ReserveConfig {
    /// Liquidation threshold as a fraction.
    pub fn liquidation_threshold(&self) -> f64 {
        f64::from(self.liquidation_threshold_bps) / BPS
    }
}

/// Intra-day index snapshot for a reserve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveIndexUpdate {
    pub asset: Asset,
    pub block_number: u64,
    pub liquidity_index: u128,
    pub variable_borrow_index: u128,
}

/// A user's scaled (index-independent) balances at a day boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub asset: Asset,
    pub scaled_a_token_balance: u128,
    pub scaled_variable_debt: u128,
}

/// Balance-affecting action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Supply,
    Borrow,
    Withdraw,
    Repay,
    /// Outgoing a-token transfer (scaled units)
    TransferSend,
    /// Incoming a-token transfer (scaled units)
    TransferReceive,
}

impl LedgerAction {
    /// Whether the amount is denominated in scaled units and must be grown
    /// by the liquidity index before being applied.
    pub fn is_scaled(&self) -> bool {
        matches!(self, LedgerAction::TransferSend | LedgerAction::TransferReceive)
    }
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerAction::Supply => write!(f, "supply"),
            LedgerAction::Borrow => write!(f, "borrow"),
            LedgerAction::Withdraw => write!(f, "withdraw"),
            LedgerAction::Repay => write!(f, "repay"),
            LedgerAction::TransferSend => write!(f, "transfer_send"),
            LedgerAction::TransferReceive => write!(f, "transfer_receive"),
        }
    }
}

/// A balance-affecting event in a user's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_number: u64,
    pub asset: Asset,
    pub action: LedgerAction,
    /// Raw token units (scaled units for transfers)
    pub amount: f64,
}

/// A liquidation call as emitted by the lending pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Liquidated borrower
    pub user: String,
    pub collateral_asset: Asset,
    pub debt_asset: Asset,
    /// Collateral sent to the liquidator, raw units
    pub liquidated_collateral_amount: f64,
    /// Debt repaid by the liquidator, raw units
    pub debt_to_cover: f64,
    /// Liquidation bonus in basis points (10500 = 5% bonus)
    pub liquidation_bonus_bps: u32,
    /// Protocol share of the bonus in basis points
    pub liquidation_protocol_fee_bps: u32,
}

/// Absolute balances of one asset at one price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedBalance {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub name: String,
    pub current_a_token_balance: f64,
    pub current_variable_debt: f64,
    pub current_a_token_balance_usd: f64,
    pub current_variable_debt_usd: f64,
}

/// Balance row weighted for risk aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBalanceRow {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub name: String,
    pub collateral_enabled: bool,
    pub current_a_token_balance_usd: f64,
    pub current_variable_debt_usd: f64,
    /// Liquidation threshold as a fraction
    pub reserve_liquidation_threshold: f64,
    /// Signed USD risk quantity
    pub a: f64,
}

/// Liquidation risk at one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTrajectoryPoint {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    /// NaN when the aggregate variance is degenerate
    pub liquidation_probability_p1: f64,
    pub liquidation_probability_p2: f64,
    /// +inf when the user has no debt
    pub health_factor: f64,
    /// Assets left out of the probability for lack of a volatility estimate
    pub excluded_assets: usize,
}

/// A trajectory point tagged with its user, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTrajectoryRow {
    pub user: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub liquidation_probability_p1: f64,
    pub liquidation_probability_p2: f64,
    pub health_factor: f64,
}

impl UserTrajectoryRow {
    pub fn from_point(user: &str, point: &RiskTrajectoryPoint) -> Self {
        Self {
            user: user.to_string(),
            block_number: point.block_number,
            timestamp: point.timestamp,
            liquidation_probability_p1: point.liquidation_probability_p1,
            liquidation_probability_p2: point.liquidation_probability_p2,
            health_factor: point.health_factor,
        }
    }
}

/// One cell of the fitted volatility matrix, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityEntry {
    pub pair1: Asset,
    pub pair2: Asset,
    /// σ when `pair1 == pair2`, ρ otherwise
    pub value: f64,
}
