//! Row shapes served by the data service, and their conversion into the
//! typed model.
//!
//! Field names follow the service's JSON exactly. Large integers (balances,
//! ray indexes, prices) may arrive as strings or numbers.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, de::Error};

use lendwatch_common::error::AppError;
use lendwatch_common::serde_utils::{f64_lenient, u64_lenient, u128_lenient};
use lendwatch_common::types::{
    Asset, BalanceSnapshot, LedgerAction, LedgerEvent, LiquidationRecord, PriceObservation,
    ReserveConfig, ReserveIndexUpdate,
};

/// `/prices` row.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceRow {
    #[serde(rename = "UnderlyingToken")]
    pub underlying_token: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "BlockNumber", deserialize_with = "u64_lenient")]
    pub block_number: u64,
    #[serde(rename = "Timestamp", deserialize_with = "timestamp_lenient")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Price", deserialize_with = "u128_lenient")]
    pub price: u128,
    #[serde(deserialize_with = "u64_lenient")]
    pub decimals: u64,
}

impl TryFrom<PriceRow> for PriceObservation {
    type Error = AppError;

    fn try_from(row: PriceRow) -> Result<Self, Self::Error> {
        let decimals = u32::try_from(row.decimals).map_err(|_| {
            AppError::Decode(format!(
                "{}: decimals {} out of range",
                row.underlying_token, row.decimals
            ))
        })?;
        let asset = Asset::new(&row.underlying_token);
        Ok(PriceObservation {
            name: row.name.unwrap_or_else(|| asset.to_string()),
            asset,
            block_number: row.block_number,
            timestamp: row.timestamp,
            price: row.price,
            decimals,
        })
    }
}

/// `/reserves` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRow {
    pub underlying_asset: String,
    #[serde(default, alias = "symbol")]
    pub name: Option<String>,
    #[serde(deserialize_with = "u64_lenient")]
    pub reserve_liquidation_threshold: u64,
    #[serde(deserialize_with = "u128_lenient")]
    pub liquidity_index: u128,
    #[serde(deserialize_with = "u128_lenient")]
    pub variable_borrow_index: u128,
    #[serde(default)]
    pub id: Option<u16>,
}

impl TryFrom<ReserveRow> for ReserveConfig {
    type Error = AppError;

    fn try_from(row: ReserveRow) -> Result<Self, Self::Error> {
        let liquidation_threshold_bps =
            u32::try_from(row.reserve_liquidation_threshold).map_err(|_| {
                AppError::Decode(format!(
                    "{}: liquidation threshold {} out of range",
                    row.underlying_asset, row.reserve_liquidation_threshold
                ))
            })?;
        let asset = Asset::new(&row.underlying_asset);
        Ok(ReserveConfig {
            name: row.name.unwrap_or_else(|| asset.to_string()),
            asset,
            liquidation_threshold_bps,
            liquidity_index: row.liquidity_index,
            variable_borrow_index: row.variable_borrow_index,
            reserve_id: row.id,
        })
    }
}

/// `/reserves/index-updates` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveIndexRow {
    pub underlying_asset: String,
    #[serde(deserialize_with = "u64_lenient")]
    pub block_number: u64,
    #[serde(deserialize_with = "u128_lenient")]
    pub liquidity_index: u128,
    #[serde(deserialize_with = "u128_lenient")]
    pub variable_borrow_index: u128,
}

impl From<ReserveIndexRow> for ReserveIndexUpdate {
    fn from(row: ReserveIndexRow) -> Self {
        ReserveIndexUpdate {
            asset: Asset::new(&row.underlying_asset),
            block_number: row.block_number,
            liquidity_index: row.liquidity_index,
            variable_borrow_index: row.variable_borrow_index,
        }
    }
}

/// `/user-selec-balances` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRow {
    pub underlying_asset: String,
    #[serde(rename = "user_address", default)]
    pub user_address: Option<String>,
    #[serde(deserialize_with = "u128_lenient")]
    pub scaled_a_token_balance: u128,
    #[serde(deserialize_with = "u128_lenient")]
    pub scaled_variable_debt: u128,
}

impl From<BalanceRow> for BalanceSnapshot {
    fn from(row: BalanceRow) -> Self {
        BalanceSnapshot {
            asset: Asset::new(&row.underlying_asset),
            scaled_a_token_balance: row.scaled_a_token_balance,
            scaled_variable_debt: row.scaled_variable_debt,
        }
    }
}

/// `/events/user` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventRow {
    #[serde(deserialize_with = "u64_lenient")]
    pub block_number: u64,
    #[serde(alias = "reserve")]
    pub underlying_asset: String,
    pub action: String,
    #[serde(deserialize_with = "f64_lenient")]
    pub amount: f64,
}

impl TryFrom<UserEventRow> for LedgerEvent {
    type Error = AppError;

    fn try_from(row: UserEventRow) -> Result<Self, Self::Error> {
        Ok(LedgerEvent {
            block_number: row.block_number,
            asset: Asset::new(&row.underlying_asset),
            action: parse_action(&row.action)?,
            amount: row.amount,
        })
    }
}

/// `/events/liquidation` row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationRow {
    #[serde(alias = "transactionHash")]
    pub tx_hash: String,
    #[serde(deserialize_with = "u64_lenient")]
    pub log_index: u64,
    #[serde(deserialize_with = "u64_lenient")]
    pub block_number: u64,
    pub user: String,
    pub collateral_asset: String,
    pub debt_asset: String,
    #[serde(deserialize_with = "f64_lenient")]
    pub liquidated_collateral_amount: f64,
    #[serde(deserialize_with = "f64_lenient")]
    pub debt_to_cover: f64,
    #[serde(deserialize_with = "u64_lenient")]
    pub liquidation_bonus: u64,
    #[serde(default, deserialize_with = "u64_lenient")]
    pub liquidation_protocol_fee: u64,
}

impl TryFrom<LiquidationRow> for LiquidationRecord {
    type Error = AppError;

    fn try_from(row: LiquidationRow) -> Result<Self, Self::Error> {
        let bps = |value: u64, field: &str| {
            u32::try_from(value).map_err(|_| {
                AppError::Decode(format!("{}: {field} {value} out of range", row.tx_hash))
            })
        };
        let liquidation_bonus_bps = bps(row.liquidation_bonus, "liquidationBonus")?;
        let liquidation_protocol_fee_bps =
            bps(row.liquidation_protocol_fee, "liquidationProtocolFee")?;

        Ok(LiquidationRecord {
            tx_hash: row.tx_hash,
            log_index: row.log_index,
            block_number: row.block_number,
            user: row.user,
            collateral_asset: Asset::new(&row.collateral_asset),
            debt_asset: Asset::new(&row.debt_asset),
            liquidated_collateral_amount: row.liquidated_collateral_amount,
            debt_to_cover: row.debt_to_cover,
            liquidation_bonus_bps,
            liquidation_protocol_fee_bps,
        })
    }
}

/// Map the service's action labels onto ledger actions.
pub fn parse_action(label: &str) -> Result<LedgerAction, AppError> {
    let action = match label.trim().to_ascii_lowercase().as_str() {
        "supply" | "deposit" => LedgerAction::Supply,
        "borrow" => LedgerAction::Borrow,
        "withdraw" | "redeemunderlying" => LedgerAction::Withdraw,
        "repay" => LedgerAction::Repay,
        "transfer_send" | "transfersend" | "send" => LedgerAction::TransferSend,
        "transfer_receive" | "transferreceive" | "receive" => LedgerAction::TransferReceive,
        other => return Err(AppError::Decode(format!("unknown ledger action: {other}"))),
    };
    Ok(action)
}

/// Unix seconds (number or digit string), RFC 3339, or `YYYY-MM-DD HH:MM:SS`
/// taken as UTC.
fn timestamp_lenient<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => return Err(D::Error::custom(format!("invalid timestamp: {other}"))),
    };

    if let Ok(secs) = text.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| D::Error::custom(format!("invalid timestamp: {text}")))
}
