//! Event ledger reconstruction.
//!
//! A user's day is replayed as a fold over `(snapshot, events)`: the scaled
//! snapshot is grown by the interest index at every price tick, and every
//! ledger event is applied to all ticks at or after its block. Nothing is
//! mutated outside the fold, so many users can be replayed in parallel.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use lendwatch_common::error::AppError;
use lendwatch_common::types::{
    Asset, BPS, BalanceSnapshot, LedgerAction, LedgerEvent, LiquidationRecord, PriceObservation,
    ReconstructedBalance,
};

use crate::index::IndexBook;

/// Expands liquidation records into synthetic ledger events, refusing to
/// expand the same record (by transaction hash and log index) twice.
#[derive(Debug, Default)]
pub struct LiquidationExpander {
    seen: HashSet<(String, u64)>,
}

impl LiquidationExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one liquidation into a collateral `withdraw` and a debt `repay`
    /// at the liquidation's block.
    pub fn expand(&mut self, record: &LiquidationRecord) -> Result<[LedgerEvent; 2], AppError> {
        let key = (record.tx_hash.to_ascii_lowercase(), record.log_index);
        if self.seen.contains(&key) {
            return Err(AppError::DuplicateLiquidation {
                tx_hash: record.tx_hash.clone(),
                log_index: record.log_index,
            });
        }

        let withdrawn = liquidation_withdraw_amount(record)?;
        self.seen.insert(key);

        Ok([
            LedgerEvent {
                block_number: record.block_number,
                asset: record.collateral_asset.clone(),
                action: LedgerAction::Withdraw,
                amount: withdrawn,
            },
            LedgerEvent {
                block_number: record.block_number,
                asset: record.debt_asset.clone(),
                action: LedgerAction::Repay,
                amount: record.debt_to_cover,
            },
        ])
    }

    /// Number of records expanded so far.
    pub fn expanded_count(&self) -> usize {
        self.seen.len()
    }
}

/// Collateral leaving the user's a-token balance in a liquidation.
///
/// The liquidator receives `collateral`; the protocol additionally keeps its
/// fee share of the bonus, `(collateral - collateral / bonus) * fee`.
pub fn liquidation_withdraw_amount(record: &LiquidationRecord) -> Result<f64, AppError> {
    if record.liquidation_bonus_bps == 0 {
        return Err(AppError::Validation(format!(
            "liquidation {}#{} has a zero liquidation bonus",
            record.tx_hash, record.log_index
        )));
    }
    let collateral = record.liquidated_collateral_amount;
    let bonus = f64::from(record.liquidation_bonus_bps) / BPS;
    let fee = f64::from(record.liquidation_protocol_fee_bps) / BPS;
    Ok(collateral + (collateral - collateral / bonus) * fee)
}

/// Merge a user's ledger events with the expansion of their liquidations,
/// ordered by block. Records belonging to other users are ignored.
pub fn merge_liquidations(
    user: &str,
    events: Vec<LedgerEvent>,
    liquidations: &[LiquidationRecord],
) -> Result<Vec<LedgerEvent>, AppError> {
    let mut expander = LiquidationExpander::new();
    let mut merged = events;

    for record in liquidations
        .iter()
        .filter(|r| r.user.eq_ignore_ascii_case(user))
    {
        merged.extend(expander.expand(record)?);
    }

    // Stable: events sharing a block keep their relative order, though the
    // replay treats them as concurrent anyway.
    merged.sort_by_key(|e| e.block_number);

    if expander.expanded_count() > 0 {
        tracing::debug!(
            user,
            liquidations = expander.expanded_count(),
            events = merged.len(),
            "Merged liquidation events into ledger"
        );
    }

    Ok(merged)
}

/// Users liquidated in `records`, with the block of their first liquidation,
/// ordered by that block. Addresses are lowercased.
pub fn liquidated_users(records: &[LiquidationRecord]) -> Vec<(u64, String)> {
    let mut first: HashMap<String, u64> = HashMap::new();
    for record in records {
        first
            .entry(record.user.to_ascii_lowercase())
            .and_modify(|block| *block = (*block).min(record.block_number))
            .or_insert(record.block_number);
    }

    let mut users: Vec<(u64, String)> = first
        .into_iter()
        .map(|(user, block)| (block, user))
        .collect();
    users.sort();
    users
}

/// Cumulative effect of the events applied so far to one asset.
#[derive(Debug, Clone, Copy, Default)]
struct LedgerDelta {
    /// Absolute a-token units (supply / withdraw)
    a_token: f64,
    /// Scaled a-token units (transfers), grown by the row's own index
    scaled_a_token: f64,
    /// Absolute debt units (borrow / repay)
    debt: f64,
}

impl LedgerDelta {
    fn apply(mut self, event: &LedgerEvent) -> Self {
        match event.action {
            LedgerAction::Supply => self.a_token += event.amount,
            LedgerAction::Withdraw => self.a_token -= event.amount,
            LedgerAction::TransferReceive => self.scaled_a_token += event.amount,
            LedgerAction::TransferSend => self.scaled_a_token -= event.amount,
            LedgerAction::Borrow => self.debt += event.amount,
            LedgerAction::Repay => self.debt -= event.amount,
        }
        self
    }
}

/// Replay a user's ledger over their day-start snapshot.
///
/// Produces one row per (asset, price tick) for every asset the user holds in
/// the snapshot or touches through an event, ordered by block then asset.
/// `events` may be unsorted. Events on an asset without price ticks, and
/// assets without any index data, are skipped with a log line.
pub fn reconstruct_balances(
    snapshot: &[BalanceSnapshot],
    prices: &[PriceObservation],
    events: &[LedgerEvent],
    indexes: &IndexBook,
) -> Vec<ReconstructedBalance> {
    let holdings: HashMap<&Asset, &BalanceSnapshot> =
        snapshot.iter().map(|s| (&s.asset, s)).collect();

    let mut events_by_asset: BTreeMap<&Asset, Vec<&LedgerEvent>> = BTreeMap::new();
    for event in events {
        events_by_asset.entry(&event.asset).or_default().push(event);
    }
    for series in events_by_asset.values_mut() {
        series.sort_by_key(|e| e.block_number);
    }

    let tracked: BTreeSet<&Asset> = holdings
        .keys()
        .copied()
        .chain(events_by_asset.keys().copied())
        .collect();

    let mut ticks_by_asset: BTreeMap<&Asset, Vec<&PriceObservation>> = BTreeMap::new();
    for tick in prices.iter().filter(|p| tracked.contains(&p.asset)) {
        ticks_by_asset.entry(&tick.asset).or_default().push(tick);
    }
    for series in ticks_by_asset.values_mut() {
        series.sort_by_key(|p| p.block_number);
    }

    for (asset, series) in &events_by_asset {
        if !ticks_by_asset.contains_key(asset) {
            tracing::debug!(
                asset = %asset,
                events = series.len(),
                "No price tick for event asset, events ignored"
            );
        }
    }

    let mut rows: Vec<ReconstructedBalance> = ticks_by_asset
        .iter()
        .flat_map(|(asset, ticks)| {
            let asset_events = events_by_asset.get(asset).map(Vec::as_slice).unwrap_or(&[]);
            replay_asset(asset, holdings.get(asset).copied(), ticks, asset_events, indexes)
        })
        .collect();

    rows.sort_by(|x, y| {
        x.block_number
            .cmp(&y.block_number)
            .then_with(|| x.asset.cmp(&y.asset))
    });
    rows
}

/// Fold one asset's sorted events over its sorted price ticks.
fn replay_asset(
    asset: &Asset,
    holding: Option<&BalanceSnapshot>,
    ticks: &[&PriceObservation],
    events: &[&LedgerEvent],
    indexes: &IndexBook,
) -> Vec<ReconstructedBalance> {
    let (scaled_a_token, scaled_debt) = holding
        .map(|h| {
            (
                h.scaled_a_token_balance as f64,
                h.scaled_variable_debt as f64,
            )
        })
        .unwrap_or((0.0, 0.0));

    if !indexes.has_updates(asset) {
        tracing::debug!(asset = %asset, "No index updates for asset, using day-level index");
    }

    ticks
        .iter()
        .scan((0usize, LedgerDelta::default()), |(cursor, delta), tick| {
            while let Some(event) = events.get(*cursor)
                && event.block_number <= tick.block_number
            {
                *delta = delta.apply(event);
                *cursor += 1;
            }
            Some((tick, *delta))
        })
        .filter_map(|(tick, delta)| {
            let Some(index) = indexes.lookup(asset, tick.block_number) else {
                tracing::warn!(
                    asset = %asset,
                    block = tick.block_number,
                    "No reserve index for asset, row skipped"
                );
                return None;
            };

            let a_token =
                (scaled_a_token + delta.scaled_a_token) * index.liquidity_factor() + delta.a_token;
            let debt = scaled_debt * index.borrow_factor() + delta.debt;

            Some(ReconstructedBalance {
                block_number: tick.block_number,
                timestamp: tick.timestamp,
                asset: asset.clone(),
                name: tick.name.clone(),
                current_a_token_balance: a_token,
                current_variable_debt: debt,
                current_a_token_balance_usd: tick.to_usd(a_token),
                current_variable_debt_usd: tick.to_usd(debt),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lendwatch_common::types::{ReserveConfig, ReserveIndexUpdate};

    const ONE_RAY: u128 = 1_000_000_000_000_000_000_000_000_000;

    fn tick(asset: &str, block_number: u64) -> PriceObservation {
        PriceObservation {
            asset: Asset::new(asset),
            name: asset.to_uppercase(),
            block_number,
            timestamp: Utc.timestamp_opt(1_674_777_600 + block_number as i64 * 12, 0).unwrap(),
            price: 100_000_000,
            decimals: 0,
        }
    }

    fn reserve(asset: &str, liquidity_index: u128, variable_borrow_index: u128) -> ReserveConfig {
        ReserveConfig {
            asset: Asset::new(asset),
            name: asset.to_uppercase(),
            liquidation_threshold_bps: 8000,
            liquidity_index,
            variable_borrow_index,
            reserve_id: Some(0),
        }
    }

    fn holding(asset: &str, a_token: u128, debt: u128) -> BalanceSnapshot {
        BalanceSnapshot {
            asset: Asset::new(asset),
            scaled_a_token_balance: a_token,
            scaled_variable_debt: debt,
        }
    }

    fn event(block_number: u64, asset: &str, action: LedgerAction, amount: f64) -> LedgerEvent {
        LedgerEvent {
            block_number,
            asset: Asset::new(asset),
            action,
            amount,
        }
    }

    fn liquidation(tx_hash: &str, log_index: u64) -> LiquidationRecord {
        LiquidationRecord {
            tx_hash: tx_hash.to_string(),
            log_index,
            block_number: 150,
            user: "0xUser".to_string(),
            collateral_asset: Asset::new("0xweth"),
            debt_asset: Asset::new("0xusdc"),
            liquidated_collateral_amount: 100.0,
            debt_to_cover: 80.0,
            liquidation_bonus_bps: 10500,
            liquidation_protocol_fee_bps: 1000,
        }
    }

    fn rows_for<'a>(
        rows: &'a [ReconstructedBalance],
        asset: &str,
    ) -> Vec<&'a ReconstructedBalance> {
        let asset = Asset::new(asset);
        rows.iter().filter(|r| r.asset == asset).collect()
    }

    #[test]
    fn test_snapshot_at_unit_index() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY, ONE_RAY)], &[]);
        let rows = reconstruct_balances(
            &[holding("0xa", 1000, 0)],
            &[tick("0xa", 100)],
            &[],
            &book,
        );
        assert_eq!(rows.len(), 1);
        assert!((rows[0].current_a_token_balance_usd - 1000.0).abs() < 1e-9);
        assert_eq!(rows[0].current_variable_debt_usd, 0.0);
    }

    #[test]
    fn test_empty_events_yield_index_grown_snapshot() {
        let updates = vec![
            ReserveIndexUpdate {
                asset: Asset::new("0xa"),
                block_number: 100,
                liquidity_index: ONE_RAY,
                variable_borrow_index: ONE_RAY,
            },
            ReserveIndexUpdate {
                asset: Asset::new("0xa"),
                block_number: 200,
                liquidity_index: ONE_RAY + ONE_RAY / 100,
                variable_borrow_index: ONE_RAY + ONE_RAY / 50,
            },
        ];
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY, ONE_RAY)], &updates);
        let rows = reconstruct_balances(
            &[holding("0xa", 1000, 500)],
            &[tick("0xa", 100), tick("0xa", 200)],
            &[],
            &book,
        );

        assert_eq!(rows.len(), 2);
        assert!((rows[0].current_a_token_balance - 1000.0).abs() < 1e-9);
        assert!((rows[0].current_variable_debt - 500.0).abs() < 1e-9);
        assert!((rows[1].current_a_token_balance - 1010.0).abs() < 1e-9);
        assert!((rows[1].current_variable_debt - 510.0).abs() < 1e-9);
    }

    #[test]
    fn test_event_applies_forward_only() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY, ONE_RAY)], &[]);
        let events = vec![
            event(150, "0xa", LedgerAction::Supply, 200.0),
            event(150, "0xa", LedgerAction::Borrow, 50.0),
        ];
        let rows = reconstruct_balances(
            &[holding("0xa", 1000, 0)],
            &[tick("0xa", 100), tick("0xa", 150), tick("0xa", 200)],
            &events,
            &book,
        );

        let balances: Vec<f64> = rows.iter().map(|r| r.current_a_token_balance).collect();
        assert_eq!(balances, vec![1000.0, 1200.0, 1200.0]);
        let debts: Vec<f64> = rows.iter().map(|r| r.current_variable_debt).collect();
        assert_eq!(debts, vec![0.0, 50.0, 50.0]);
    }

    #[test]
    fn test_no_double_application_between_events() {
        // Index grows between ticks; without an intervening event the later
        // balance differs from the earlier one by index growth only.
        let updates = vec![
            ReserveIndexUpdate {
                asset: Asset::new("0xa"),
                block_number: 200,
                liquidity_index: ONE_RAY,
                variable_borrow_index: ONE_RAY,
            },
            ReserveIndexUpdate {
                asset: Asset::new("0xa"),
                block_number: 300,
                liquidity_index: 2 * ONE_RAY,
                variable_borrow_index: ONE_RAY,
            },
        ];
        let book = IndexBook::new(&[], &updates);
        let events = vec![event(150, "0xa", LedgerAction::TransferReceive, 100.0)];
        let rows = reconstruct_balances(
            &[holding("0xa", 100, 0)],
            &[tick("0xa", 200), tick("0xa", 300)],
            &events,
            &book,
        );

        assert!((rows[0].current_a_token_balance - 200.0).abs() < 1e-9);
        assert!((rows[1].current_a_token_balance - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_transfers_scaled_by_row_index() {
        let book = IndexBook::new(&[reserve("0xa", 2 * ONE_RAY, ONE_RAY)], &[]);
        let events = vec![
            event(100, "0xa", LedgerAction::TransferReceive, 50.0),
            event(120, "0xa", LedgerAction::TransferSend, 10.0),
            event(130, "0xa", LedgerAction::Withdraw, 30.0),
        ];
        let rows = reconstruct_balances(&[], &[tick("0xa", 140)], &events, &book);

        // (50 - 10) scaled * 2 - 30 absolute
        assert_eq!(rows.len(), 1);
        assert!((rows[0].current_a_token_balance - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_repay_reduces_debt() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY, ONE_RAY)], &[]);
        let events = vec![event(110, "0xa", LedgerAction::Repay, 120.0)];
        let rows = reconstruct_balances(
            &[holding("0xa", 0, 500)],
            &[tick("0xa", 100), tick("0xa", 120)],
            &events,
            &book,
        );
        assert_eq!(rows[0].current_variable_debt, 500.0);
        assert_eq!(rows[1].current_variable_debt, 380.0);
    }

    #[test]
    fn test_event_without_price_tick_is_noop() {
        let book = IndexBook::new(
            &[reserve("0xa", ONE_RAY, ONE_RAY), reserve("0xb", ONE_RAY, ONE_RAY)],
            &[],
        );
        let events = vec![event(100, "0xb", LedgerAction::Supply, 10.0)];
        let rows = reconstruct_balances(
            &[holding("0xa", 10, 0)],
            &[tick("0xa", 100)],
            &events,
            &book,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset, Asset::new("0xa"));
        assert_eq!(rows[0].current_a_token_balance, 10.0);
    }

    #[test]
    fn test_unheld_assets_produce_no_rows() {
        let book = IndexBook::new(
            &[reserve("0xa", ONE_RAY, ONE_RAY), reserve("0xb", ONE_RAY, ONE_RAY)],
            &[],
        );
        let rows = reconstruct_balances(
            &[holding("0xa", 10, 0)],
            &[tick("0xa", 100), tick("0xb", 100)],
            &[],
            &book,
        );
        assert_eq!(rows.len(), 1);
        assert!(rows_for(&rows, "0xb").is_empty());
    }

    #[test]
    fn test_asset_without_index_is_skipped() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY, ONE_RAY)], &[]);
        let rows = reconstruct_balances(
            &[holding("0xa", 10, 0), holding("0xc", 10, 0)],
            &[tick("0xa", 100), tick("0xc", 100)],
            &[],
            &book,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asset, Asset::new("0xa"));
    }

    #[test]
    fn test_rows_ordered_by_block_then_asset() {
        let book = IndexBook::new(
            &[reserve("0xa", ONE_RAY, ONE_RAY), reserve("0xb", ONE_RAY, ONE_RAY)],
            &[],
        );
        let rows = reconstruct_balances(
            &[holding("0xb", 1, 0), holding("0xa", 1, 0)],
            &[tick("0xb", 200), tick("0xa", 200), tick("0xb", 100), tick("0xa", 100)],
            &[],
            &book,
        );
        let keys: Vec<(u64, &str)> = rows.iter().map(|r| (r.block_number, r.asset.as_str())).collect();
        assert_eq!(keys, vec![(100, "0xa"), (100, "0xb"), (200, "0xa"), (200, "0xb")]);
    }

    #[test]
    fn test_liquidation_withdraw_amount() {
        let amount = liquidation_withdraw_amount(&liquidation("0x1", 0)).unwrap();
        let expected = 100.0 + (100.0 - 100.0 / 1.05) * 0.10;
        assert!((amount - expected).abs() < 1e-12);
        assert!((amount - 100.476).abs() < 1e-3);
    }

    #[test]
    fn test_liquidation_zero_bonus_rejected() {
        let mut record = liquidation("0x1", 0);
        record.liquidation_bonus_bps = 0;
        assert!(matches!(
            liquidation_withdraw_amount(&record),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_liquidation_expands_to_withdraw_and_repay() {
        let mut expander = LiquidationExpander::new();
        let [withdraw, repay] = expander.expand(&liquidation("0x1", 3)).unwrap();

        assert_eq!(withdraw.action, LedgerAction::Withdraw);
        assert_eq!(withdraw.asset, Asset::new("0xweth"));
        assert_eq!(withdraw.block_number, 150);
        assert_eq!(repay.action, LedgerAction::Repay);
        assert_eq!(repay.asset, Asset::new("0xusdc"));
        assert_eq!(repay.amount, 80.0);
        assert_eq!(expander.expanded_count(), 1);
    }

    #[test]
    fn test_liquidation_expanded_twice_is_rejected() {
        let mut expander = LiquidationExpander::new();
        expander.expand(&liquidation("0xAB", 3)).unwrap();

        let err = expander.expand(&liquidation("0xab", 3)).unwrap_err();
        assert!(matches!(err, AppError::DuplicateLiquidation { log_index: 3, .. }));
        assert_eq!(expander.expanded_count(), 1);

        // Same transaction, different log: a distinct liquidation.
        assert!(expander.expand(&liquidation("0xab", 4)).is_ok());
    }

    #[test]
    fn test_merge_rejects_duplicate_records() {
        let records = vec![liquidation("0x1", 0), liquidation("0x1", 0)];
        let result = merge_liquidations("0xuser", Vec::new(), &records);
        assert!(matches!(result, Err(AppError::DuplicateLiquidation { .. })));
    }

    #[test]
    fn test_merge_filters_user_and_sorts() {
        let mut other = liquidation("0x2", 0);
        other.user = "0xsomeoneelse".to_string();
        let events = vec![
            event(200, "0xweth", LedgerAction::Supply, 1.0),
            event(100, "0xusdc", LedgerAction::Borrow, 1.0),
        ];

        let merged = merge_liquidations("0xUSER", events, &[liquidation("0x1", 0), other]).unwrap();

        assert_eq!(merged.len(), 4);
        let blocks: Vec<u64> = merged.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![100, 150, 150, 200]);
    }

    #[test]
    fn test_liquidated_users_first_block_ordered() {
        let mut second = liquidation("0x2", 0);
        second.block_number = 120;
        let mut other = liquidation("0x3", 0);
        other.user = "0xAAA".to_string();
        other.block_number = 130;

        let users = liquidated_users(&[liquidation("0x1", 0), second, other]);
        assert_eq!(
            users,
            vec![(120, "0xuser".to_string()), (130, "0xaaa".to_string())]
        );
        assert!(liquidated_users(&[]).is_empty());
    }

    #[test]
    fn test_liquidation_reduces_balances_after_block() {
        let book = IndexBook::new(
            &[reserve("0xweth", ONE_RAY, ONE_RAY), reserve("0xusdc", ONE_RAY, ONE_RAY)],
            &[],
        );
        let events = merge_liquidations("0xuser", Vec::new(), &[liquidation("0x1", 0)]).unwrap();
        let rows = reconstruct_balances(
            &[holding("0xweth", 1000, 0), holding("0xusdc", 0, 500)],
            &[
                tick("0xweth", 100),
                tick("0xusdc", 100),
                tick("0xweth", 200),
                tick("0xusdc", 200),
            ],
            &events,
            &book,
        );

        let weth = rows_for(&rows, "0xweth");
        let usdc = rows_for(&rows, "0xusdc");
        assert_eq!(weth[0].current_a_token_balance, 1000.0);
        assert!((weth[1].current_a_token_balance - (1000.0 - 100.476_190_476)).abs() < 1e-6);
        assert_eq!(usdc[0].current_variable_debt, 500.0);
        assert_eq!(usdc[1].current_variable_debt, 420.0);
    }
}
