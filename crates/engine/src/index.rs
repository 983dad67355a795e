//! Reserve interest-index lookup.
//!
//! Intra-day index updates are kept sorted per asset so the snapshot closest
//! to a block is found with a binary search. Assets with no update on the
//! day fall back to the day-level reserve configuration.

use std::collections::HashMap;

use lendwatch_common::types::{Asset, RAY, ReserveConfig, ReserveIndexUpdate};

/// Liquidity and variable-borrow index pair, both ray-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveIndex {
    pub liquidity_index: u128,
    pub variable_borrow_index: u128,
}

impl ReserveIndex {
    /// Multiplier turning a scaled a-token balance into an absolute one.
    pub fn liquidity_factor(&self) -> f64 {
        self.liquidity_index as f64 / RAY
    }

    /// Multiplier turning scaled variable debt into absolute debt.
    pub fn borrow_factor(&self) -> f64 {
        self.variable_borrow_index as f64 / RAY
    }
}

/// Per-asset index history for one day.
#[derive(Debug, Clone, Default)]
pub struct IndexBook {
    day_level: HashMap<Asset, ReserveIndex>,
    /// Sorted by block number.
    updates: HashMap<Asset, Vec<(u64, ReserveIndex)>>,
}

impl IndexBook {
    pub fn new(reserves: &[ReserveConfig], updates: &[ReserveIndexUpdate]) -> Self {
        let day_level = reserves
            .iter()
            .map(|r| {
                (
                    r.asset.clone(),
                    ReserveIndex {
                        liquidity_index: r.liquidity_index,
                        variable_borrow_index: r.variable_borrow_index,
                    },
                )
            })
            .collect();

        let mut by_asset: HashMap<Asset, Vec<(u64, ReserveIndex)>> = HashMap::new();
        for update in updates {
            by_asset.entry(update.asset.clone()).or_default().push((
                update.block_number,
                ReserveIndex {
                    liquidity_index: update.liquidity_index,
                    variable_borrow_index: update.variable_borrow_index,
                },
            ));
        }
        for series in by_asset.values_mut() {
            series.sort_by_key(|(block, _)| *block);
        }

        Self {
            day_level,
            updates: by_asset,
        }
    }

    /// Index in effect for `asset` at `block_number`.
    ///
    /// Picks the update with the smallest block distance; on a tie the
    /// earlier update wins. Returns `None` only when the asset has neither
    /// updates nor a day-level configuration.
    pub fn lookup(&self, asset: &Asset, block_number: u64) -> Option<ReserveIndex> {
        self.updates
            .get(asset)
            .and_then(|series| closest(series, block_number))
            .or_else(|| self.day_level.get(asset).copied())
    }

    pub fn has_updates(&self, asset: &Asset) -> bool {
        self.updates.get(asset).is_some_and(|s| !s.is_empty())
    }
}

fn closest(series: &[(u64, ReserveIndex)], block_number: u64) -> Option<ReserveIndex> {
    let pos = series.partition_point(|(block, _)| *block < block_number);
    let before = pos.checked_sub(1).and_then(|i| series.get(i));
    let after = series.get(pos);

    match (before, after) {
        (Some((b, before_idx)), Some((a, after_idx))) => {
            if block_number - b <= a - block_number {
                Some(*before_idx)
            } else {
                Some(*after_idx)
            }
        }
        (Some((_, idx)), None) | (None, Some((_, idx))) => Some(*idx),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_RAY: u128 = 1_000_000_000_000_000_000_000_000_000;

    fn reserve(asset: &str, liquidity_index: u128) -> ReserveConfig {
        ReserveConfig {
            asset: Asset::new(asset),
            name: "TKN".to_string(),
            liquidation_threshold_bps: 8000,
            liquidity_index,
            variable_borrow_index: liquidity_index,
            reserve_id: None,
        }
    }

    fn update(asset: &str, block_number: u64, liquidity_index: u128) -> ReserveIndexUpdate {
        ReserveIndexUpdate {
            asset: Asset::new(asset),
            block_number,
            liquidity_index,
            variable_borrow_index: liquidity_index * 2,
        }
    }

    #[test]
    fn test_falls_back_to_day_level() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY)], &[]);
        let idx = book.lookup(&Asset::new("0xa"), 123).unwrap();
        assert_eq!(idx.liquidity_index, ONE_RAY);
        assert!(!book.has_updates(&Asset::new("0xa")));
    }

    #[test]
    fn test_unknown_asset() {
        let book = IndexBook::new(&[reserve("0xa", ONE_RAY)], &[]);
        assert!(book.lookup(&Asset::new("0xb"), 1).is_none());
    }

    #[test]
    fn test_picks_closest_update() {
        // Deliberately unsorted input.
        let updates = vec![update("0xa", 300, 3), update("0xa", 100, 1), update("0xa", 200, 2)];
        let book = IndexBook::new(&[reserve("0xa", 99)], &updates);
        let asset = Asset::new("0xa");

        assert_eq!(book.lookup(&asset, 50).unwrap().liquidity_index, 1);
        assert_eq!(book.lookup(&asset, 140).unwrap().liquidity_index, 1);
        assert_eq!(book.lookup(&asset, 160).unwrap().liquidity_index, 2);
        assert_eq!(book.lookup(&asset, 200).unwrap().liquidity_index, 2);
        assert_eq!(book.lookup(&asset, 1_000).unwrap().liquidity_index, 3);
        assert_eq!(book.lookup(&asset, 160).unwrap().variable_borrow_index, 4);
    }

    #[test]
    fn test_tie_prefers_earlier_update() {
        let updates = vec![update("0xa", 100, 1), update("0xa", 200, 2)];
        let book = IndexBook::new(&[], &updates);
        assert_eq!(book.lookup(&Asset::new("0xa"), 150).unwrap().liquidity_index, 1);
    }

    #[test]
    fn test_factors() {
        let idx = ReserveIndex {
            liquidity_index: ONE_RAY + ONE_RAY / 10,
            variable_borrow_index: 2 * ONE_RAY,
        };
        assert!((idx.liquidity_factor() - 1.1).abs() < 1e-12);
        assert!((idx.borrow_factor() - 2.0).abs() < 1e-12);
    }
}
