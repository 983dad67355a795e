//! Price volatility estimation.
//!
//! Daily prices are turned into detrended log-return series, one per asset,
//! aligned on a common time axis. Assets with any gap in the window are
//! dropped, then an exponentially weighted covariance is fitted and
//! annualised into σ (diagonal) and ρ (off-diagonal).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;

use lendwatch_common::error::AppError;
use lendwatch_common::types::{Asset, PriceObservation, VolatilityEntry};

/// Estimation parameters. Defaults match the reference daily setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityConfig {
    /// Most recent return observations kept for the fit
    pub window: usize,
    /// Weight of the i-th most recent observation is `exp(-i / decay)`
    pub decay: f64,
    /// Periods per year
    pub annualization: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            window: 62,
            decay: 62.0,
            annualization: 365.0,
        }
    }
}

/// Keep, per asset and UTC calendar day, the earliest observation, ordered
/// by asset then day.
pub fn sample_daily_prices(observations: &[PriceObservation]) -> Vec<PriceObservation> {
    let mut first: BTreeMap<(&Asset, NaiveDate), &PriceObservation> = BTreeMap::new();
    for obs in observations {
        first
            .entry((&obs.asset, obs.timestamp.date_naive()))
            .and_modify(|kept| {
                if (obs.timestamp, obs.block_number) < (kept.timestamp, kept.block_number) {
                    *kept = obs;
                }
            })
            .or_insert(obs);
    }
    first.into_values().cloned().collect()
}

/// Detrended log-return series of an ordered price series.
///
/// Log prices relative to the first value are detrended by a no-intercept
/// least-squares fit against the observation index; the result is the first
/// difference of the detrended series, one element shorter than the input.
pub fn detrended_returns(prices: &[f64]) -> Vec<f64> {
    let Some(&base) = prices.first() else {
        return Vec::new();
    };

    let log: Vec<f64> = prices.iter().map(|p| (p / base).ln()).collect();
    let (sxy, sxx) = log
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sxy, sxx), (i, y)| {
            let x = i as f64;
            (sxy + x * y, sxx + x * x)
        });
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };

    let detrended: Vec<f64> = log
        .iter()
        .enumerate()
        .map(|(i, y)| y - slope * i as f64)
        .collect();
    detrended.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Return series aligned on a shared daily axis.
#[derive(Debug, Clone, Default)]
pub struct ReturnPanel {
    /// Axis, oldest first; the first price day is not part of it
    pub days: Vec<NaiveDate>,
    pub assets: Vec<Asset>,
    /// `columns[j][t]` is the return of `assets[j]` on `days[t]`
    pub columns: Vec<Vec<f64>>,
}

/// Align per-asset daily returns on the union of all price days, keeping the
/// last `window` steps. Only the last `window + 1` price days are differenced,
/// so every return spans one axis step. Assets missing a value anywhere in
/// that window are excluded.
pub fn build_return_panel(history: &[PriceObservation], window: usize) -> ReturnPanel {
    let sampled = sample_daily_prices(history);

    let all_days: BTreeSet<NaiveDate> = sampled
        .iter()
        .map(|o| o.timestamp.date_naive())
        .collect();
    let first_kept = all_days
        .iter()
        .rev()
        .take(window.saturating_add(1))
        .last()
        .copied();

    // Sampled output is ordered by (asset, day).
    let mut by_asset: BTreeMap<&Asset, Vec<&PriceObservation>> = BTreeMap::new();
    for obs in &sampled {
        if first_kept.is_some_and(|first| obs.timestamp.date_naive() >= first) {
            by_asset.entry(&obs.asset).or_default().push(obs);
        }
    }

    let axis: Vec<NaiveDate> = all_days
        .into_iter()
        .filter(|d| first_kept.is_some_and(|first| *d > first))
        .collect();

    let mut panel = ReturnPanel {
        days: axis,
        ..ReturnPanel::default()
    };

    for (asset, series) in by_asset {
        let prices: Vec<f64> = series.iter().map(|o| o.price_usd()).collect();
        let returns: HashMap<NaiveDate, f64> = series
            .iter()
            .skip(1)
            .map(|o| o.timestamp.date_naive())
            .zip(detrended_returns(&prices))
            .collect();

        let column: Vec<f64> = panel
            .days
            .iter()
            .map(|d| returns.get(d).copied().unwrap_or(f64::NAN))
            .collect();

        if column.iter().any(|r| !r.is_finite()) {
            tracing::debug!(
                asset = %asset,
                observations = series.len(),
                "Return series has gaps, asset excluded from volatility fit"
            );
            continue;
        }

        panel.assets.push(asset.clone());
        panel.columns.push(column);
    }

    panel
}

/// Exponentially weighted sample covariance of equally long columns.
///
/// The most recent observation has weight 1 and the i-th before it
/// `exp(-i / decay)`. Uses the unbiased reliability-weight normalisation
/// `sum(w) - sum(w^2) / sum(w)`. Returns `None` with fewer than two
/// observations.
pub fn weighted_covariance(columns: &[Vec<f64>], decay: f64) -> Option<Vec<Vec<f64>>> {
    let n_obs = columns.first().map(Vec::len)?;
    if n_obs < 2 || columns.iter().any(|c| c.len() != n_obs) {
        return None;
    }

    let weights: Vec<f64> = (0..n_obs)
        .map(|k| (-((n_obs - 1 - k) as f64) / decay).exp())
        .collect();
    let v1: f64 = weights.iter().sum();
    let v2: f64 = weights.iter().map(|w| w * w).sum();
    let norm = v1 - v2 / v1;
    if norm <= 0.0 || !norm.is_finite() {
        return None;
    }

    let centered: Vec<Vec<f64>> = columns
        .iter()
        .map(|col| {
            let mean = col.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>() / v1;
            col.iter().map(|x| x - mean).collect()
        })
        .collect();

    let n = columns.len();
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = centered[i]
                .iter()
                .zip(&centered[j])
                .zip(&weights)
                .map(|((x, y), w)| w * x * y)
                .sum::<f64>()
                / norm;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    Some(cov)
}

/// Fit the annualised volatility/correlation model from daily prices.
pub fn estimate_volatility(
    history: &[PriceObservation],
    config: &VolatilityConfig,
) -> Result<VolatilityModel, AppError> {
    let panel = build_return_panel(history, config.window);
    if panel.assets.is_empty() {
        return Err(AppError::InsufficientHistory(
            "no asset has a complete return series".to_string(),
        ));
    }

    let cov = weighted_covariance(&panel.columns, config.decay).ok_or_else(|| {
        AppError::InsufficientHistory(format!(
            "{} return observations, need at least 2",
            panel.days.len()
        ))
    })?;

    let n = panel.assets.len();
    let std: Vec<f64> = (0..n)
        .map(|i| (cov[i][i] * config.annualization).sqrt())
        .collect();

    let matrix: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        return std[i];
                    }
                    let scale = std[i] * std[j];
                    if scale > 0.0 {
                        (cov[i][j] * config.annualization / scale).clamp(-1.0, 1.0)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    tracing::info!(
        assets = n,
        observations = panel.days.len(),
        "Fitted volatility model"
    );

    VolatilityModel::from_matrix(panel.assets, matrix)
}

/// Symmetric asset matrix holding annualised σ on the diagonal and pairwise
/// correlation ρ off the diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityModel {
    assets: Vec<Asset>,
    positions: HashMap<Asset, usize>,
    matrix: Vec<Vec<f64>>,
}

impl VolatilityModel {
    pub fn from_matrix(assets: Vec<Asset>, matrix: Vec<Vec<f64>>) -> Result<Self, AppError> {
        let n = assets.len();
        if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
            return Err(AppError::Validation(format!(
                "volatility matrix must be {n}x{n}"
            )));
        }

        let positions: HashMap<Asset, usize> = assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i))
            .collect();
        if positions.len() != n {
            return Err(AppError::Validation(
                "duplicate asset in volatility matrix".to_string(),
            ));
        }

        Ok(Self {
            assets,
            positions,
            matrix,
        })
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.positions.contains_key(asset)
    }

    /// Annualised standard deviation of an asset.
    pub fn sigma(&self, asset: &Asset) -> Option<f64> {
        let i = *self.positions.get(asset)?;
        Some(self.matrix[i][i])
    }

    /// Correlation between two assets; 1 for an asset with itself.
    pub fn rho(&self, from: &Asset, to: &Asset) -> Option<f64> {
        let i = *self.positions.get(from)?;
        let j = *self.positions.get(to)?;
        Some(if i == j { 1.0 } else { self.matrix[i][j] })
    }

    /// Every ordered pair, row by row.
    pub fn entries(&self) -> Vec<VolatilityEntry> {
        self.assets
            .iter()
            .zip(&self.matrix)
            .flat_map(|(pair1, row)| {
                self.assets.iter().zip(row).map(move |(pair2, value)| VolatilityEntry {
                    pair1: pair1.clone(),
                    pair2: pair2.clone(),
                    value: *value,
                })
            })
            .collect()
    }
}
