//! Quantitative core: balance reconstruction, volatility estimation, risk
//! normalization and liquidation-risk trajectories.
//!
//! Every function here is pure over already-fetched inputs, so user-days can
//! be evaluated concurrently without coordination.

pub mod index;
pub mod ledger;
pub mod normalizer;
pub mod stats;
pub mod trajectory;
pub mod volatility;
