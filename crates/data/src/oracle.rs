//! On-chain collateral oracle.
//!
//! The lending pool keeps one 256-bit configuration word per user: for the
//! reserve with id `i`, bit `2i` flags borrowing and bit `2i + 1` flags use
//! as collateral. The word is read at a historical block, so the RPC endpoint
//! must serve archive state for the days being processed.

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::BlockId;
use alloy::sol;

use lendwatch_common::error::AppError;
use lendwatch_common::types::ReserveConfig;

use crate::CollateralOracle;

sol! {
    #[sol(rpc)]
    interface ILendingPool {
        function getUserConfiguration(address user) external view returns (uint256);
    }
}

/// Whether the reserve with `reserve_id` is flagged as collateral in a user
/// configuration word.
pub fn is_collateral_bit_set(configuration: U256, reserve_id: u16) -> bool {
    let bit = 2 * usize::from(reserve_id) + 1;
    bit < 256 && configuration.bit(bit)
}

/// Collateral flags for `reserves` decoded from one configuration word.
/// Reserves without an id are taken as disabled.
pub fn collateral_flags_from_configuration(
    configuration: U256,
    reserves: &[&ReserveConfig],
) -> Vec<bool> {
    reserves
        .iter()
        .map(|reserve| {
            reserve
                .reserve_id
                .is_some_and(|id| is_collateral_bit_set(configuration, id))
        })
        .collect()
}

fn parse_user(user: &str) -> Result<Address, AppError> {
    Address::from_str(user)
        .map_err(|e| AppError::Decode(format!("invalid user address {user}: {e}")))
}

/// Reads collateral flags from the lending pool contract.
pub struct LendingPoolOracle<P> {
    provider: P,
    pool_address: Address,
}

impl<P> LendingPoolOracle<P>
where
    P: Provider + Clone,
{
    pub fn new(provider: P, pool_address: Address) -> Self {
        Self {
            provider,
            pool_address,
        }
    }

    /// The user's configuration word as of `block_number`.
    pub async fn user_configuration(
        &self,
        user: Address,
        block_number: u64,
    ) -> Result<U256, AppError> {
        let pool = ILendingPool::new(self.pool_address, self.provider.clone());
        pool.getUserConfiguration(user)
            .block(BlockId::number(block_number))
            .call()
            .await
            .map_err(|e| {
                AppError::Rpc(format!(
                    "getUserConfiguration({user}) at block {block_number}: {e}"
                ))
            })
    }
}

impl<P> CollateralOracle for LendingPoolOracle<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn is_collateral_enabled(
        &self,
        user: &str,
        reserve: &ReserveConfig,
        block_number: u64,
    ) -> Result<bool, AppError> {
        let Some(reserve_id) = reserve.reserve_id else {
            tracing::warn!(
                user,
                asset = %reserve.asset,
                "Reserve has no id, collateral taken as disabled"
            );
            return Ok(false);
        };

        let configuration = self
            .user_configuration(parse_user(user)?, block_number)
            .await?;
        let enabled = is_collateral_bit_set(configuration, reserve_id);

        tracing::debug!(
            user,
            asset = %reserve.asset,
            reserve_id,
            block = block_number,
            enabled,
            "Read collateral flag"
        );

        Ok(enabled)
    }

    async fn collateral_flags(
        &self,
        user: &str,
        reserves: &[&ReserveConfig],
        block_number: u64,
    ) -> Result<Vec<bool>, AppError> {
        if reserves.is_empty() {
            return Ok(Vec::new());
        }
        for reserve in reserves.iter().filter(|r| r.reserve_id.is_none()) {
            tracing::warn!(
                user,
                asset = %reserve.asset,
                "Reserve has no id, collateral taken as disabled"
            );
        }

        let configuration = self
            .user_configuration(parse_user(user)?, block_number)
            .await?;
        let flags = collateral_flags_from_configuration(configuration, reserves);

        tracing::debug!(
            user,
            block = block_number,
            reserves = reserves.len(),
            enabled = flags.iter().filter(|f| **f).count(),
            "Read collateral configuration"
        );

        Ok(flags)
    }
}
