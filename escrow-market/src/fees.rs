//! Purchase fee arithmetic
//!
//! Integer-only, truncating division, with the division remainder always
//! landing in the platform fee. This is the fixed rounding rule: the
//! seller share is `total * (10000 - bps) / 10000` truncated, and the fee
//! is whatever reconstructs the total exactly, so conservation of minor
//! units holds and rounding favors the platform.

use crate::config::MAX_FEE_RATE_BPS;
use crate::error::{Error, Result};

/// Decomposition of a purchase total into fee and seller proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSplit {
    /// amount * price_per_unit
    pub total: u64,

    /// Platform fee; absorbs the truncation remainder
    pub fee: u64,

    /// total - fee
    pub seller_proceeds: u64,
}

/// Split a purchase total at the given basis-point fee rate.
pub fn settlement_split(amount: u64, price_per_unit: u64, fee_rate_bps: u64) -> Result<SettlementSplit> {
    debug_assert!(fee_rate_bps <= MAX_FEE_RATE_BPS);

    let total_wide = (amount as u128) * (price_per_unit as u128);
    let total = u64::try_from(total_wide)
        .map_err(|_| Error::PriceOverflow(format!("{amount} units at {price_per_unit}")))?;

    let seller_share_bps = (MAX_FEE_RATE_BPS - fee_rate_bps) as u128;
    let seller_proceeds = (total_wide * seller_share_bps / MAX_FEE_RATE_BPS as u128) as u64;
    let fee = total - seller_proceeds;

    Ok(SettlementSplit {
        total,
        fee,
        seller_proceeds,
    })
}
