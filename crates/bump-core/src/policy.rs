//! Replacement fee-rate policy.
//!
//! Both replacement models reject a replacement that does not pay strictly
//! more than the original: Bitcoin nodes require the new fee rate to clear
//! the incremental relay fee, EVM nodes and relays require a minimum
//! percentage bump of the gas price at the same nonce.

use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::error::{PolicyViolation, Result};
use crate::types::{FeeRange, MempoolInfo, PendingTransaction, ReplacementMode};

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Incremental relay fee in sat/vB added on top of the original rate.
    pub utxo_min_relay_increment: u128,
    /// Minimum gas price bump, in percent of the original.
    pub account_min_bump_percent: u8,
    /// Smallest absolute gas price bump in wei.
    pub account_min_increment: u128,
    /// The maximum is `fastest_fee * max_fee_multiplier`.
    pub max_fee_multiplier: u128,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            utxo_min_relay_increment: 1,
            account_min_bump_percent: 10,
            account_min_increment: GWEI,
            max_fee_multiplier: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeeBumpPolicy {
    params: PolicyParams,
}

impl FeeBumpPolicy {
    pub fn new(params: PolicyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PolicyParams {
        &self.params
    }

    /// Smallest amount the replacement fee rate has to exceed the original by.
    pub fn minimum_increment(&self, chain: ChainId, original_fee_rate: u128) -> u128 {
        let increment = match chain {
            ChainId::Utxo(_) => self.params.utxo_min_relay_increment,
            ChainId::Account(_) => {
                let percent = original_fee_rate
                    .saturating_mul(self.params.account_min_bump_percent as u128)
                    .div_ceil(100);
                percent.max(self.params.account_min_increment)
            }
        };
        increment.max(1)
    }

    /// Computes the `[min, max]` replacement fee range and a recommended rate.
    ///
    /// Both modes replace the same transaction slot, so they share one range.
    pub fn compute_range(
        &self,
        pending: &PendingTransaction,
        mempool: &MempoolInfo,
        mode: ReplacementMode,
    ) -> Result<FeeRange> {
        let original = pending.original_fee_rate;
        let min = original.saturating_add(self.minimum_increment(pending.chain, original));
        let max = mempool
            .fastest_fee
            .saturating_mul(self.params.max_fee_multiplier);

        if min > max {
            return PolicyViolation { min, max }.fail();
        }

        Ok(FeeRange {
            min,
            max,
            recommended: mempool.half_hour_fee.clamp(min, max),
            unit: pending.chain.fee_unit(),
            mode,
        })
    }
}
