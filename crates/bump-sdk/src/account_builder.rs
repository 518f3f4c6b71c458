//! Same-nonce replacement builder for account chains.
//!
//! Nodes keep one transaction per sender and nonce, so a transaction at the
//! original nonce with a higher gas price evicts the original. A cancel is a
//! zero-value transfer to the sender itself.

use std::str::FromStr;

use alloy::consensus::{TxEip1559, TxLegacy};
use alloy::primitives::{Address, Bytes, TxKind, U256};
use bump_core::{AccountChain, PendingTransaction, ReplacementMode};
use tracing::info;

use crate::errors::{ReplacementError, Result};

pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
/// Used for contract calls whose record carries no gas limit.
pub const CALL_GAS_LIMIT: u64 = 65_000;

const PRIORITY_FEE_FLOOR_WEI: u128 = 2_500_000_000;
const PRIORITY_FEE_SHARE_PERCENT: u128 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum AccountTx {
    Legacy(TxLegacy),
    Eip1559(TxEip1559),
}

impl AccountTx {
    pub fn nonce(&self) -> u64 {
        match self {
            AccountTx::Legacy(tx) => tx.nonce,
            AccountTx::Eip1559(tx) => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            AccountTx::Legacy(tx) => tx.gas_limit,
            AccountTx::Eip1559(tx) => tx.gas_limit,
        }
    }

    /// Gas price for legacy, max fee per gas for EIP-1559.
    pub fn fee_rate(&self) -> u128 {
        match self {
            AccountTx::Legacy(tx) => tx.gas_price,
            AccountTx::Eip1559(tx) => tx.max_fee_per_gas,
        }
    }

    pub fn priority_fee(&self) -> Option<u128> {
        match self {
            AccountTx::Legacy(_) => None,
            AccountTx::Eip1559(tx) => Some(tx.max_priority_fee_per_gas),
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            AccountTx::Legacy(tx) => tx.value,
            AccountTx::Eip1559(tx) => tx.value,
        }
    }

    pub fn to(&self) -> TxKind {
        match self {
            AccountTx::Legacy(tx) => tx.to,
            AccountTx::Eip1559(tx) => tx.to,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedAccountReplacement {
    pub chain: AccountChain,
    pub tx: AccountTx,
    /// Upper bound of what the replacement can cost, `gas_limit * fee_rate`.
    pub max_fee_wei: u128,
}

#[derive(Debug, Clone)]
pub struct AccountReplacementBuilder {
    min_bump_percent: u8,
}

impl AccountReplacementBuilder {
    pub fn new(min_bump_percent: u8) -> Self {
        Self { min_bump_percent }
    }

    /// Tip for an EIP-1559 replacement at `max_fee`: a tenth of the max fee
    /// with a 2.5 gwei floor, bumped like the max fee when the original tip
    /// is known, never above the max fee itself.
    pub fn priority_fee(&self, max_fee: u128, original_priority_fee: Option<u128>) -> u128 {
        let share = max_fee.saturating_mul(PRIORITY_FEE_SHARE_PERCENT) / 100;
        let mut tip = share.max(PRIORITY_FEE_FLOOR_WEI);
        if let Some(original) = original_priority_fee {
            let bumped = original
                .saturating_mul(100 + self.min_bump_percent as u128)
                .div_ceil(100);
            tip = tip.max(bumped);
        }
        tip.min(max_fee)
    }

    pub fn build(
        &self,
        pending: &PendingTransaction,
        chain: AccountChain,
        fee_rate: u128,
        mode: ReplacementMode,
        wallet_address: &str,
    ) -> Result<UnsignedAccountReplacement> {
        let nonce = pending.nonce.ok_or_else(|| ReplacementError::NotReplaceable {
            txid: pending.id.clone(),
            reason: "missing the nonce of the original".to_string(),
        })?;
        if fee_rate <= pending.original_fee_rate {
            return Err(ReplacementError::PolicyViolation {
                min: pending.original_fee_rate.saturating_add(1),
                max: fee_rate,
            });
        }

        let (to, value, input, gas_limit) = match mode {
            ReplacementMode::Cancel => (
                parse_address(wallet_address)?,
                U256::ZERO,
                Bytes::new(),
                TRANSFER_GAS_LIMIT,
            ),
            ReplacementMode::SpeedUp => {
                let input = match &pending.data {
                    Some(data) => Bytes::from_str(data).map_err(|e| {
                        ReplacementError::InvalidTransaction(format!("Bad calldata: {e}"))
                    })?,
                    None => Bytes::new(),
                };
                let default_limit = if input.is_empty() {
                    TRANSFER_GAS_LIMIT
                } else {
                    CALL_GAS_LIMIT
                };
                (
                    parse_address(&pending.recipient)?,
                    U256::from(pending.amount),
                    input,
                    pending.gas_limit.unwrap_or(default_limit),
                )
            }
        };

        let tx = if chain.supports_eip1559() {
            AccountTx::Eip1559(TxEip1559 {
                chain_id: chain.evm_chain_id(),
                nonce,
                gas_limit,
                max_fee_per_gas: fee_rate,
                max_priority_fee_per_gas: self
                    .priority_fee(fee_rate, pending.original_priority_fee),
                to: TxKind::Call(to),
                value,
                access_list: Default::default(),
                input,
            })
        } else {
            AccountTx::Legacy(TxLegacy {
                chain_id: Some(chain.evm_chain_id()),
                nonce,
                gas_price: fee_rate,
                gas_limit,
                to: TxKind::Call(to),
                value,
                input,
            })
        };

        info!(
            original = %pending.id,
            %mode,
            chain = %chain,
            nonce,
            fee_rate,
            gas_limit,
            "Built replacement transaction"
        );

        Ok(UnsignedAccountReplacement {
            chain,
            max_fee_wei: fee_rate.saturating_mul(gas_limit as u128),
            tx,
        })
    }
}

fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address)
        .map_err(|e| ReplacementError::InvalidTransaction(format!("Bad address {address}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GWEI: u128 = 1_000_000_000;
    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

    fn pending(chain: AccountChain) -> PendingTransaction {
        PendingTransaction::account("0xabc", chain, RECIPIENT, 10u128.pow(17), 20 * GWEI, 7)
    }

    fn build(
        chain: AccountChain,
        fee_rate: u128,
        mode: ReplacementMode,
    ) -> Result<UnsignedAccountReplacement> {
        AccountReplacementBuilder::new(10).build(&pending(chain), chain, fee_rate, mode, WALLET)
    }

    #[test]
    fn test_cancel_is_zero_value_self_transfer_at_same_nonce() {
        let replacement =
            build(AccountChain::Ethereum, 22 * GWEI, ReplacementMode::Cancel).unwrap();

        assert_eq!(replacement.tx.nonce(), 7);
        assert_eq!(replacement.tx.value(), U256::ZERO);
        assert_eq!(replacement.tx.gas_limit(), TRANSFER_GAS_LIMIT);
        assert_eq!(replacement.tx.to(), TxKind::Call(parse_address(WALLET).unwrap()));
        assert_eq!(replacement.tx.fee_rate(), 22 * GWEI);
        assert_eq!(replacement.max_fee_wei, 22 * GWEI * 21_000);
    }

    #[test]
    fn test_speed_up_keeps_recipient_value_and_calldata() {
        let builder = AccountReplacementBuilder::new(10);
        let original = pending(AccountChain::Polygon).with_data("0xa9059cbb");
        let replacement = builder
            .build(&original, AccountChain::Polygon, 30 * GWEI, ReplacementMode::SpeedUp, WALLET)
            .unwrap();

        let AccountTx::Eip1559(tx) = &replacement.tx else {
            panic!("polygon replacements use EIP-1559");
        };
        assert_eq!(tx.to, TxKind::Call(parse_address(RECIPIENT).unwrap()));
        assert_eq!(tx.value, U256::from(10u128.pow(17)));
        assert_eq!(tx.input, Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]));
        assert_eq!(tx.gas_limit, CALL_GAS_LIMIT);
        assert_eq!(tx.chain_id, 137);
    }

    #[test]
    fn test_bnb_uses_legacy_gas_price() {
        let replacement = build(AccountChain::Bnb, 25 * GWEI, ReplacementMode::SpeedUp).unwrap();
        assert!(matches!(
            replacement.tx,
            AccountTx::Legacy(ref tx) if tx.gas_price == 25 * GWEI && tx.chain_id == Some(56)
        ));
        assert_eq!(replacement.tx.priority_fee(), None);
    }

    #[test]
    fn test_priority_fee_rules() {
        let builder = AccountReplacementBuilder::new(10);
        // floor dominates
        assert_eq!(builder.priority_fee(10 * GWEI, None), 2_500_000_000);
        // a tenth of the max fee dominates
        assert_eq!(builder.priority_fee(100 * GWEI, None), 10 * GWEI);
        // bumped original tip dominates
        assert_eq!(builder.priority_fee(100 * GWEI, Some(20 * GWEI)), 22 * GWEI);
        // never above the max fee
        assert_eq!(builder.priority_fee(GWEI, None), GWEI);
    }

    #[test]
    fn test_fee_rate_must_exceed_original() {
        let err =
            build(AccountChain::Ethereum, 20 * GWEI, ReplacementMode::SpeedUp).unwrap_err();
        assert!(matches!(err, ReplacementError::PolicyViolation { .. }));
    }
}
