use bump_core::{ChainId, PendingTransaction, ReplacementMode};

use crate::account_builder::{AccountReplacementBuilder, UnsignedAccountReplacement};
use crate::config::ReplacementConfig;
use crate::errors::{ReplacementError, Result};
use crate::utxo_builder::{UnsignedUtxoReplacement, UtxoReplacementBuilder};

/// A replacement ready for signing.
#[derive(Debug, Clone)]
pub enum UnsignedReplacement {
    Utxo(UnsignedUtxoReplacement),
    Account(UnsignedAccountReplacement),
}

impl UnsignedReplacement {
    pub fn chain(&self) -> ChainId {
        match self {
            UnsignedReplacement::Utxo(replacement) => ChainId::Utxo(replacement.chain),
            UnsignedReplacement::Account(replacement) => ChainId::Account(replacement.chain),
        }
    }

    pub fn fee_rate(&self) -> u128 {
        match self {
            UnsignedReplacement::Utxo(replacement) => replacement.fee_rate as u128,
            UnsignedReplacement::Account(replacement) => replacement.tx.fee_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReplacement {
    pub chain: ChainId,
    pub txid: String,
    pub raw_hex: String,
    pub fee_rate: u128,
}

/// Routes a build request to the builder of the transaction's chain family.
#[derive(Debug, Clone)]
pub struct ReplacementBuilder {
    utxo: UtxoReplacementBuilder,
    account: AccountReplacementBuilder,
}

impl ReplacementBuilder {
    pub fn new(utxo: UtxoReplacementBuilder, account: AccountReplacementBuilder) -> Self {
        Self { utxo, account }
    }

    pub fn from_config(config: &ReplacementConfig) -> Self {
        Self::new(
            UtxoReplacementBuilder::new(config.utxo_dust_limit)
                .with_relay_increment(config.utxo_min_relay_increment),
            AccountReplacementBuilder::new(config.account_min_bump_percent),
        )
    }

    pub fn build(
        &self,
        pending: &PendingTransaction,
        fee_rate: u128,
        mode: ReplacementMode,
        wallet_address: &str,
    ) -> Result<UnsignedReplacement> {
        match pending.chain {
            ChainId::Utxo(chain) => {
                let fee_rate = u64::try_from(fee_rate).map_err(|_| {
                    ReplacementError::InvalidTransaction(format!(
                        "Fee rate {fee_rate} sat/vB is out of range"
                    ))
                })?;
                self.utxo
                    .build(pending, chain, fee_rate, mode, wallet_address)
                    .map(UnsignedReplacement::Utxo)
            }
            ChainId::Account(chain) => self
                .account
                .build(pending, chain, fee_rate, mode, wallet_address)
                .map(UnsignedReplacement::Account),
        }
    }
}
