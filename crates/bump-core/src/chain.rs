//! Chain identifiers.
//!
//! Every chain the wallet can replace transactions on is either UTXO based
//! (replace-by-fee) or account based (same-nonce replacement). Dispatch on
//! [`ChainId`] is exhaustive, so adding a chain forces every builder,
//! oracle and broadcaster to handle it.

use std::fmt;
use std::str::FromStr;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::{BumpCoreError, UnsupportedChain};

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainId {
    Utxo(UtxoChain),
    Account(AccountChain),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtxoChain {
    Bitcoin,
    BitcoinTestnet,
    BitcoinSignet,
    BitcoinRegtest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountChain {
    Ethereum,
    Sepolia,
    Bnb,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Avalanche,
}

/// Native unit a fee rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeUnit {
    SatPerVbyte,
    WeiPerGas,
}

impl fmt::Display for FeeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeUnit::SatPerVbyte => write!(f, "sat/vB"),
            FeeUnit::WeiPerGas => write!(f, "wei/gas"),
        }
    }
}

impl UtxoChain {
    pub const ALL: [UtxoChain; 4] = [
        UtxoChain::Bitcoin,
        UtxoChain::BitcoinTestnet,
        UtxoChain::BitcoinSignet,
        UtxoChain::BitcoinRegtest,
    ];

    pub fn network(&self) -> Network {
        match self {
            UtxoChain::Bitcoin => Network::Bitcoin,
            UtxoChain::BitcoinTestnet => Network::Testnet,
            UtxoChain::BitcoinSignet => Network::Signet,
            UtxoChain::BitcoinRegtest => Network::Regtest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UtxoChain::Bitcoin => "bitcoin",
            UtxoChain::BitcoinTestnet => "bitcoin-testnet",
            UtxoChain::BitcoinSignet => "bitcoin-signet",
            UtxoChain::BitcoinRegtest => "bitcoin-regtest",
        }
    }

    pub fn required_confirmations(&self) -> u32 {
        match self {
            UtxoChain::Bitcoin => 6,
            _ => 1,
        }
    }
}

impl AccountChain {
    pub const ALL: [AccountChain; 8] = [
        AccountChain::Ethereum,
        AccountChain::Sepolia,
        AccountChain::Bnb,
        AccountChain::Polygon,
        AccountChain::Arbitrum,
        AccountChain::Optimism,
        AccountChain::Base,
        AccountChain::Avalanche,
    ];

    pub fn evm_chain_id(&self) -> u64 {
        match self {
            AccountChain::Ethereum => 1,
            AccountChain::Sepolia => 11_155_111,
            AccountChain::Bnb => 56,
            AccountChain::Polygon => 137,
            AccountChain::Arbitrum => 42_161,
            AccountChain::Optimism => 10,
            AccountChain::Base => 8453,
            AccountChain::Avalanche => 43_114,
        }
    }

    pub fn from_evm_chain_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|chain| chain.evm_chain_id() == id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountChain::Ethereum => "ethereum",
            AccountChain::Sepolia => "sepolia",
            AccountChain::Bnb => "bnb",
            AccountChain::Polygon => "polygon",
            AccountChain::Arbitrum => "arbitrum",
            AccountChain::Optimism => "optimism",
            AccountChain::Base => "base",
            AccountChain::Avalanche => "avalanche",
        }
    }

    /// BSC still only accepts legacy gas-price transactions.
    pub fn supports_eip1559(&self) -> bool {
        !matches!(self, AccountChain::Bnb)
    }

    /// Gas price assumed when the network cannot be queried.
    pub fn fallback_gas_price_wei(&self) -> u128 {
        match self {
            AccountChain::Ethereum => 30 * GWEI,
            AccountChain::Sepolia => 5 * GWEI,
            AccountChain::Bnb => 3 * GWEI,
            AccountChain::Polygon => 50 * GWEI,
            AccountChain::Arbitrum
            | AccountChain::Optimism
            | AccountChain::Base
            | AccountChain::Avalanche => GWEI,
        }
    }

    pub fn required_confirmations(&self) -> u32 {
        match self {
            AccountChain::Ethereum | AccountChain::Bnb => 12,
            _ => 1,
        }
    }
}

impl ChainId {
    pub fn fee_unit(&self) -> FeeUnit {
        match self {
            ChainId::Utxo(_) => FeeUnit::SatPerVbyte,
            ChainId::Account(_) => FeeUnit::WeiPerGas,
        }
    }

    pub fn is_utxo(&self) -> bool {
        matches!(self, ChainId::Utxo(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Utxo(chain) => chain.name(),
            ChainId::Account(chain) => chain.name(),
        }
    }

    pub fn required_confirmations(&self) -> u32 {
        match self {
            ChainId::Utxo(chain) => chain.required_confirmations(),
            ChainId::Account(chain) => chain.required_confirmations(),
        }
    }
}

impl From<UtxoChain> for ChainId {
    fn from(chain: UtxoChain) -> Self {
        ChainId::Utxo(chain)
    }
}

impl From<AccountChain> for ChainId {
    fn from(chain: AccountChain) -> Self {
        ChainId::Account(chain)
    }
}

impl fmt::Display for UtxoChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for AccountChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainId {
    type Err = BumpCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();

        // "evm:<id>" addresses account chains by their numeric id
        if let Some(id) = normalized.strip_prefix("evm:") {
            return id
                .parse::<u64>()
                .ok()
                .and_then(AccountChain::from_evm_chain_id)
                .map(ChainId::Account)
                .ok_or_else(|| UnsupportedChain { chain: s }.build());
        }

        let chain = match normalized.as_str() {
            "btc" => ChainId::Utxo(UtxoChain::Bitcoin),
            "eth" => ChainId::Account(AccountChain::Ethereum),
            "bsc" => ChainId::Account(AccountChain::Bnb),
            other => UtxoChain::ALL
                .into_iter()
                .find(|chain| chain.name() == other)
                .map(ChainId::Utxo)
                .or_else(|| {
                    AccountChain::ALL
                        .into_iter()
                        .find(|chain| chain.name() == other)
                        .map(ChainId::Account)
                })
                .ok_or_else(|| UnsupportedChain { chain: s }.build())?,
        };
        Ok(chain)
    }
}

impl TryFrom<String> for ChainId {
    type Error = BumpCoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainId> for String {
    fn from(chain: ChainId) -> Self {
        chain.to_string()
    }
}
