use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainId, FeeUnit};
use crate::error::{InvalidRecord, NotReplaceable, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Replaced,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementMode {
    /// Redirect the funds back to the wallet.
    Cancel,
    /// Keep recipient and amount, pay a higher fee.
    SpeedUp,
}

impl fmt::Display for ReplacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementMode::Cancel => write!(f, "cancel"),
            ReplacementMode::SpeedUp => write!(f, "speed-up"),
        }
    }
}

/// Stages of a single replacement run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStage {
    Idle,
    FetchingFees,
    ComputingPolicy,
    Building,
    Signing,
    Broadcasting,
    Succeeded,
    Failed,
}

impl ReplacementStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplacementStage::Succeeded | ReplacementStage::Failed)
    }
}

/// A previous output spent by the original transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoRef {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// Hex encoded locking script of the spent output.
    pub script_pubkey: String,
}

/// A transaction the wallet broadcast that has not confirmed yet.
///
/// Amounts are in the chain's base unit (satoshis or wei) and fee rates in
/// the chain's [`FeeUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: String,
    pub chain: ChainId,
    pub recipient: String,
    pub amount: u128,
    pub original_fee_rate: u128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub utxo_refs: Vec<UtxoRef>,
    #[serde(default)]
    pub rbf_signaled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_priority_fee: Option<u128>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confirmations: u32,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
}

impl PendingTransaction {
    /// A pending UTXO-chain spend that opted into replace-by-fee.
    pub fn utxo(
        id: impl Into<String>,
        chain: crate::chain::UtxoChain,
        recipient: impl Into<String>,
        amount_sats: u64,
        fee_rate_sat_vb: u64,
        utxo_refs: Vec<UtxoRef>,
    ) -> Self {
        Self {
            id: id.into(),
            chain: ChainId::Utxo(chain),
            recipient: recipient.into(),
            amount: amount_sats as u128,
            original_fee_rate: fee_rate_sat_vb as u128,
            nonce: None,
            utxo_refs,
            rbf_signaled: true,
            change_address: None,
            data: None,
            gas_limit: None,
            original_priority_fee: None,
            timestamp: Utc::now(),
            confirmations: 0,
            status: TxStatus::Pending,
            replaces: None,
            replaced_by: None,
        }
    }

    /// A pending account-chain transfer at `nonce`.
    pub fn account(
        id: impl Into<String>,
        chain: crate::chain::AccountChain,
        recipient: impl Into<String>,
        amount_wei: u128,
        gas_price_wei: u128,
        nonce: u64,
    ) -> Self {
        Self {
            id: id.into(),
            chain: ChainId::Account(chain),
            recipient: recipient.into(),
            amount: amount_wei,
            original_fee_rate: gas_price_wei,
            nonce: Some(nonce),
            utxo_refs: Vec::new(),
            rbf_signaled: false,
            change_address: None,
            data: None,
            gas_limit: None,
            original_priority_fee: None,
            timestamp: Utc::now(),
            confirmations: 0,
            status: TxStatus::Pending,
            replaces: None,
            replaced_by: None,
        }
    }

    pub fn with_change_address(mut self, address: impl Into<String>) -> Self {
        self.change_address = Some(address.into());
        self
    }

    pub fn with_data(mut self, data_hex: impl Into<String>) -> Self {
        self.data = Some(data_hex.into());
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_priority_fee(mut self, priority_fee_wei: u128) -> Self {
        self.original_priority_fee = Some(priority_fee_wei);
        self
    }

    pub fn input_value(&self) -> u128 {
        self.utxo_refs.iter().map(|utxo| utxo.value as u128).sum()
    }

    pub fn can_speed_up(&self) -> bool {
        self.replaceability().is_ok()
    }

    /// Explains why the transaction cannot be replaced, if it cannot.
    pub fn replaceability(&self) -> Result<()> {
        let reason = if self.status != TxStatus::Pending {
            Some(format!("status is {:?}", self.status))
        } else if self.confirmations > 0 {
            Some(format!("already has {} confirmation(s)", self.confirmations))
        } else {
            match self.chain {
                ChainId::Utxo(_) if !self.rbf_signaled => {
                    Some("original does not signal replace-by-fee".to_string())
                }
                ChainId::Utxo(_) if self.utxo_refs.is_empty() => {
                    Some("missing the spent outputs of the original".to_string())
                }
                ChainId::Account(_) if self.nonce.is_none() => {
                    Some("missing the nonce of the original".to_string())
                }
                _ => None,
            }
        };

        match reason {
            Some(reason) => NotReplaceable {
                txid: self.id.clone(),
                reason,
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Checks the fields that only make sense for one chain family.
    pub fn validate(&self) -> Result<()> {
        let problem = match self.chain {
            ChainId::Utxo(_) if self.nonce.is_some() => Some("UTXO record carries a nonce"),
            ChainId::Utxo(_) if self.utxo_refs.is_empty() => Some("UTXO record has no inputs"),
            ChainId::Account(_) if self.nonce.is_none() => Some("account record has no nonce"),
            ChainId::Account(_) if !self.utxo_refs.is_empty() => {
                Some("account record carries UTXO inputs")
            }
            _ if self.id.is_empty() => Some("empty transaction id"),
            _ => None,
        };

        match problem {
            Some(reason) => InvalidRecord {
                txid: self.id.clone(),
                reason,
            }
            .fail(),
            None => Ok(()),
        }
    }
}

/// Fee tiers for one chain at `fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolInfo {
    pub chain: ChainId,
    pub fastest_fee: u128,
    pub half_hour_fee: u128,
    pub hour_fee: u128,
    pub mempool_size: u64,
    pub fetched_at: DateTime<Utc>,
    pub is_stale: bool,
    /// Derived from the original fee rate instead of the network.
    #[serde(default)]
    pub synthetic: bool,
}

impl MempoolInfo {
    pub fn new(
        chain: ChainId,
        fastest_fee: u128,
        half_hour_fee: u128,
        hour_fee: u128,
        mempool_size: u64,
    ) -> Self {
        Self {
            chain,
            fastest_fee,
            half_hour_fee,
            hour_fee,
            mempool_size,
            fetched_at: Utc::now(),
            is_stale: false,
            synthetic: false,
        }
    }

    /// Conservative tiers used when the network cannot be reached.
    ///
    /// Account chains never drop below the chain's default gas price, so a
    /// transaction sent with a stale low price still gets a usable range.
    pub fn synthetic(chain: ChainId, original_fee_rate: u128) -> Self {
        let base = match chain {
            ChainId::Utxo(_) => original_fee_rate,
            ChainId::Account(account) => original_fee_rate.max(account.fallback_gas_price_wei()),
        };
        let half = base.div_ceil(2);
        Self {
            chain,
            fastest_fee: base.saturating_mul(2),
            half_hour_fee: base.saturating_add(half),
            hour_fee: base,
            mempool_size: 0,
            fetched_at: Utc::now(),
            is_stale: false,
            synthetic: true,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn refresh_staleness(&mut self, now: DateTime<Utc>, freshness: Duration) {
        self.is_stale = self.age(now) >= freshness;
    }
}

/// Valid replacement fee rates for one pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRange {
    pub min: u128,
    pub max: u128,
    pub recommended: u128,
    pub unit: FeeUnit,
    pub mode: ReplacementMode,
}

impl FeeRange {
    pub fn clamp(&self, fee_rate: u128) -> u128 {
        fee_rate.clamp(self.min, self.max)
    }

    pub fn contains(&self, fee_rate: u128) -> bool {
        (self.min..=self.max).contains(&fee_rate)
    }
}

/// How the caller wants the replacement fee rate chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSelection {
    #[default]
    Recommended,
    /// Slider value; clamped into the valid range.
    Custom(u128),
}

impl FeeSelection {
    pub fn resolve(&self, range: &FeeRange) -> u128 {
        match self {
            FeeSelection::Recommended => range.recommended,
            FeeSelection::Custom(rate) => range.clamp(*rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResult {
    pub success: bool,
    pub original_txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_txid: Option<String>,
    pub mode: ReplacementMode,
    pub new_fee_rate: u128,
    /// Fee data came from the synthetic fallback.
    #[serde(default)]
    pub degraded: bool,
    pub message: String,
}

impl CancellationResult {
    pub fn succeeded(
        original_txid: impl Into<String>,
        replacement_txid: impl Into<String>,
        mode: ReplacementMode,
        new_fee_rate: u128,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            original_txid: original_txid.into(),
            replacement_txid: Some(replacement_txid.into()),
            mode,
            new_fee_rate,
            degraded: false,
            message: message.into(),
        }
    }

    pub fn failed(
        original_txid: impl Into<String>,
        mode: ReplacementMode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            original_txid: original_txid.into(),
            replacement_txid: None,
            mode,
            new_fee_rate: 0,
            degraded: false,
            message: message.into(),
        }
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        if degraded && self.success {
            self.message
                .push_str(" (fee estimate degraded: network fee data unavailable)");
        }
        self
    }
}
