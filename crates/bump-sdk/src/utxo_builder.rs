//! Replace-by-fee builder for UTXO chains.
//!
//! The replacement spends exactly the inputs of the original, which makes it
//! conflict with the original in every mempool. A cancel pays everything
//! minus the fee back to the wallet; a speed-up keeps the recipient output
//! and shrinks the change.
//!
//! Nodes also require a replacement to pay at least the original's absolute
//! fee plus relay for its own size. A cancel is smaller than the payment it
//! replaces, so at low rates that floor, not the rate, sets its fee.

use std::str::FromStr;

use bitcoin::{
    absolute::LockTime, transaction, Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use bump_core::{PendingTransaction, ReplacementMode, UtxoChain, UtxoRef};
use tracing::{debug, info};

use crate::errors::{ReplacementError, Result};

/// Signals BIP125 replaceability while keeping nLockTime enforced.
pub const RBF_SEQUENCE: Sequence = Sequence(0xFFFFFFFD);

const CANCEL_BASE_VSIZE: u64 = 110;
const SPEED_UP_BASE_VSIZE: u64 = 141;
const EXTRA_INPUT_VSIZE: u64 = 68;

// DER signature with sighash byte and compressed key, at their largest
const PLACEHOLDER_SIGNATURE_LEN: usize = 72;
const PLACEHOLDER_PUBKEY_LEN: usize = 33;

/// Size estimate for P2WPKH replacements, used before a transaction exists.
pub fn estimate_vsize(mode: ReplacementMode, input_count: usize) -> u64 {
    let base = match mode {
        ReplacementMode::Cancel => CANCEL_BASE_VSIZE,
        ReplacementMode::SpeedUp => SPEED_UP_BASE_VSIZE,
    };
    base + EXTRA_INPUT_VSIZE * (input_count.saturating_sub(1) as u64)
}

/// An output the replacement spends again.
#[derive(Debug, Clone)]
pub struct InputUtxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    /// `None` when the record did not carry the script; the wallet's own
    /// P2WPKH script is assumed.
    pub script_pubkey: Option<ScriptBuf>,
}

impl TryFrom<&UtxoRef> for InputUtxo {
    type Error = ReplacementError;

    fn try_from(utxo: &UtxoRef) -> Result<Self> {
        let txid = Txid::from_str(&utxo.txid).map_err(|e| {
            ReplacementError::InvalidTransaction(format!("Bad input txid {}: {e}", utxo.txid))
        })?;
        let script_pubkey = if utxo.script_pubkey.is_empty() {
            None
        } else {
            let bytes = hex::decode(&utxo.script_pubkey).map_err(|e| {
                ReplacementError::InvalidTransaction(format!("Bad script for {}: {e}", utxo.txid))
            })?;
            Some(ScriptBuf::from_bytes(bytes))
        };
        Ok(Self {
            outpoint: OutPoint::new(txid, utxo.vout),
            value: Amount::from_sat(utxo.value),
            script_pubkey,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnsignedUtxoReplacement {
    pub chain: UtxoChain,
    pub tx: Transaction,
    pub inputs: Vec<InputUtxo>,
    pub fee: Amount,
    pub fee_rate: u64,
    pub vsize: u64,
    /// Value paid back to the wallet, the whole output for a cancel or the
    /// change for a speed-up.
    pub returned_to_wallet: Amount,
}

#[derive(Debug, Clone)]
pub struct UtxoReplacementBuilder {
    dust_limit: Amount,
    relay_increment: u64,
}

impl UtxoReplacementBuilder {
    pub fn new(dust_limit_sats: u64) -> Self {
        Self {
            dust_limit: Amount::from_sat(dust_limit_sats),
            relay_increment: 1,
        }
    }

    /// Incremental relay fee in sat/vB charged on top of the original's fee.
    pub fn with_relay_increment(mut self, sats_per_vbyte: u64) -> Self {
        self.relay_increment = sats_per_vbyte;
        self
    }

    pub fn dust_limit(&self) -> Amount {
        self.dust_limit
    }

    /// Smallest absolute fee a node accepts for a replacement of `vsize`.
    ///
    /// The original's fee is estimated from its rate and the usual
    /// payment-with-change shape.
    pub fn replacement_fee_floor(&self, pending: &PendingTransaction, vsize: u64) -> u64 {
        let original_rate = u64::try_from(pending.original_fee_rate).unwrap_or(u64::MAX);
        let original_fee = original_rate.saturating_mul(estimate_vsize(
            ReplacementMode::SpeedUp,
            pending.utxo_refs.len(),
        ));
        original_fee.saturating_add(self.relay_increment.saturating_mul(vsize))
    }

    fn required_fee(&self, pending: &PendingTransaction, fee_rate: u64, tx: &Transaction) -> u64 {
        let vsize = measured_vsize(tx);
        let by_rate = fee_rate.saturating_mul(vsize);
        let floor = self.replacement_fee_floor(pending, vsize);
        if floor > by_rate {
            debug!(by_rate, floor, "Raising fee to the replacement floor");
        }
        by_rate.max(floor)
    }

    pub fn build(
        &self,
        pending: &PendingTransaction,
        chain: UtxoChain,
        fee_rate: u64,
        mode: ReplacementMode,
        wallet_address: &str,
    ) -> Result<UnsignedUtxoReplacement> {
        let network = chain.network();
        let inputs = pending
            .utxo_refs
            .iter()
            .map(InputUtxo::try_from)
            .collect::<Result<Vec<_>>>()?;
        if inputs.is_empty() {
            return Err(ReplacementError::NotReplaceable {
                txid: pending.id.clone(),
                reason: "missing the spent outputs of the original".to_string(),
            });
        }

        let total_in = inputs
            .iter()
            .try_fold(0u64, |total, input| total.checked_add(input.value.to_sat()))
            .ok_or_else(|| {
                ReplacementError::InvalidTransaction(format!(
                    "Input values of {} overflow the UTXO value range",
                    pending.id
                ))
            })?;
        let wallet_script = parse_address(wallet_address, chain)?;

        let tx_inputs: Vec<TxIn> = inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: RBF_SEQUENCE,
                witness: Witness::new(),
            })
            .collect();

        let mut tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: Vec::new(),
        };

        // a speed-up of a payment to ourselves, such as a tracked cancel,
        // keeps the single wallet output
        let pays_wallet = match mode {
            ReplacementMode::Cancel => true,
            ReplacementMode::SpeedUp => {
                parse_address(&pending.recipient, chain)? == wallet_script
            }
        };

        let returned_to_wallet = if pays_wallet {
            tx.output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: wallet_script,
            });
            let fee = self.required_fee(pending, fee_rate, &tx);
            let remaining = total_in
                .checked_sub(fee)
                .filter(|value| *value >= self.dust_limit.to_sat());
            let Some(remaining) = remaining else {
                return Err(ReplacementError::InsufficientInputValue {
                    available: total_in as u128,
                    required: fee.saturating_add(self.dust_limit.to_sat()) as u128,
                });
            };
            tx.output[0].value = Amount::from_sat(remaining);
            Amount::from_sat(remaining)
        } else {
            let amount = u64::try_from(pending.amount).map_err(|_| {
                ReplacementError::InvalidTransaction(format!(
                    "Amount {} exceeds the UTXO value range",
                    pending.amount
                ))
            })?;
            let change_script = match &pending.change_address {
                Some(change) => parse_address(change, chain)?,
                None => wallet_script,
            };
            tx.output.push(TxOut {
                value: Amount::from_sat(amount),
                script_pubkey: parse_address(&pending.recipient, chain)?,
            });
            tx.output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: change_script,
            });

            let fee = self.required_fee(pending, fee_rate, &tx);
            let required = amount.saturating_add(fee);
            let Some(change) = total_in.checked_sub(required) else {
                return Err(ReplacementError::InsufficientInputValue {
                    available: total_in as u128,
                    required: required as u128,
                });
            };

            if change < self.dust_limit.to_sat() {
                // dust change goes to the miner
                debug!(change, "Dropping dust change output");
                tx.output.pop();
                Amount::ZERO
            } else {
                tx.output[1].value = Amount::from_sat(change);
                Amount::from_sat(change)
            }
        };

        let total_out: u64 = tx.output.iter().map(|out| out.value.to_sat()).sum();
        let fee = Amount::from_sat(total_in - total_out);
        let vsize = measured_vsize(&tx);

        info!(
            original = %pending.id,
            %mode,
            network = %network,
            fee_rate,
            fee_sats = fee.to_sat(),
            vsize,
            "Built replacement transaction"
        );

        Ok(UnsignedUtxoReplacement {
            chain,
            tx,
            inputs,
            fee,
            fee_rate,
            vsize,
            returned_to_wallet,
        })
    }
}

fn parse_address(address: &str, chain: UtxoChain) -> Result<ScriptBuf> {
    Address::from_str(address)
        .and_then(|unchecked| unchecked.require_network(chain.network()))
        .map(|checked| checked.script_pubkey())
        .map_err(|e| {
            ReplacementError::InvalidTransaction(format!("Bad {chain} address {address}: {e}"))
        })
}

/// Virtual size once every input carries a P2WPKH witness.
pub fn measured_vsize(tx: &Transaction) -> u64 {
    let mut sized = tx.clone();
    for input in &mut sized.input {
        input.witness = Witness::from_slice(&[
            vec![0u8; PLACEHOLDER_SIGNATURE_LEN],
            vec![0u8; PLACEHOLDER_PUBKEY_LEN],
        ]);
    }
    sized.vsize() as u64
}
