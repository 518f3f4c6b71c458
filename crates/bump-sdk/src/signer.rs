//! Signing of built replacements.
//!
//! Key material comes from a [`KeyProvider`] on each run and is only held for
//! the duration of the signing call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::secp256k1::{self, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::{Address, CompressedPublicKey, EcdsaSighashType, PrivateKey, ScriptBuf, Witness};
use bump_core::{ChainId, UtxoChain};
use tracing::debug;

use crate::account_builder::{AccountTx, UnsignedAccountReplacement};
use crate::errors::{ReplacementError, Result};
use crate::replacement::{SignedReplacement, UnsignedReplacement};
use crate::utxo_builder::UnsignedUtxoReplacement;

/// A private key together with the address it controls on one chain.
#[derive(Clone)]
pub struct KeyMaterial {
    secret: [u8; 32],
    address: String,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn new(secret: [u8; 32], address: impl Into<String>) -> Self {
        Self {
            secret,
            address: address.into(),
        }
    }

    /// Key controlling the P2WPKH address of `secret` on `chain`.
    pub fn p2wpkh(secret: [u8; 32], chain: UtxoChain) -> Result<Self> {
        let (_, public_key) = p2wpkh_keys(&secret, chain)?;
        let address = Address::p2wpkh(&public_key, chain.network());
        Ok(Self::new(secret, address.to_string()))
    }

    /// Key controlling the EOA of `secret`.
    pub fn evm(secret: [u8; 32]) -> Result<Self> {
        let signer = evm_signer(&secret)?;
        Ok(Self::new(secret, signer.address().to_checksum(None)))
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    async fn key_material(&self, chain: ChainId) -> Result<KeyMaterial>;
}

/// Keys registered up front, one per chain.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyProvider {
    keys: HashMap<ChainId, KeyMaterial>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, chain: ChainId, key: KeyMaterial) -> Self {
        self.keys.insert(chain, key);
        self
    }

    /// Registers `secret` for `chain`, deriving the address it controls.
    pub fn with_secret(self, chain: ChainId, secret: [u8; 32]) -> Result<Self> {
        let key = match chain {
            ChainId::Utxo(utxo) => KeyMaterial::p2wpkh(secret, utxo)?,
            ChainId::Account(_) => KeyMaterial::evm(secret)?,
        };
        Ok(self.with_key(chain, key))
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn key_material(&self, chain: ChainId) -> Result<KeyMaterial> {
        self.keys
            .get(&chain)
            .cloned()
            .ok_or_else(|| ReplacementError::KeyProvider(format!("No key registered for {chain}")))
    }
}

pub trait ReplacementSigner: Send + Sync {
    fn sign(&self, unsigned: &UnsignedReplacement, key: &KeyMaterial) -> Result<SignedReplacement>;
}

/// Signs P2WPKH spends and EVM transactions with a local key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainSigner;

impl ReplacementSigner for ChainSigner {
    fn sign(&self, unsigned: &UnsignedReplacement, key: &KeyMaterial) -> Result<SignedReplacement> {
        let signed = match unsigned {
            UnsignedReplacement::Utxo(replacement) => sign_utxo(replacement, key)?,
            UnsignedReplacement::Account(replacement) => sign_account(replacement, key)?,
        };
        debug!(chain = %signed.chain, txid = %signed.txid, "Signed replacement");
        Ok(signed)
    }
}

fn signing_error(e: impl fmt::Display) -> ReplacementError {
    ReplacementError::Signing(e.to_string())
}

fn p2wpkh_keys(secret: &[u8; 32], chain: UtxoChain) -> Result<(SecretKey, CompressedPublicKey)> {
    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(secret).map_err(signing_error)?;
    let private_key = PrivateKey::new(secret_key, chain.network());
    let public_key =
        CompressedPublicKey::from_private_key(&secp, &private_key).map_err(signing_error)?;
    Ok((secret_key, public_key))
}

fn evm_signer(secret: &[u8; 32]) -> Result<PrivateKeySigner> {
    PrivateKeySigner::from_bytes(&B256::from(*secret)).map_err(signing_error)
}

fn sign_utxo(
    replacement: &UnsignedUtxoReplacement,
    key: &KeyMaterial,
) -> Result<SignedReplacement> {
    let secp = Secp256k1::new();
    let (secret_key, public_key) = p2wpkh_keys(&key.secret, replacement.chain)?;
    let wallet_script = ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash());

    let mut tx = replacement.tx.clone();
    let mut sighash_cache = SighashCache::new(replacement.tx.clone());

    for (input_index, input) in replacement.inputs.iter().enumerate() {
        let script = input.script_pubkey.as_ref().unwrap_or(&wallet_script);
        if *script != wallet_script {
            return Err(ReplacementError::Signing(format!(
                "Input {} is not locked to the wallet key",
                input.outpoint
            )));
        }

        let sighash = sighash_cache
            .p2wpkh_signature_hash(input_index, &wallet_script, input.value, EcdsaSighashType::All)
            .map_err(signing_error)?;
        let message = secp256k1::Message::from_digest_slice(&sighash[..]).map_err(signing_error)?;
        let signature = secp.sign_ecdsa(&message, &secret_key);

        let mut signature_bytes = signature.serialize_der().to_vec();
        signature_bytes.push(EcdsaSighashType::All as u8);
        tx.input[input_index].witness =
            Witness::from_slice(&[signature_bytes.as_slice(), &public_key.to_bytes()]);
    }

    Ok(SignedReplacement {
        chain: ChainId::Utxo(replacement.chain),
        txid: tx.compute_txid().to_string(),
        raw_hex: serialize_hex(&tx),
        fee_rate: replacement.fee_rate as u128,
    })
}

fn sign_account(
    replacement: &UnsignedAccountReplacement,
    key: &KeyMaterial,
) -> Result<SignedReplacement> {
    let signer = evm_signer(&key.secret)?;
    let expected = alloy::primitives::Address::from_str(&key.address).map_err(signing_error)?;
    if signer.address() != expected {
        return Err(ReplacementError::Signing(format!(
            "Key does not control {}",
            key.address
        )));
    }

    let envelope = match &replacement.tx {
        AccountTx::Legacy(tx) => {
            let mut tx = tx.clone();
            let signature = signer.sign_transaction_sync(&mut tx).map_err(signing_error)?;
            TxEnvelope::from(tx.into_signed(signature))
        }
        AccountTx::Eip1559(tx) => {
            let mut tx = tx.clone();
            let signature = signer.sign_transaction_sync(&mut tx).map_err(signing_error)?;
            TxEnvelope::from(tx.into_signed(signature))
        }
    };

    Ok(SignedReplacement {
        chain: ChainId::Account(replacement.chain),
        txid: envelope.tx_hash().to_string(),
        raw_hex: format!("0x{}", hex::encode(envelope.encoded_2718())),
        fee_rate: replacement.tx.fee_rate(),
    })
}
