pub mod account_builder;
pub mod broadcaster;
pub mod config;
mod errors;
pub mod evm_client;
pub mod fee_oracle;
pub mod mempool_client;
pub mod orchestrator;
pub mod pending_store;
pub mod replacement;
pub mod signer;
pub mod utxo_builder;

pub use broadcaster::{Broadcaster, RoutedBroadcaster};
pub use config::ReplacementConfig;
pub use errors::{RejectReason, ReplacementError, Result};
pub use evm_client::EvmRpcClient;
pub use fee_oracle::{CachedFeeOracle, MempoolFeeOracle, RoutedFeeOracle};
pub use mempool_client::MempoolSpaceClient;
pub use orchestrator::{CancellationOrchestrator, ReplacementPreview, ReplacementRequest};
pub use pending_store::{PendingTransactionStore, ReplacementGuard};
pub use replacement::{ReplacementBuilder, SignedReplacement, UnsignedReplacement};
pub use signer::{ChainSigner, KeyMaterial, KeyProvider, ReplacementSigner, StaticKeyProvider};

/// Parses a hex private key, with or without `0x`.
pub fn parse_secret_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim().trim_start_matches("0x"))
        .map_err(|e| ReplacementError::KeyProvider(format!("Private key is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| {
            ReplacementError::KeyProvider(format!(
                "Private key must be 32 bytes, got {}",
                bytes.len()
            ))
        })
}
