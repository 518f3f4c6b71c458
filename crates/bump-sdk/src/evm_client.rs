//! JSON-RPC client for account chains.
//!
//! Fee tiers are derived from `eth_gasPrice` and `eth_maxPriorityFeePerGas`:
//! the hour tier is the gas price alone, each faster tier adds one more tip.

use std::time::Duration;

use alloy::primitives::U64;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use bump_core::{AccountChain, ChainId, MempoolInfo};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broadcaster::{rejection, Broadcaster};
use crate::errors::{ReplacementError, Result};
use crate::fee_oracle::MempoolFeeOracle;

#[derive(Debug, Deserialize)]
struct TxpoolStatus {
    pending: U64,
}

#[derive(Clone)]
pub struct EvmRpcClient {
    chain: AccountChain,
    provider: DynProvider,
    timeout: Duration,
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str, chain: AccountChain, timeout: Duration) -> Result<Self> {
        let url = rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| ReplacementError::Config(format!("Invalid RPC url {rpc_url}: {e}")))?;
        let provider = DynProvider::new(ProviderBuilder::new().on_http(url));
        Ok(Self::from_provider(provider, chain, timeout))
    }

    pub fn from_provider(provider: DynProvider, chain: AccountChain, timeout: Duration) -> Self {
        Self {
            chain,
            provider,
            timeout,
        }
    }

    pub fn chain(&self) -> AccountChain {
        self.chain
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    fn ensure_chain(&self, chain: ChainId) -> Result<()> {
        if chain == ChainId::Account(self.chain) {
            Ok(())
        } else {
            Err(ReplacementError::UnsupportedChain(chain.to_string()))
        }
    }

    pub async fn gas_price(&self) -> Result<u128> {
        match timeout(self.timeout, self.provider.get_gas_price()).await {
            Ok(Ok(price)) => Ok(price),
            Ok(Err(e)) => Err(ReplacementError::NetworkError(format!("eth_gasPrice: {e}"))),
            Err(_) => Err(ReplacementError::NetworkError(format!(
                "eth_gasPrice timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Suggested tip, or zero on chains without a fee market.
    pub async fn priority_fee(&self) -> u128 {
        if !self.chain.supports_eip1559() {
            return 0;
        }
        match timeout(self.timeout, self.provider.get_max_priority_fee_per_gas()).await {
            Ok(Ok(tip)) => tip,
            Ok(Err(e)) => {
                debug!(chain = %self.chain, error = %e, "eth_maxPriorityFeePerGas unavailable");
                0
            }
            Err(_) => 0,
        }
    }

    /// Pending transactions in the node's pool, zero if `txpool` is not exposed.
    pub async fn pending_count(&self) -> u64 {
        let request = self
            .provider
            .raw_request::<_, TxpoolStatus>("txpool_status".into(), ());
        match timeout(self.timeout, request).await {
            Ok(Ok(status)) => status.pending.to::<u64>(),
            _ => 0,
        }
    }
}

#[async_trait::async_trait]
impl MempoolFeeOracle for EvmRpcClient {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
        self.ensure_chain(chain)?;

        let gas_price = self.gas_price().await?;
        let (tip, pending) = tokio::join!(self.priority_fee(), self.pending_count());

        Ok(MempoolInfo::new(
            chain,
            gas_price.saturating_add(tip.saturating_mul(2)),
            gas_price.saturating_add(tip),
            gas_price,
            pending,
        ))
    }
}

#[async_trait::async_trait]
impl Broadcaster for EvmRpcClient {
    async fn submit(&self, signed_tx_hex: &str, chain: ChainId) -> Result<String> {
        self.ensure_chain(chain)?;

        let raw = hex::decode(signed_tx_hex.trim_start_matches("0x"))
            .map_err(|e| ReplacementError::InvalidTransaction(format!("Bad raw hex: {e}")))?;

        match timeout(self.timeout, self.provider.send_raw_transaction(&raw)).await {
            Ok(Ok(pending)) => {
                let txid = pending.tx_hash().to_string();
                info!(chain = %chain, txid = %txid, "Replacement accepted");
                Ok(txid)
            }
            Ok(Err(e)) => match e.as_error_resp() {
                Some(payload) => {
                    warn!(
                        chain = %chain,
                        code = payload.code,
                        message = %payload.message,
                        "Replacement rejected"
                    );
                    Err(rejection(chain, payload.message.to_string()))
                }
                None => Err(ReplacementError::NetworkError(format!(
                    "eth_sendRawTransaction: {e}"
                ))),
            },
            Err(_) => Err(ReplacementError::BroadcastTimeout(self.timeout)),
        }
    }
}
