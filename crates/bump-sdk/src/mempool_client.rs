//! mempool.space / esplora REST client for UTXO chains.
//!
//! Serves fee tiers from `GET /v1/fees/recommended`, the mempool backlog from
//! `GET /mempool` and broadcasts with `POST /tx`.

use std::time::Duration;

use bump_core::{ChainId, MempoolInfo, UtxoChain};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::broadcaster::{rejection, Broadcaster};
use crate::errors::{ReplacementError, Result};
use crate::fee_oracle::{order_tiers, MempoolFeeOracle};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    #[serde(default)]
    pub economy_fee: Option<u64>,
    #[serde(default)]
    pub minimum_fee: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MempoolStats {
    pub count: u64,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub total_fee: u64,
}

#[derive(Debug, Clone)]
pub struct MempoolSpaceClient {
    base_url: String,
    chain: UtxoChain,
    timeout: Duration,
    http: Client,
}

impl MempoolSpaceClient {
    /// `base_url` is the API root, e.g. `https://mempool.space/api`.
    pub fn new(base_url: impl Into<String>, chain: UtxoChain, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReplacementError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chain,
            timeout,
            http,
        })
    }

    pub fn chain(&self) -> UtxoChain {
        self.chain
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        for<'a> T: Deserialize<'a>,
    {
        let body = self
            .http
            .get(self.url(path))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ReplacementError::NetworkError(format!("GET {path}: {e}")))?
            .text()
            .await
            .map_err(|e| ReplacementError::NetworkError(format!("GET {path}: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| ReplacementError::NetworkError(format!("Malformed {path} response: {e}")))
    }

    pub async fn recommended_fees(&self) -> Result<RecommendedFees> {
        self.get_json("v1/fees/recommended").await
    }

    pub async fn mempool_stats(&self) -> Result<MempoolStats> {
        self.get_json("mempool").await
    }

    fn ensure_chain(&self, chain: ChainId) -> Result<()> {
        if chain == ChainId::Utxo(self.chain) {
            Ok(())
        } else {
            Err(ReplacementError::UnsupportedChain(chain.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl MempoolFeeOracle for MempoolSpaceClient {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
        self.ensure_chain(chain)?;

        let fees = self.recommended_fees().await?;
        // the backlog only informs the UI, so its absence is not an error
        let mempool_size = match self.mempool_stats().await {
            Ok(stats) => stats.count,
            Err(e) => {
                debug!(error = %e, "Mempool stats unavailable");
                0
            }
        };

        Ok(order_tiers(MempoolInfo::new(
            chain,
            fees.fastest_fee as u128,
            fees.half_hour_fee as u128,
            fees.hour_fee as u128,
            mempool_size,
        )))
    }
}

#[async_trait::async_trait]
impl Broadcaster for MempoolSpaceClient {
    async fn submit(&self, signed_tx_hex: &str, chain: ChainId) -> Result<String> {
        self.ensure_chain(chain)?;

        let response = self
            .http
            .post(self.url("tx"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(signed_tx_hex.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReplacementError::BroadcastTimeout(self.timeout)
                } else {
                    ReplacementError::NetworkError(format!("POST tx: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReplacementError::NetworkError(format!("POST tx: {e}")))?;

        if status.is_success() {
            let txid = body.trim().to_string();
            info!(chain = %chain, txid = %txid, "Replacement accepted");
            Ok(txid)
        } else if status.is_server_error() && !body.contains("RPC error") {
            Err(ReplacementError::NetworkError(format!(
                "POST tx returned {status}: {body}"
            )))
        } else {
            warn!(chain = %chain, status = %status, body = %body, "Replacement rejected");
            Err(rejection(chain, body))
        }
    }
}
