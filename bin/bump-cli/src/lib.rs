use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bump_core::{ChainId, FeeSelection, PendingTransaction, ReplacementMode};
use bump_sdk::{
    parse_secret_key, Broadcaster, CachedFeeOracle, CancellationOrchestrator, ChainSigner,
    EvmRpcClient, MempoolFeeOracle, MempoolSpaceClient, PendingTransactionStore,
    ReplacementConfig, ReplacementRequest, RoutedBroadcaster, RoutedFeeOracle, StaticKeyProvider,
};
use clap::{Parser, ValueEnum};
use eyre::{eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Cancel,
    SpeedUp,
}

impl From<Mode> for ReplacementMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Cancel => ReplacementMode::Cancel,
            Mode::SpeedUp => ReplacementMode::SpeedUp,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct BumpArgs {
    /// JSON file with the wallet's pending transactions, rewritten after a successful replacement
    #[arg(long, env)]
    pub pending_file: PathBuf,

    /// Id of the pending transaction to replace
    #[arg(long)]
    pub txid: String,

    /// Replacement mode
    #[arg(long, value_enum, default_value = "cancel")]
    pub mode: Mode,

    /// Custom fee rate in sat/vB or wei/gas, clamped into the valid range
    #[arg(long)]
    pub fee_rate: Option<u128>,

    /// Print the fee range and estimated cost without replacing anything
    #[arg(long, default_value = "false")]
    pub preview: bool,

    /// mempool.space compatible REST API root used for UTXO chains
    #[arg(long, env, default_value = "https://mempool.space/api")]
    pub mempool_api: String,

    /// JSON-RPC URL used for account chains
    #[arg(long, env)]
    pub evm_rpc: Option<String>,

    /// Hex private key of the wallet that sent the transaction
    #[arg(long, env)]
    pub private_key: Option<String>,

    /// Timeout in seconds for fee oracle calls
    #[arg(long, env, default_value = "10")]
    pub oracle_timeout_secs: u64,

    /// Timeout in seconds for the broadcast
    #[arg(long, env, default_value = "15")]
    pub broadcast_timeout_secs: u64,
}

impl BumpArgs {
    pub fn config(&self) -> ReplacementConfig {
        ReplacementConfig {
            oracle_timeout: Duration::from_secs(self.oracle_timeout_secs),
            broadcast_timeout: Duration::from_secs(self.broadcast_timeout_secs),
            ..Default::default()
        }
    }

    pub fn request(&self) -> ReplacementRequest {
        let fee = match self.fee_rate {
            Some(rate) => FeeSelection::Custom(rate),
            None => FeeSelection::Recommended,
        };
        ReplacementRequest {
            txid: self.txid.clone(),
            mode: self.mode.into(),
            fee,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let records = load_pending(&self.pending_file).await?;
        let store = PendingTransactionStore::new();
        let loaded = store.import(records)?;
        info!(loaded, file = %self.pending_file.display(), "Loaded pending transactions");

        let pending = store
            .get(&self.txid)
            .ok_or_else(|| {
                eyre!(
                    "Transaction {} is not in {}",
                    self.txid,
                    self.pending_file.display()
                )
            })?;
        let config = self.config();
        let orchestrator = Arc::new(self.orchestrator(pending.chain, config, store.clone())?);
        let mode = ReplacementMode::from(self.mode);

        if self.preview {
            let preview = orchestrator.preview(&self.txid, mode).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            return Ok(());
        }

        let token = CancellationToken::new();
        let ctrl_c_token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, abandoning the replacement unless it is already broadcasting");
                ctrl_c_token.cancel();
            }
        });

        let result = orchestrator.run(self.request(), token).await;
        println!("{}", serde_json::to_string_pretty(&result)?);

        if !result.success {
            return Err(eyre!(result.message));
        }
        save_pending(&self.pending_file, &store.export()).await?;
        Ok(())
    }

    fn orchestrator(
        &self,
        chain: ChainId,
        config: ReplacementConfig,
        store: PendingTransactionStore,
    ) -> Result<CancellationOrchestrator> {
        let (oracle, broadcaster): (Arc<dyn MempoolFeeOracle>, Arc<dyn Broadcaster>) = match chain {
            ChainId::Utxo(utxo) => {
                let client = Arc::new(MempoolSpaceClient::new(
                    &self.mempool_api,
                    utxo,
                    config.oracle_timeout,
                )?);
                (
                    client.clone() as Arc<dyn MempoolFeeOracle>,
                    client as Arc<dyn Broadcaster>,
                )
            }
            ChainId::Account(account) => {
                let url = self
                    .evm_rpc
                    .as_deref()
                    .ok_or_else(|| eyre!("--evm-rpc is required for {chain}"))?;
                let client = Arc::new(EvmRpcClient::new(url, account, config.broadcast_timeout)?);
                (
                    client.clone() as Arc<dyn MempoolFeeOracle>,
                    client as Arc<dyn Broadcaster>,
                )
            }
        };

        let oracle = RoutedFeeOracle::new().route(
            chain,
            Arc::new(CachedFeeOracle::new(oracle, config.fee_freshness)),
        );
        let broadcaster = RoutedBroadcaster::new().route(chain, broadcaster);

        let mut keys = StaticKeyProvider::new();
        if let Some(private_key) = &self.private_key {
            keys = keys.with_secret(chain, parse_secret_key(private_key)?)?;
        } else if !self.preview {
            return Err(eyre!("--private-key is required to sign the replacement"));
        }

        Ok(CancellationOrchestrator::new(
            config,
            store,
            Arc::new(oracle),
            Arc::new(ChainSigner),
            Arc::new(broadcaster),
            Arc::new(keys),
        )?)
    }
}

pub async fn load_pending(path: &PathBuf) -> Result<Vec<PendingTransaction>> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

pub async fn save_pending(path: &PathBuf, records: &[PendingTransaction]) -> Result<()> {
    tokio::fs::write(path, serde_json::to_string_pretty(records)?).await?;
    Ok(())
}
