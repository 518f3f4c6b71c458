//! Shared fixtures: wallet keys, pending records, scripted collaborators
//! and fake network endpoints.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::keccak256;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Address, Transaction};
use bump_core::{
    AccountChain, ChainId, MempoolInfo, PendingTransaction, ReplacementStage, UtxoChain, UtxoRef,
};
use bump_sdk::{
    Broadcaster, CancellationOrchestrator, ChainSigner, KeyMaterial, MempoolFeeOracle,
    PendingTransactionStore, ReplacementConfig, ReplacementError, StaticKeyProvider,
};
use serde_json::{json, Value};
use std::str::FromStr;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const GWEI: u128 = 1_000_000_000;
pub const WALLET_SECRET: [u8; 32] = [7u8; 32];
pub const BTC: ChainId = ChainId::Utxo(UtxoChain::Bitcoin);
pub const ETH: ChainId = ChainId::Account(AccountChain::Ethereum);
pub const BTC_RECIPIENT: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub const ETH_RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

pub fn btc_key() -> KeyMaterial {
    KeyMaterial::p2wpkh(WALLET_SECRET, UtxoChain::Bitcoin).unwrap()
}

pub fn eth_key() -> KeyMaterial {
    KeyMaterial::evm(WALLET_SECRET).unwrap()
}

pub fn key_provider() -> StaticKeyProvider {
    StaticKeyProvider::new()
        .with_key(BTC, btc_key())
        .with_key(ETH, eth_key())
}

/// A 1-input BTC payment of 50k sats at 5 sat/vB from the test wallet.
pub fn btc_pending(id: &str) -> PendingTransaction {
    let wallet_script = Address::from_str(btc_key().address())
        .unwrap()
        .assume_checked()
        .script_pubkey();
    PendingTransaction::utxo(
        id,
        UtxoChain::Bitcoin,
        BTC_RECIPIENT,
        50_000,
        5,
        vec![UtxoRef {
            txid: "5e".repeat(32),
            vout: 1,
            value: 100_000,
            script_pubkey: hex::encode(wallet_script.as_bytes()),
        }],
    )
}

/// An ETH transfer at nonce 4 and 20 gwei.
pub fn eth_pending(id: &str) -> PendingTransaction {
    PendingTransaction::account(
        id,
        AccountChain::Ethereum,
        ETH_RECIPIENT,
        10u128.pow(16),
        20 * GWEI,
        4,
    )
}

pub fn btc_mempool() -> MempoolInfo {
    MempoolInfo::new(BTC, 20, 10, 6, 5_000)
}

pub fn eth_mempool() -> MempoolInfo {
    MempoolInfo::new(ETH, 40 * GWEI, 30 * GWEI, 25 * GWEI, 120)
}

/// Id the network assigns to a raw transaction.
pub fn txid_of(raw_hex: &str, chain: ChainId) -> String {
    match chain {
        ChainId::Utxo(_) => deserialize_hex::<Transaction>(raw_hex)
            .unwrap()
            .compute_txid()
            .to_string(),
        ChainId::Account(_) => {
            keccak256(hex::decode(raw_hex.trim_start_matches("0x")).unwrap()).to_string()
        }
    }
}

/// Serves fixed tiers per chain, or fails for chains without any.
#[derive(Default)]
pub struct StubOracle {
    tiers: Mutex<Vec<MempoolInfo>>,
    pub calls: AtomicUsize,
}

impl StubOracle {
    pub fn with(tiers: Vec<MempoolInfo>) -> Self {
        Self {
            tiers: Mutex::new(tiers),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MempoolFeeOracle for StubOracle {
    async fn fetch(&self, chain: ChainId) -> bump_sdk::Result<MempoolInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tiers = self.tiers.lock().unwrap();
        tiers
            .iter()
            .find(|info| info.chain == chain)
            .map(|info| {
                MempoolInfo::new(
                    chain,
                    info.fastest_fee,
                    info.half_hour_fee,
                    info.hour_fee,
                    info.mempool_size,
                )
            })
            .ok_or_else(|| ReplacementError::NetworkError("fee endpoint unreachable".to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum BroadcastBehavior {
    Accept,
    Reject(String),
    Hang,
}

/// Records submissions and answers them as scripted. A gated broadcaster
/// waits for [`StubBroadcaster::release`] before answering.
pub struct StubBroadcaster {
    behaviors: Mutex<VecDeque<BroadcastBehavior>>,
    fallback: BroadcastBehavior,
    gate: Option<Arc<Notify>>,
    pub submitted: Mutex<Vec<String>>,
}

impl StubBroadcaster {
    pub fn new(fallback: BroadcastBehavior) -> Self {
        Self {
            behaviors: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(BroadcastBehavior::Accept)
    }

    pub fn then(self, behavior: BroadcastBehavior) -> Self {
        self.behaviors.lock().unwrap().push_back(behavior);
        self
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn submissions(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Broadcaster for StubBroadcaster {
    async fn submit(&self, signed_tx_hex: &str, chain: ChainId) -> bump_sdk::Result<String> {
        self.submitted.lock().unwrap().push(signed_tx_hex.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match behavior {
            BroadcastBehavior::Accept => Ok(txid_of(signed_tx_hex, chain)),
            BroadcastBehavior::Reject(message) => {
                Err(bump_sdk::broadcaster::rejection(chain, message))
            }
            BroadcastBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(txid_of(signed_tx_hex, chain))
            }
        }
    }
}

pub struct Harness {
    pub orchestrator: Arc<CancellationOrchestrator>,
    pub store: PendingTransactionStore,
    pub oracle: Arc<StubOracle>,
    pub broadcaster: Arc<StubBroadcaster>,
}

pub fn harness(oracle: StubOracle, broadcaster: StubBroadcaster) -> Harness {
    harness_with_config(oracle, broadcaster, ReplacementConfig::default())
}

pub fn harness_with_config(
    oracle: StubOracle,
    broadcaster: StubBroadcaster,
    config: ReplacementConfig,
) -> Harness {
    let store = PendingTransactionStore::new();
    let oracle = Arc::new(oracle);
    let broadcaster = Arc::new(broadcaster);
    let orchestrator = CancellationOrchestrator::new(
        config,
        store.clone(),
        oracle.clone(),
        Arc::new(ChainSigner),
        broadcaster.clone(),
        Arc::new(key_provider()),
    )
    .unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        oracle,
        broadcaster,
    }
}

pub async fn wait_for_stage(store: &PendingTransactionStore, txid: &str, stage: ReplacementStage) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.stage(txid) != Some(stage) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{txid} never reached {stage:?}"));
}

/// A spawned HTTP server, shut down on drop.
pub struct FakeServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_router(router: Router) -> FakeServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    FakeServer {
        url: format!("http://{addr}"),
        handle,
    }
}

/// State behind the fake mempool.space API.
#[derive(Clone, Default)]
pub struct MempoolApiState {
    pub fees: Arc<Mutex<Option<Value>>>,
    pub rejection: Arc<Mutex<Option<(StatusCode, String)>>>,
    pub broadcasts: Arc<Mutex<Vec<String>>>,
}

/// Serves `/api/v1/fees/recommended`, `/api/mempool` and `/api/tx`.
pub async fn spawn_mempool_api(state: MempoolApiState) -> FakeServer {
    let router = Router::new()
        .route("/api/v1/fees/recommended", get(recommended_fees_handler))
        .route("/api/mempool", get(mempool_handler))
        .route("/api/tx", post(broadcast_handler))
        .with_state(state);
    spawn_router(router).await
}

async fn recommended_fees_handler(State(state): State<MempoolApiState>) -> Response {
    match state.fees.lock().unwrap().clone() {
        Some(fees) => Json(fees).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "fee estimator warming up").into_response(),
    }
}

async fn mempool_handler() -> Json<Value> {
    Json(json!({
        "count": 4_321,
        "vsize": 2_100_000,
        "total_fee": 18_000_000,
        "fee_histogram": [[12.5, 50_000], [3.1, 120_000]],
    }))
}

async fn broadcast_handler(State(state): State<MempoolApiState>, body: String) -> Response {
    if let Some((status, message)) = state.rejection.lock().unwrap().clone() {
        return (status, message).into_response();
    }
    let txid = txid_of(body.trim(), BTC);
    state.broadcasts.lock().unwrap().push(body);
    txid.into_response()
}

/// State behind the fake EVM JSON-RPC node.
#[derive(Clone)]
pub struct EvmNodeState {
    pub gas_price: u128,
    pub priority_fee: Option<u128>,
    pub pending: u64,
    pub rejection: Arc<Mutex<Option<String>>>,
    pub raw_transactions: Arc<Mutex<Vec<String>>>,
}

impl EvmNodeState {
    pub fn new(gas_price: u128, priority_fee: Option<u128>, pending: u64) -> Self {
        Self {
            gas_price,
            priority_fee,
            pending,
            rejection: Arc::new(Mutex::new(None)),
            raw_transactions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub async fn spawn_evm_node(state: EvmNodeState) -> FakeServer {
    let router = Router::new().route("/", post(json_rpc_handler)).with_state(state);
    spawn_router(router).await
}

async fn json_rpc_handler(
    State(state): State<EvmNodeState>,
    Json(request): Json<Value>,
) -> Json<Value> {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default();

    let outcome: Result<Value, String> = match method {
        "eth_chainId" => Ok(json!("0x1")),
        "eth_gasPrice" => Ok(json!(format!("{:#x}", state.gas_price))),
        "eth_maxPriorityFeePerGas" => match state.priority_fee {
            Some(tip) => Ok(json!(format!("{tip:#x}"))),
            None => Err("the method eth_maxPriorityFeePerGas does not exist".to_string()),
        },
        "txpool_status" => Ok(json!({
            "pending": format!("{:#x}", state.pending),
            "queued": "0x0",
        })),
        "eth_sendRawTransaction" => {
            let raw = request["params"][0].as_str().unwrap_or_default().to_string();
            match state.rejection.lock().unwrap().clone() {
                Some(message) => Err(message),
                None => {
                    let hash = txid_of(&raw, ETH);
                    state.raw_transactions.lock().unwrap().push(raw);
                    Ok(json!(hash))
                }
            }
        }
        other => Err(format!("the method {other} does not exist")),
    };

    Json(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32000, "message": message },
        }),
    })
}
