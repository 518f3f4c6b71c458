use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bump_core::UtxoChain;
use bump_sdk::{
    Broadcaster, CancellationOrchestrator, ChainSigner, MempoolFeeOracle, MempoolSpaceClient,
    PendingTransactionStore, RejectReason, ReplacementConfig, ReplacementError,
    ReplacementRequest,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::test_utils::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fees() -> serde_json::Value {
    json!({
        "fastestFee": 24,
        "halfHourFee": 12,
        "hourFee": 7,
        "economyFee": 3,
        "minimumFee": 1,
    })
}

#[tokio::test]
async fn test_fetches_recommended_tiers() {
    let state = MempoolApiState::default();
    *state.fees.lock().unwrap() = Some(fees());
    let server = spawn_mempool_api(state).await;

    let client =
        MempoolSpaceClient::new(format!("{}/api/", server.url), UtxoChain::Bitcoin, TIMEOUT)
            .unwrap();
    let info = client.fetch(BTC).await.unwrap();

    assert_eq!(info.fastest_fee, 24);
    assert_eq!(info.half_hour_fee, 12);
    assert_eq!(info.hour_fee, 7);
    assert_eq!(info.mempool_size, 4_321);
    assert!(!info.is_stale);
    assert!(!info.synthetic);
}

#[tokio::test]
async fn test_unavailable_estimator_is_a_network_error() {
    let server = spawn_mempool_api(MempoolApiState::default()).await;
    let client =
        MempoolSpaceClient::new(format!("{}/api", server.url), UtxoChain::Bitcoin, TIMEOUT)
            .unwrap();

    let err = client.fetch(BTC).await.unwrap_err();
    assert!(matches!(err, ReplacementError::NetworkError(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_serves_only_its_chain() {
    let server = spawn_mempool_api(MempoolApiState::default()).await;
    let client =
        MempoolSpaceClient::new(format!("{}/api", server.url), UtxoChain::Bitcoin, TIMEOUT)
            .unwrap();

    let err = client.fetch(ETH).await.unwrap_err();
    assert!(matches!(err, ReplacementError::UnsupportedChain(_)));
    let err = client
        .submit("00", bump_core::ChainId::Utxo(UtxoChain::BitcoinTestnet))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplacementError::UnsupportedChain(_)));
}

#[tokio::test]
async fn test_node_rejection_is_classified() {
    let state = MempoolApiState::default();
    *state.rejection.lock().unwrap() = Some((
        StatusCode::BAD_REQUEST,
        "sendrawtransaction RPC error: {\"code\":-25,\"message\":\"bad-txns-inputs-missingorspent\"}".to_string(),
    ));
    let server = spawn_mempool_api(state).await;
    let client =
        MempoolSpaceClient::new(format!("{}/api", server.url), UtxoChain::Bitcoin, TIMEOUT)
            .unwrap();

    let err = client.submit("0200", BTC).await.unwrap_err();
    assert!(matches!(
        err,
        ReplacementError::BroadcastRejected {
            reason: RejectReason::InputsMissingOrSpent,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_end_to_end_over_rest() {
    let state = MempoolApiState::default();
    *state.fees.lock().unwrap() = Some(fees());
    let server = spawn_mempool_api(state.clone()).await;
    let client = Arc::new(
        MempoolSpaceClient::new(format!("{}/api", server.url), UtxoChain::Bitcoin, TIMEOUT)
            .unwrap(),
    );

    let store = PendingTransactionStore::new();
    store.insert(btc_pending("aa".repeat(32).as_str())).unwrap();
    let orchestrator = Arc::new(
        CancellationOrchestrator::new(
            ReplacementConfig::default(),
            store.clone(),
            client.clone(),
            Arc::new(ChainSigner),
            client,
            Arc::new(key_provider()),
        )
        .unwrap(),
    );

    let result = orchestrator
        .run(ReplacementRequest::cancel("aa".repeat(32)), CancellationToken::new())
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.new_fee_rate, 12);
    let broadcasts = state.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(
        result.replacement_txid.as_deref(),
        Some(txid_of(&broadcasts[0], BTC).as_str())
    );
    assert_eq!(store.pending().len(), 1);
}
