//! Drives one replacement from fee lookup to broadcast.
//!
//! ```text
//! Idle -> FetchingFees -> ComputingPolicy -> Building -> Signing -> Broadcasting -> Succeeded
//!                                    \__________ any error __________/               \-> Failed
//! ```
//!
//! The per-transaction lock is taken before fees are fetched and held until
//! the run ends. A run is spawned onto the runtime, so it finishes even when
//! the caller stops waiting; the cancellation token is honored up to the
//! broadcast and ignored after it.

use std::future::Future;
use std::sync::Arc;

use bump_core::{
    CancellationResult, ChainId, FeeBumpPolicy, FeeRange, FeeSelection, MempoolInfo,
    PendingTransaction, ReplacementMode, ReplacementStage, TxStatus,
};
use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::account_builder::{CALL_GAS_LIMIT, TRANSFER_GAS_LIMIT};
use crate::broadcaster::Broadcaster;
use crate::config::ReplacementConfig;
use crate::errors::{ReplacementError, Result};
use crate::fee_oracle::MempoolFeeOracle;
use crate::pending_store::{PendingTransactionStore, ReplacementGuard};
use crate::replacement::{ReplacementBuilder, SignedReplacement, UnsignedReplacement};
use crate::signer::{KeyProvider, ReplacementSigner};
use crate::utxo_builder::estimate_vsize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRequest {
    pub txid: String,
    pub mode: ReplacementMode,
    pub fee: FeeSelection,
}

impl ReplacementRequest {
    pub fn cancel(txid: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            mode: ReplacementMode::Cancel,
            fee: FeeSelection::Recommended,
        }
    }

    pub fn speed_up(txid: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            mode: ReplacementMode::SpeedUp,
            fee: FeeSelection::Recommended,
        }
    }

    pub fn with_fee(mut self, fee: FeeSelection) -> Self {
        self.fee = fee;
        self
    }
}

/// What a replacement would cost, shown before the user confirms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementPreview {
    pub range: FeeRange,
    pub mempool: MempoolInfo,
    pub degraded: bool,
    /// Absolute fee at the recommended rate, in the chain's base unit.
    pub estimated_fee: u128,
}

pub struct CancellationOrchestrator {
    config: ReplacementConfig,
    store: PendingTransactionStore,
    oracle: Arc<dyn MempoolFeeOracle>,
    policy: FeeBumpPolicy,
    builder: ReplacementBuilder,
    signer: Arc<dyn ReplacementSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    keys: Arc<dyn KeyProvider>,
}

impl CancellationOrchestrator {
    pub fn new(
        config: ReplacementConfig,
        store: PendingTransactionStore,
        oracle: Arc<dyn MempoolFeeOracle>,
        signer: Arc<dyn ReplacementSigner>,
        broadcaster: Arc<dyn Broadcaster>,
        keys: Arc<dyn KeyProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            policy: FeeBumpPolicy::new(config.policy_params()),
            builder: ReplacementBuilder::from_config(&config),
            config,
            store,
            oracle,
            signer,
            broadcaster,
            keys,
        })
    }

    pub fn store(&self) -> &PendingTransactionStore {
        &self.store
    }

    pub fn stage(&self, txid: &str) -> Option<ReplacementStage> {
        self.store.stage(txid)
    }

    /// Fee range and estimated cost of replacing `txid`, without side effects.
    pub async fn preview(&self, txid: &str, mode: ReplacementMode) -> Result<ReplacementPreview> {
        let pending = self
            .store
            .get(txid)
            .ok_or_else(|| ReplacementError::UnknownTransaction(txid.to_string()))?;
        pending.replaceability()?;

        let (mempool, degraded) = self.fetch_fees(&pending).await;
        let range = self.policy.compute_range(&pending, &mempool, mode)?;
        let estimated_fee = range.recommended.saturating_mul(estimated_units(&pending, mode));

        Ok(ReplacementPreview {
            range,
            mempool,
            degraded,
            estimated_fee,
        })
    }

    /// Runs the request to completion and flattens any error into the result.
    pub async fn run(
        self: &Arc<Self>,
        request: ReplacementRequest,
        token: CancellationToken,
    ) -> CancellationResult {
        let (txid, mode) = (request.txid.clone(), request.mode);
        match self.replace(request, token).await {
            Ok(result) => result,
            Err(e) => e.into_result(&txid, mode),
        }
    }

    /// Takes the replacement lock immediately and finishes the run on a
    /// spawned task.
    pub async fn replace(
        self: &Arc<Self>,
        request: ReplacementRequest,
        token: CancellationToken,
    ) -> Result<CancellationResult> {
        let (pending, guard) = self.store.begin_replacement(&request.txid)?;

        let span = info_span!(
            "replacement",
            txid = %pending.id,
            chain = %pending.chain,
            mode = %request.mode,
        );
        let this = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                let outcome = this.execute(&pending, &request, &guard, &token).await;
                match &outcome {
                    Ok(result) => {
                        guard.advance(ReplacementStage::Succeeded);
                        info!(
                            replacement = ?result.replacement_txid,
                            fee_rate = result.new_fee_rate,
                            degraded = result.degraded,
                            "Replacement broadcast"
                        );
                    }
                    Err(e) => {
                        warn!(stage = ?guard.stage(), error = %e, "Replacement failed");
                        guard.advance(ReplacementStage::Failed);
                    }
                }
                outcome
            }
            .instrument(span),
        );

        handle
            .await
            .map_err(|e| ReplacementError::Internal(e.to_string()))?
    }

    async fn execute(
        &self,
        pending: &PendingTransaction,
        request: &ReplacementRequest,
        guard: &ReplacementGuard,
        token: &CancellationToken,
    ) -> Result<CancellationResult> {
        let chain = pending.chain;

        guard.advance(ReplacementStage::FetchingFees);
        let (mempool, degraded) = cancellable(token, &pending.id, self.fetch_fees(pending)).await?;

        guard.advance(ReplacementStage::ComputingPolicy);
        let range = self.policy.compute_range(pending, &mempool, request.mode)?;
        let fee_rate = request.fee.resolve(&range);
        if let FeeSelection::Custom(requested) = request.fee {
            if requested != fee_rate {
                info!(requested, clamped = fee_rate, "Custom fee rate clamped into range");
            }
        }

        guard.advance(ReplacementStage::Building);
        let key = cancellable(token, &pending.id, self.keys.key_material(chain)).await??;
        let unsigned = self
            .builder
            .build(pending, fee_rate, request.mode, key.address())?;
        ensure_active(token, &pending.id)?;

        guard.advance(ReplacementStage::Signing);
        let signed = self.signer.sign(&unsigned, &key)?;
        let wallet_address = key.address().to_string();
        drop(key);
        ensure_active(token, &pending.id)?;

        guard.advance(ReplacementStage::Broadcasting);
        debug!(raw = %signed.raw_hex, "Submitting replacement");
        let accepted_txid = match timeout(
            self.config.broadcast_timeout,
            self.broadcaster.submit(&signed.raw_hex, chain),
        )
        .await
        {
            Ok(outcome) => outcome?,
            Err(_) => return Err(ReplacementError::BroadcastTimeout(self.config.broadcast_timeout)),
        };
        if accepted_txid != signed.txid {
            warn!(
                signed = %signed.txid,
                accepted = %accepted_txid,
                "Network reported a different txid"
            );
        }

        let record = self.config.track_replacements.then(|| {
            replacement_record(
                pending,
                &unsigned,
                &signed,
                &accepted_txid,
                &wallet_address,
                request.mode,
            )
        });
        self.store.complete_replacement(guard, &accepted_txid, record);

        let message = success_message(pending, &unsigned, request.mode, &range);
        Ok(CancellationResult::succeeded(
            &pending.id,
            accepted_txid,
            request.mode,
            fee_rate,
            message,
        )
        .with_degraded(degraded))
    }

    /// Network tiers when available, otherwise tiers derived from the
    /// original fee rate. The flag reports the fallback.
    async fn fetch_fees(&self, pending: &PendingTransaction) -> (MempoolInfo, bool) {
        let chain = pending.chain;
        let fallback = || MempoolInfo::synthetic(chain, pending.original_fee_rate);

        match timeout(self.config.oracle_timeout, self.oracle.fetch(chain)).await {
            Ok(Ok(mut info)) => {
                info.refresh_staleness(Utc::now(), self.config.fee_freshness);
                let degraded = info.synthetic;
                (info, degraded)
            }
            Ok(Err(e)) => {
                warn!(chain = %chain, error = %e, "Fee oracle failed, using synthetic tiers");
                (fallback(), true)
            }
            Err(_) => {
                warn!(
                    chain = %chain,
                    timeout = ?self.config.oracle_timeout,
                    "Fee oracle timed out, using synthetic tiers"
                );
                (fallback(), true)
            }
        }
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    txid: &str,
    future: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ReplacementError::Cancelled(txid.to_string())),
        output = future => Ok(output),
    }
}

fn ensure_active(token: &CancellationToken, txid: &str) -> Result<()> {
    if token.is_cancelled() {
        Err(ReplacementError::Cancelled(txid.to_string()))
    } else {
        Ok(())
    }
}

/// Size units the fee rate is charged on: vbytes or gas.
fn estimated_units(pending: &PendingTransaction, mode: ReplacementMode) -> u128 {
    match (pending.chain, mode) {
        (ChainId::Utxo(_), mode) => estimate_vsize(mode, pending.utxo_refs.len()) as u128,
        (ChainId::Account(_), ReplacementMode::Cancel) => TRANSFER_GAS_LIMIT as u128,
        (ChainId::Account(_), ReplacementMode::SpeedUp) => {
            let default_limit = if pending.data.as_deref().is_some_and(|d| !d.is_empty()) {
                CALL_GAS_LIMIT
            } else {
                TRANSFER_GAS_LIMIT
            };
            pending.gas_limit.unwrap_or(default_limit) as u128
        }
    }
}

fn replacement_record(
    pending: &PendingTransaction,
    unsigned: &UnsignedReplacement,
    signed: &SignedReplacement,
    accepted_txid: &str,
    wallet_address: &str,
    mode: ReplacementMode,
) -> PendingTransaction {
    let mut record = pending.clone();
    record.id = accepted_txid.to_string();
    record.original_fee_rate = signed.fee_rate;
    record.timestamp = Utc::now();
    record.confirmations = 0;
    record.status = TxStatus::Pending;
    record.replaces = Some(pending.id.clone());
    record.replaced_by = None;
    if mode == ReplacementMode::Cancel {
        record.recipient = wallet_address.to_string();
    }

    match unsigned {
        UnsignedReplacement::Utxo(replacement) => {
            // the fee floor can lift the paid rate above the selected one
            let paid_rate = replacement.fee.to_sat().div_ceil(replacement.vsize.max(1));
            record.original_fee_rate = record.original_fee_rate.max(paid_rate as u128);
            if mode == ReplacementMode::Cancel {
                record.amount = replacement.returned_to_wallet.to_sat() as u128;
                record.change_address = None;
            }
        }
        UnsignedReplacement::Account(replacement) => {
            record.original_priority_fee = replacement.tx.priority_fee();
            record.gas_limit = Some(replacement.tx.gas_limit());
            if mode == ReplacementMode::Cancel {
                record.amount = 0;
                record.data = None;
            }
        }
    }
    record
}

fn success_message(
    pending: &PendingTransaction,
    unsigned: &UnsignedReplacement,
    mode: ReplacementMode,
    range: &FeeRange,
) -> String {
    match (mode, unsigned) {
        (ReplacementMode::Cancel, UnsignedReplacement::Utxo(replacement)) => format!(
            "Transaction cancelled, {} sats are returning to your wallet",
            replacement.returned_to_wallet.to_sat()
        ),
        (ReplacementMode::Cancel, UnsignedReplacement::Account(replacement)) => format!(
            "Transaction cancelled, nonce {} is now used by a zero-value transfer to yourself",
            replacement.tx.nonce()
        ),
        (ReplacementMode::SpeedUp, _) => format!(
            "Transaction {} sped up to {} {}",
            pending.id,
            unsigned.fee_rate(),
            range.unit
        ),
    }
}
