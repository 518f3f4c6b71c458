//! In-memory registry of unconfirmed wallet transactions.
//!
//! Persistence lives outside this crate: callers seed the store with
//! [`PendingTransactionStore::import`] and save [`PendingTransactionStore::export`].
//! The store also owns the per-transaction replacement lock, so at most one
//! replacement of a given transaction runs at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bump_core::{PendingTransaction, ReplacementStage, TxStatus};
use tracing::{debug, info, warn};

use crate::errors::{ReplacementError, Result};

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, PendingTransaction>,
    in_flight: HashMap<String, ReplacementStage>,
    finished: HashMap<String, ReplacementStage>,
}

#[derive(Debug, Clone, Default)]
pub struct PendingTransactionStore {
    state: Arc<Mutex<StoreState>>,
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    // the state stays consistent across a panic, every mutation is a single map operation
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PendingTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly broadcast transaction.
    pub fn insert(&self, tx: PendingTransaction) -> Result<()> {
        tx.validate()?;
        let mut state = lock(&self.state);
        if state.entries.contains_key(&tx.id) {
            return Err(ReplacementError::InvalidTransaction(format!(
                "{} is already tracked",
                tx.id
            )));
        }
        debug!(txid = %tx.id, chain = %tx.chain, "Tracking pending transaction");
        state.entries.insert(tx.id.clone(), tx);
        Ok(())
    }

    pub fn get(&self, txid: &str) -> Option<PendingTransaction> {
        lock(&self.state).entries.get(txid).cloned()
    }

    /// Transactions still awaiting confirmation, oldest first.
    pub fn pending(&self) -> Vec<PendingTransaction> {
        let state = lock(&self.state);
        let mut pending: Vec<_> = state
            .entries
            .values()
            .filter(|tx| tx.status == TxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.timestamp);
        pending
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Updates the confirmation count.
    ///
    /// A mined transaction invalidates every replacement broadcast after it,
    /// so those are marked `Failed` as soon as it has a confirmation. Once the
    /// chain's threshold is reached the transaction, everything it replaced
    /// and every replacement of it are evicted, and the evicted records are
    /// returned.
    pub fn record_confirmations(&self, txid: &str, confirmations: u32) -> Vec<PendingTransaction> {
        let mut state = lock(&self.state);
        let Some(tx) = state.entries.get_mut(txid) else {
            return Vec::new();
        };
        tx.confirmations = confirmations;
        let threshold_reached = confirmations >= tx.chain.required_confirmations();
        if threshold_reached {
            tx.status = TxStatus::Confirmed;
        }
        let mut next = tx.replaces.clone();

        let mut descendants: Vec<String> = Vec::new();
        let mut next_replacement = tx.replaced_by.clone();
        while let Some(id) = next_replacement.take() {
            if id == txid || descendants.contains(&id) {
                break;
            }
            next_replacement = state.entries.get(&id).and_then(|r| r.replaced_by.clone());
            descendants.push(id);
        }

        if confirmations > 0 {
            for id in &descendants {
                if let Some(replacement) = state.entries.get_mut(id) {
                    if replacement.status == TxStatus::Pending {
                        warn!(
                            txid = %id,
                            confirmed = txid,
                            "Replacement lost to a mined transaction"
                        );
                        replacement.status = TxStatus::Failed;
                    }
                }
            }
        }
        if !threshold_reached {
            return Vec::new();
        }

        let mut lineage = vec![txid.to_string()];
        while let Some(id) = next.take().filter(|id| !lineage.contains(id)) {
            next = state.entries.get(&id).and_then(|record| record.replaces.clone());
            lineage.push(id);
        }
        lineage.extend(descendants);

        let mut evicted = Vec::new();
        for id in lineage {
            state.finished.remove(&id);
            if let Some(record) = state.entries.remove(&id) {
                evicted.push(record);
            }
        }
        info!(txid, evicted = evicted.len(), "Transaction confirmed");
        evicted
    }

    /// Marks a transaction the network dropped.
    pub fn mark_failed(&self, txid: &str) -> bool {
        let mut state = lock(&self.state);
        match state.entries.get_mut(txid) {
            Some(tx) => {
                tx.status = TxStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Current stage of the most recent replacement of `txid`.
    pub fn stage(&self, txid: &str) -> Option<ReplacementStage> {
        let state = lock(&self.state);
        state
            .in_flight
            .get(txid)
            .or_else(|| state.finished.get(txid))
            .copied()
    }

    pub fn export(&self) -> Vec<PendingTransaction> {
        let state = lock(&self.state);
        let mut records: Vec<_> = state.entries.values().cloned().collect();
        records.sort_by_key(|tx| tx.timestamp);
        records
    }

    /// Loads persisted records, replacing any with the same id.
    pub fn import(&self, records: Vec<PendingTransaction>) -> Result<usize> {
        for record in &records {
            record.validate()?;
        }
        let mut state = lock(&self.state);
        let count = records.len();
        for record in records {
            state.entries.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    /// Takes the replacement lock for `txid` and returns a snapshot of it.
    pub fn begin_replacement(
        &self,
        txid: &str,
    ) -> Result<(PendingTransaction, ReplacementGuard)> {
        let mut state = lock(&self.state);
        let tx = state
            .entries
            .get(txid)
            .cloned()
            .ok_or_else(|| ReplacementError::UnknownTransaction(txid.to_string()))?;
        tx.replaceability()?;

        if state.in_flight.contains_key(txid) {
            return Err(ReplacementError::AlreadyInProgress(txid.to_string()));
        }
        state.finished.remove(txid);
        state
            .in_flight
            .insert(txid.to_string(), ReplacementStage::Idle);

        Ok((
            tx,
            ReplacementGuard {
                txid: txid.to_string(),
                state: Arc::clone(&self.state),
            },
        ))
    }

    /// Records a broadcast replacement: the original becomes `Replaced` and,
    /// when given, the replacement is tracked in its place.
    pub fn complete_replacement(
        &self,
        guard: &ReplacementGuard,
        replacement_txid: &str,
        replacement: Option<PendingTransaction>,
    ) {
        let mut state = lock(&self.state);
        match state.entries.get_mut(&guard.txid) {
            Some(original) => {
                original.status = TxStatus::Replaced;
                original.replaced_by = Some(replacement_txid.to_string());
            }
            None => warn!(txid = %guard.txid, "Original left the store during replacement"),
        }
        if let Some(replacement) = replacement {
            state.entries.insert(replacement.id.clone(), replacement);
        }
    }
}

/// Holds the replacement lock of one transaction until dropped.
#[derive(Debug)]
pub struct ReplacementGuard {
    txid: String,
    state: Arc<Mutex<StoreState>>,
}

impl ReplacementGuard {
    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn advance(&self, stage: ReplacementStage) {
        debug!(txid = %self.txid, ?stage, "Replacement stage");
        lock(&self.state).in_flight.insert(self.txid.clone(), stage);
    }

    pub fn stage(&self) -> ReplacementStage {
        lock(&self.state)
            .in_flight
            .get(&self.txid)
            .copied()
            .unwrap_or(ReplacementStage::Idle)
    }
}

impl Drop for ReplacementGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let stage = match state.in_flight.remove(&self.txid) {
            Some(stage) if stage.is_terminal() => stage,
            _ => ReplacementStage::Failed,
        };
        state.finished.insert(self.txid.clone(), stage);
    }
}
