//! Submission of signed replacements.
//!
//! Node rejections arrive as free text. They are classified into a
//! [`RejectReason`] here, once, so nothing downstream inspects messages.

use std::collections::HashMap;
use std::sync::Arc;

use bump_core::ChainId;

use crate::errors::{RejectReason, ReplacementError, Result};

#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submits a signed transaction and returns the id the network accepted.
    async fn submit(&self, signed_tx_hex: &str, chain: ChainId) -> Result<String>;
}

const UTXO_FEE_TOO_LOW: &[&str] = &[
    "insufficient fee",
    "rejecting replacement",
    "min relay fee not met",
    "mempool min fee not met",
];
const UTXO_INPUTS_SPENT: &[&str] = &["missingorspent", "missing-inputs", "missing inputs"];
const UTXO_ALREADY_KNOWN: &[&str] = &["txn-already-in-mempool", "txn-already-known"];

const EVM_FEE_TOO_LOW: &[&str] = &[
    "replacement transaction underpriced",
    "transaction underpriced",
    "fee too low",
    "max fee per gas less than block base fee",
];
const EVM_NONCE_USED: &[&str] = &["nonce too low", "nonce has already been used"];
const EVM_ALREADY_KNOWN: &[&str] = &["already known", "known transaction"];

/// Maps a node's rejection text to a reason.
pub fn classify_rejection(chain: ChainId, message: &str) -> RejectReason {
    let message = message.to_ascii_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

    let reason = match chain {
        ChainId::Utxo(_) => {
            if matches(UTXO_FEE_TOO_LOW) {
                Some(RejectReason::FeeTooLowForReplacement)
            } else if matches(UTXO_INPUTS_SPENT) {
                Some(RejectReason::InputsMissingOrSpent)
            } else if matches(UTXO_ALREADY_KNOWN) {
                Some(RejectReason::AlreadyKnown)
            } else {
                None
            }
        }
        ChainId::Account(_) => {
            if matches(EVM_FEE_TOO_LOW) {
                Some(RejectReason::FeeTooLowForReplacement)
            } else if matches(EVM_NONCE_USED) {
                Some(RejectReason::NonceAlreadyUsed)
            } else if matches(EVM_ALREADY_KNOWN) {
                Some(RejectReason::AlreadyKnown)
            } else {
                None
            }
        }
    };

    reason.unwrap_or_else(|| {
        if message.contains("insufficient funds") {
            RejectReason::InsufficientFunds
        } else {
            RejectReason::Other
        }
    })
}

/// Builds the rejection error for `message`.
pub fn rejection(chain: ChainId, message: impl Into<String>) -> ReplacementError {
    let message = message.into();
    ReplacementError::BroadcastRejected {
        reason: classify_rejection(chain, &message),
        message,
    }
}

/// Dispatches submissions to the broadcaster registered for each chain.
#[derive(Default, Clone)]
pub struct RoutedBroadcaster {
    routes: HashMap<ChainId, Arc<dyn Broadcaster>>,
}

impl RoutedBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, chain: ChainId, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.routes.insert(chain, broadcaster);
        self
    }
}

#[async_trait::async_trait]
impl Broadcaster for RoutedBroadcaster {
    async fn submit(&self, signed_tx_hex: &str, chain: ChainId) -> Result<String> {
        let broadcaster = self
            .routes
            .get(&chain)
            .ok_or_else(|| ReplacementError::UnsupportedChain(chain.to_string()))?;
        broadcaster.submit(signed_tx_hex, chain).await
    }
}
