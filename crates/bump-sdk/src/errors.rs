use std::fmt;
use std::time::Duration;

use bump_core::{BumpCoreError, CancellationResult, ReplacementMode};

/// Why a node refused a replacement, classified once at the broadcast boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    FeeTooLowForReplacement,
    NonceAlreadyUsed,
    AlreadyKnown,
    InsufficientFunds,
    InputsMissingOrSpent,
    Other,
}

impl RejectReason {
    pub fn describe(&self) -> &'static str {
        match self {
            RejectReason::FeeTooLowForReplacement => {
                "fee too low to replace the original transaction"
            }
            RejectReason::NonceAlreadyUsed => {
                "nonce already used; the original has likely confirmed"
            }
            RejectReason::AlreadyKnown => "an identical transaction is already in the mempool",
            RejectReason::InsufficientFunds => "insufficient funds to pay the replacement fee",
            RejectReason::InputsMissingOrSpent => {
                "inputs are missing or already spent; the original has likely confirmed"
            }
            RejectReason::Other => "rejected by the network",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplacementError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("No valid fee range: minimum {min} exceeds maximum {max}")]
    PolicyViolation { min: u128, max: u128 },

    #[error("Insufficient input value: {available} available, {required} required")]
    InsufficientInputValue { available: u128, required: u128 },

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Broadcast rejected, {reason}: {message}")]
    BroadcastRejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Broadcast timed out after {0:?}")]
    BroadcastTimeout(Duration),

    #[error("Transaction {txid} is not replaceable: {reason}")]
    NotReplaceable { txid: String, reason: String },

    #[error("A replacement for {0} is already in progress")]
    AlreadyInProgress(String),

    #[error("Replacement for {0} was cancelled before broadcast")]
    Cancelled(String),

    #[error("Unknown pending transaction: {0}")]
    UnknownTransaction(String),

    #[error("Invalid transaction data: {0}")]
    InvalidTransaction(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Key provider error: {0}")]
    KeyProvider(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Replacement task failed: {0}")]
    Internal(String),
}

impl ReplacementError {
    /// Network failures can be retried by the user as is; everything else
    /// needs different inputs or a changed network state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplacementError::NetworkError(_) | ReplacementError::BroadcastTimeout(_)
        )
    }

    /// Flattens the error into the caller-facing result record.
    pub fn into_result(self, original_txid: &str, mode: ReplacementMode) -> CancellationResult {
        CancellationResult::failed(original_txid, mode, self.to_string())
    }
}

impl From<BumpCoreError> for ReplacementError {
    fn from(err: BumpCoreError) -> Self {
        match err {
            BumpCoreError::PolicyViolation { min, max, .. } => {
                ReplacementError::PolicyViolation { min, max }
            }
            BumpCoreError::InsufficientInputValue {
                available,
                required,
                ..
            } => ReplacementError::InsufficientInputValue {
                available,
                required,
            },
            BumpCoreError::UnsupportedChain { chain, .. } => {
                ReplacementError::UnsupportedChain(chain)
            }
            BumpCoreError::NotReplaceable { txid, reason, .. } => {
                ReplacementError::NotReplaceable { txid, reason }
            }
            BumpCoreError::InvalidRecord { txid, reason, .. } => {
                ReplacementError::InvalidTransaction(format!("{txid}: {reason}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplacementError>;
