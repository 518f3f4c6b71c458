pub mod chain;
pub mod error;
pub mod policy;
pub mod types;

pub use chain::{AccountChain, ChainId, FeeUnit, UtxoChain};
pub use error::{BumpCoreError, Result};
pub use policy::{FeeBumpPolicy, PolicyParams};
pub use types::{
    CancellationResult, FeeRange, FeeSelection, MempoolInfo, PendingTransaction,
    ReplacementMode, ReplacementStage, TxStatus, UtxoRef,
};
