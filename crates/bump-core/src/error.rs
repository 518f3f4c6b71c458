use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum BumpCoreError {
    #[snafu(display("No valid fee range: minimum {min} exceeds maximum {max}"))]
    PolicyViolation {
        min: u128,
        max: u128,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Input value {available} cannot cover {required}"))]
    InsufficientInputValue {
        available: u128,
        required: u128,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Unsupported chain: {chain}"))]
    UnsupportedChain {
        chain: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Transaction {txid} is not replaceable: {reason}"))]
    NotReplaceable {
        txid: String,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid pending transaction record {txid}: {reason}"))]
    InvalidRecord {
        txid: String,
        reason: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

pub type Result<T> = std::result::Result<T, BumpCoreError>;
