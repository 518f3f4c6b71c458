//! Tunables for the replacement pipeline.

use std::time::Duration;

use bump_core::PolicyParams;

use crate::errors::{ReplacementError, Result};

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct ReplacementConfig {
    /// How long fetched fee data counts as fresh
    pub fee_freshness: Duration,
    /// Upper bound on a single fee oracle call
    pub oracle_timeout: Duration,
    /// Upper bound on a single broadcast
    pub broadcast_timeout: Duration,
    /// Incremental relay fee in sat/vB
    pub utxo_min_relay_increment: u64,
    /// Outputs below this many sats are not created
    pub utxo_dust_limit: u64,
    /// Minimum gas price bump in percent
    pub account_min_bump_percent: u8,
    /// Minimum absolute gas price bump in wei
    pub account_min_increment_wei: u128,
    /// Maximum replacement rate as a multiple of the fastest tier
    pub max_fee_multiplier: u128,
    /// Insert successful replacements into the pending store
    pub track_replacements: bool,
}

impl Default for ReplacementConfig {
    fn default() -> Self {
        Self {
            fee_freshness: Duration::from_secs(120),
            oracle_timeout: Duration::from_secs(10),
            broadcast_timeout: Duration::from_secs(15),
            utxo_min_relay_increment: 1,
            utxo_dust_limit: 546,
            account_min_bump_percent: 10,
            account_min_increment_wei: GWEI,
            max_fee_multiplier: 5,
            track_replacements: true,
        }
    }
}

impl ReplacementConfig {
    pub fn validate(&self) -> Result<()> {
        if self.utxo_min_relay_increment == 0 {
            return Err(ReplacementError::Config(
                "utxo_min_relay_increment must be greater than 0".to_string(),
            ));
        }

        if self.account_min_bump_percent > 100 {
            return Err(ReplacementError::Config(format!(
                "Invalid account_min_bump_percent: {} (must be <= 100)",
                self.account_min_bump_percent
            )));
        }

        if self.max_fee_multiplier == 0 {
            return Err(ReplacementError::Config(
                "max_fee_multiplier must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("fee_freshness", self.fee_freshness),
            ("oracle_timeout", self.oracle_timeout),
            ("broadcast_timeout", self.broadcast_timeout),
        ] {
            if value.is_zero() {
                return Err(ReplacementError::Config(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }

    pub fn policy_params(&self) -> PolicyParams {
        PolicyParams {
            utxo_min_relay_increment: self.utxo_min_relay_increment as u128,
            account_min_bump_percent: self.account_min_bump_percent,
            account_min_increment: self.account_min_increment_wei,
            max_fee_multiplier: self.max_fee_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReplacementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy_params(), PolicyParams::default());
    }

    #[test]
    fn test_rejects_zero_relay_increment() {
        let config = ReplacementConfig {
            utxo_min_relay_increment: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReplacementError::Config(_))));
    }

    #[test]
    fn test_rejects_out_of_range_bump_percent() {
        let config = ReplacementConfig {
            account_min_bump_percent: 150,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
