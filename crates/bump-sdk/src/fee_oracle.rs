//! Per-chain mempool fee data.
//!
//! A [`MempoolFeeOracle`] fetches the three fee tiers for a chain. The
//! network clients in [`crate::mempool_client`] and [`crate::evm_client`]
//! implement it directly; [`CachedFeeOracle`] adds the freshness window and
//! stale fallback, [`RoutedFeeOracle`] dispatches by chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bump_core::{ChainId, MempoolInfo};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{ReplacementError, Result};

#[async_trait::async_trait]
pub trait MempoolFeeOracle: Send + Sync {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo>;
}

#[async_trait::async_trait]
impl<T: MempoolFeeOracle + ?Sized> MempoolFeeOracle for Arc<T> {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
        (**self).fetch(chain).await
    }
}

/// Forces `fastest >= half_hour >= hour`, which some endpoints violate for a
/// block or two after a reorg.
pub fn order_tiers(mut info: MempoolInfo) -> MempoolInfo {
    info.half_hour_fee = info.half_hour_fee.min(info.fastest_fee);
    info.hour_fee = info.hour_fee.min(info.half_hour_fee);
    info
}

/// Serves cached tiers inside the freshness window and falls back to the
/// last known tiers, marked stale, when a refresh fails.
pub struct CachedFeeOracle<O> {
    inner: O,
    freshness: Duration,
    cache: RwLock<HashMap<ChainId, MempoolInfo>>,
}

impl<O: MempoolFeeOracle> CachedFeeOracle<O> {
    pub fn new(inner: O, freshness: Duration) -> Self {
        Self {
            inner,
            freshness,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached(&self, chain: ChainId) -> Option<MempoolInfo> {
        self.cache.read().await.get(&chain).cloned()
    }
}

#[async_trait::async_trait]
impl<O: MempoolFeeOracle> MempoolFeeOracle for CachedFeeOracle<O> {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
        let now = Utc::now();
        let cached = self.cache.read().await.get(&chain).cloned();

        if let Some(mut info) = cached.clone() {
            if info.age(now) < self.freshness {
                info.refresh_staleness(now, self.freshness);
                return Ok(info);
            }
        }

        match self.inner.fetch(chain).await {
            Ok(info) => {
                let info = order_tiers(info);
                info!(
                    chain = %chain,
                    fastest = info.fastest_fee,
                    half_hour = info.half_hour_fee,
                    hour = info.hour_fee,
                    "Refreshed fee tiers"
                );
                self.cache.write().await.insert(chain, info.clone());
                Ok(info)
            }
            Err(e) => match cached {
                Some(mut stale) => {
                    warn!(chain = %chain, error = %e, "Fee refresh failed, serving stale tiers");
                    stale.refresh_staleness(now, self.freshness);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

/// Dispatches fee requests to the oracle registered for each chain.
#[derive(Default, Clone)]
pub struct RoutedFeeOracle {
    routes: HashMap<ChainId, Arc<dyn MempoolFeeOracle>>,
}

impl RoutedFeeOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, chain: ChainId, oracle: Arc<dyn MempoolFeeOracle>) -> Self {
        self.routes.insert(chain, oracle);
        self
    }

    pub fn supports(&self, chain: ChainId) -> bool {
        self.routes.contains_key(&chain)
    }
}

#[async_trait::async_trait]
impl MempoolFeeOracle for RoutedFeeOracle {
    async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
        let oracle = self
            .routes
            .get(&chain)
            .ok_or_else(|| ReplacementError::UnsupportedChain(chain.to_string()))?;
        oracle.fetch(chain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bump_core::UtxoChain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BTC: ChainId = ChainId::Utxo(UtxoChain::Bitcoin);

    /// Answers the first `succeed_for` calls, then fails.
    struct FlakyOracle {
        calls: AtomicUsize,
        succeed_for: usize,
    }

    impl FlakyOracle {
        fn new(succeed_for: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed_for,
            }
        }
    }

    #[async_trait::async_trait]
    impl MempoolFeeOracle for FlakyOracle {
        async fn fetch(&self, chain: ChainId) -> Result<MempoolInfo> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed_for {
                Ok(MempoolInfo::new(chain, 20, 10, 6, 1_000))
            } else {
                Err(ReplacementError::NetworkError("connection refused".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served_without_refetch() {
        let oracle = CachedFeeOracle::new(FlakyOracle::new(1), Duration::from_secs(120));

        let first = oracle.fetch(BTC).await.unwrap();
        let second = oracle.fetch(BTC).await.unwrap();

        assert_eq!(oracle.inner.calls.load(Ordering::SeqCst), 1);
        assert!(second.fastest_fee >= first.fastest_fee);
        assert!(second.half_hour_fee >= first.half_hour_fee);
        assert!(second.hour_fee >= first.hour_fee);
        assert!(!second.is_stale);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_stale_tiers() {
        let oracle = CachedFeeOracle::new(FlakyOracle::new(1), Duration::from_millis(20));

        let first = oracle.fetch(BTC).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = oracle.fetch(BTC).await.unwrap();

        assert_eq!(oracle.inner.calls.load(Ordering::SeqCst), 2);
        assert!(second.is_stale);
        assert_eq!(second.fastest_fee, first.fastest_fee);
    }

    #[tokio::test]
    async fn test_failure_without_cache_is_an_error() {
        let oracle = CachedFeeOracle::new(FlakyOracle::new(0), Duration::from_secs(120));
        let err = oracle.fetch(BTC).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unrouted_chain_is_unsupported() {
        let routed = RoutedFeeOracle::new().route(BTC, Arc::new(FlakyOracle::new(1)));
        assert!(routed.fetch(BTC).await.is_ok());

        let err = routed
            .fetch(ChainId::Utxo(UtxoChain::BitcoinSignet))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplacementError::UnsupportedChain(_)));
    }

    #[test]
    fn test_order_tiers() {
        let info = order_tiers(MempoolInfo::new(BTC, 10, 12, 15, 0));
        assert_eq!((info.fastest_fee, info.half_hour_fee, info.hour_fee), (10, 10, 10));
    }
}
