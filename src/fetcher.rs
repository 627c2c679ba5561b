use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{GatewayError, ResilientGateway};
use crate::models::RankedItem;

/// Default cap on item fetches in flight across the whole process.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Fetches many items through the gateway with a bounded number in flight.
///
/// The permit pool is shared by every call, so concurrent rebuilds (or any
/// other user of the same fetcher) together never exceed the cap.
#[derive(Clone)]
pub struct BoundedFetcher {
    gateway: Arc<ResilientGateway>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl BoundedFetcher {
    pub fn new(gateway: Arc<ResilientGateway>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            gateway,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn gateway(&self) -> &ResilientGateway {
        &self.gateway
    }

    /// Retrieves every id it can. Items that are missing or fail are left out;
    /// the result keeps the relative order of `ids`.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires before all fetches settle.
    pub async fn fetch_all(
        &self,
        ids: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedItem>, GatewayError> {
        let mut fetched: Vec<(usize, RankedItem)> = stream::iter(ids.iter().copied().enumerate())
            .map(|(pos, id)| async move {
                let item = self.fetch_one(id, cancel).await;
                (pos, id, item)
            })
            .buffer_unordered(self.max_in_flight)
            .filter_map(|(pos, id, item)| async move {
                match item {
                    Ok(Some(item)) => Some((pos, item)),
                    Ok(None) => {
                        debug!(id, "item not found, skipping");
                        None
                    }
                    Err(GatewayError::Cancelled) => None,
                    Err(err) => {
                        warn!(id, error = %err, "item fetch failed, skipping");
                        None
                    }
                }
            })
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        fetched.sort_unstable_by_key(|(pos, _)| *pos);
        Ok(fetched.into_iter().map(|(_, item)| item).collect())
    }

    async fn fetch_one(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<RankedItem>, GatewayError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| GatewayError::Cancelled)?,
        };
        self.gateway.get_item(id, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, Config};
    use crate::hn_client::{SourceClient, SourceError};
    use crate::retry::RetryPolicy;

    /// Records peak concurrency; odd ids are missing, ids divisible by 5 fail.
    #[derive(Default)]
    struct Tracking {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SourceClient for Tracking {
        async fn list_ids(&self) -> Result<Vec<u64>, SourceError> {
            Ok(Vec::new())
        }

        async fn get_item(&self, id: u64) -> Result<Option<RankedItem>, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if id % 5 == 0 {
                Err(SourceError::Status { status: 400 })
            } else if id % 2 == 1 {
                Ok(None)
            } else {
                Ok(Some(RankedItem::new(id, id as i64, format!("item {id}"))))
            }
        }
    }

    fn fetcher(client: Arc<Tracking>, cap: usize) -> BoundedFetcher {
        let gateway = ResilientGateway::new(
            client,
            RetryPolicy::none(),
            CircuitBreaker::new(Config::default()),
            Duration::from_secs(10),
        );
        BoundedFetcher::new(Arc::new(gateway), cap)
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_concurrency_cap() {
        let client = Arc::new(Tracking::default());
        let fetcher = fetcher(client.clone(), 10);
        let ids: Vec<u64> = (0..100).map(|i| i * 2 + 2).collect();

        let items = fetcher.fetch_all(&ids, &CancellationToken::new()).await.unwrap();

        assert!(!items.is_empty());
        assert_eq!(client.peak.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_cap_holds_across_concurrent_calls() {
        let client = Arc::new(Tracking::default());
        let fetcher = fetcher(client.clone(), 4);
        let ids: Vec<u64> = (1..=20).map(|i| i * 2).collect();
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            fetcher.fetch_all(&ids, &cancel),
            fetcher.fetch_all(&ids, &cancel)
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(client.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_missing_and_failed_items_and_keeps_source_order() {
        let client = Arc::new(Tracking::default());
        let fetcher = fetcher(client, 3);
        let ids = [8, 1, 10, 4, 3, 2];

        let items = fetcher.fetch_all(&ids, &CancellationToken::new()).await.unwrap();

        let got: Vec<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(got, vec![8, 4, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_missing_item_shrinks_the_result_by_one() {
        let client = Arc::new(Tracking::default());
        let fetcher = fetcher(client, 10);
        let ids = [2, 4, 6, 7];

        let items = fetcher.fetch_all(&ids, &CancellationToken::new()).await.unwrap();

        let got: HashSet<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(got, HashSet::from([2, 4, 6]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_fan_out() {
        let client = Arc::new(Tracking::default());
        let fetcher = fetcher(client, 2);
        let ids: Vec<u64> = (1..=50).map(|i| i * 2).collect();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let err = fetcher.fetch_all(&ids, &cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }
}
