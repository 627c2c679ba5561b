//! Single-flight cache in front of the best stories aggregate.
//!
//! One gate guards the single cache slot. A caller holding the gate either
//! serves from a fresh snapshot or rebuilds it; everyone else waits on the
//! gate and re-checks the slot once they get it, so N concurrent misses
//! produce one rebuild. Failed rebuilds are not cached: the next caller
//! through the gate simply tries again.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetcher::BoundedFetcher;
use crate::gateway::GatewayError;
use crate::models::{AggregateEntry, CacheSnapshot};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_COUNT: usize = 100;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The breaker is open; no network attempt was made.
    #[error("best stories are temporarily unavailable")]
    Unavailable,

    #[error("failed to build best stories: {0}")]
    Upstream(GatewayError),

    #[error("request cancelled")]
    Cancelled,
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CircuitOpen => ServiceError::Unavailable,
            GatewayError::Cancelled => ServiceError::Cancelled,
            other => ServiceError::Upstream(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub ttl: Duration,
    pub max_count: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

pub struct BestStoriesService {
    fetcher: BoundedFetcher,
    cfg: ServiceConfig,
    slot: Mutex<Option<CacheSnapshot>>,
}

impl BestStoriesService {
    pub fn new(fetcher: BoundedFetcher, cfg: ServiceConfig) -> Self {
        Self {
            fetcher,
            cfg,
            slot: Mutex::new(None),
        }
    }

    /// The `count` highest scored stories, best first.
    ///
    /// `count <= 0` returns immediately without touching the gate. Larger
    /// values are clamped to the configured maximum.
    pub async fn get_top(
        &self,
        count: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<AggregateEntry>, ServiceError> {
        if count <= 0 {
            return Ok(Vec::new());
        }
        let count = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .min(self.cfg.max_count);

        let waited_since = Instant::now();
        let mut slot = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            guard = self.slot.lock() => guard,
        };

        if let Some(snapshot) = slot.as_ref() {
            // Accepted staleness: a fresh snapshot long enough is served as-is.
            // One rebuilt while we queued is served even when short: it is
            // the result of the rebuild we were waiting on.
            let rebuilt_for_us = snapshot.computed_at() >= waited_since;
            if snapshot.is_fresh(Instant::now(), self.cfg.ttl)
                && (snapshot.len() >= count || rebuilt_for_us)
            {
                debug!(count, cached = snapshot.len(), "serving best stories from cache");
                return Ok(snapshot.top(count));
            }
        }

        let snapshot = self.rebuild(cancel).await?;
        let top = snapshot.top(count);
        *slot = Some(snapshot);
        Ok(top)
    }

    async fn rebuild(&self, cancel: &CancellationToken) -> Result<CacheSnapshot, ServiceError> {
        let started = Instant::now();

        let ids = self.fetch_ids(cancel).await?;
        let ids: Vec<u64> = ids.into_iter().take(self.cfg.max_count).collect();

        // Item failures are dropped inside the fetcher; only cancellation surfaces here.
        let items = self.fetcher.fetch_all(&ids, cancel).await?;

        let entries = items.iter().map(AggregateEntry::from).collect();
        let snapshot = CacheSnapshot::new(entries, Instant::now());

        if snapshot.is_empty() {
            warn!(ids = ids.len(), "rebuilt best stories cache is empty");
        }
        info!(
            ids = ids.len(),
            stories = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt best stories cache"
        );
        Ok(snapshot)
    }

    async fn fetch_ids(&self, cancel: &CancellationToken) -> Result<Vec<u64>, ServiceError> {
        self.fetcher.gateway().list_ids(cancel).await.map_err(|err| {
            match &err {
                GatewayError::Cancelled => debug!("best stories rebuild cancelled"),
                _ => warn!(error = %err, "failed to fetch best story ids"),
            }
            ServiceError::from(err)
        })
    }

    /// Installs `entries` as the current snapshot, fresh as of now.
    pub async fn seed(&self, entries: Vec<AggregateEntry>) {
        let snapshot = CacheSnapshot::new(entries, Instant::now());
        *self.slot.lock().await = Some(snapshot);
    }

    /// The current snapshot, fresh or not.
    pub async fn snapshot(&self) -> Option<CacheSnapshot> {
        self.slot.lock().await.clone()
    }

    /// Builds the cache ahead of the first request.
    pub async fn warm_up(&self) -> Result<usize, ServiceError> {
        let cancel = CancellationToken::new();
        let stories = self.get_top(self.cfg.max_count as i64, &cancel).await?;
        Ok(stories.len())
    }
}
