//! Top-N Hacker News best stories, served from a single-flight cache.
//!
//! Request path: [`http`] (admission control) → [`service`] (cache or
//! rebuild) → [`fetcher`] (bounded fan-out) → [`gateway`] (retry + circuit
//! breaker) → [`hn_client`].

pub mod admission;
pub mod circuit_breaker;
pub mod config;
pub mod fetcher;
pub mod gateway;
pub mod hn_client;
pub mod http;
pub mod logging;
pub mod models;
pub mod retry;
pub mod service;

use std::sync::Arc;

pub use admission::AdmissionController;
pub use circuit_breaker::CircuitBreaker;
pub use config::AppConfig;
pub use fetcher::BoundedFetcher;
pub use gateway::{GatewayError, ResilientGateway};
pub use hn_client::{HackerNewsClient, SourceClient, SourceError};
pub use http::{create_router, AppState};
pub use models::{AggregateEntry, CacheSnapshot, RankedItem};
pub use service::{BestStoriesService, ServiceError};

/// Wires the components from `config` around `client`.
pub fn build_state(config: &AppConfig, client: Arc<dyn SourceClient>) -> AppState {
    let gateway = Arc::new(ResilientGateway::new(
        client,
        config.retry_policy(),
        CircuitBreaker::new(config.breaker_config()),
        config.request_timeout(),
    ));
    let fetcher = BoundedFetcher::new(gateway, config.fetch.max_concurrency);
    let service = Arc::new(BestStoriesService::new(fetcher, config.service_config()));
    let admission = Arc::new(AdmissionController::new(config.admission_config()));

    AppState::new(service, admission)
}
