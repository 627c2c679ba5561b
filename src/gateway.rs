//! The only component that talks to the upstream source.
//!
//! Every call goes through the circuit breaker, carries its own timeout and is
//! retried with exponential backoff while the failure is transient.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::circuit_breaker::{BreakerOpen, CircuitBreaker};
use crate::hn_client::{FailureKind, SourceClient, SourceError};
use crate::models::RankedItem;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("upstream unavailable: circuit breaker is open")]
    CircuitOpen,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cancelled by caller")]
    Cancelled,
}

impl From<BreakerOpen> for GatewayError {
    fn from(_: BreakerOpen) -> Self {
        GatewayError::CircuitOpen
    }
}

pub struct ResilientGateway {
    client: Arc<dyn SourceClient>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    call_timeout: Duration,
}

impl ResilientGateway {
    pub fn new(
        client: Arc<dyn SourceClient>,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            breaker,
            call_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn list_ids(&self, cancel: &CancellationToken) -> Result<Vec<u64>, GatewayError> {
        self.call("list_ids", cancel, || self.client.list_ids()).await
    }

    pub async fn get_item(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<RankedItem>, GatewayError> {
        self.call("get_item", cancel, || self.client.get_item(id)).await
    }

    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let permit = self.breaker.try_acquire()?;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                res = tokio::time::timeout(self.call_timeout, f()) => {
                    res.unwrap_or(Err(SourceError::Timeout))
                }
            };

            let err = match outcome {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.kind() {
                FailureKind::Permanent => {
                    permit.success();
                    debug!(op, error = %err, "permanent upstream failure, not retrying");
                    return Err(err.into());
                }
                FailureKind::Transient => permit.failure(),
            }

            if attempt + 1 >= max_attempts {
                warn!(op, attempts = attempt + 1, error = %err, "upstream retries exhausted");
                return Err(err.into());
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                op,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient upstream failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
