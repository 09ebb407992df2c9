//! Bounded retry around an [`ApiClient`].
//!
//! Transient failures (timeouts, 5xx, connection errors) back off
//! exponentially, 429s wait a growing cool-down on their own schedule, and
//! everything else surfaces immediately.

use crate::http::client::{ApiClient, ApiResponse, QueryParams};
use crate::http::error::{FetchError, FetchErrorKind};
use log::{debug, error, warn};
use std::time::Duration;

/// Parameters of the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on top of the first attempt.
    pub max_retries: u32,
    /// First transient backoff; doubles on every further transient retry.
    pub backoff_base: Duration,
    /// Cool-down unit after a 429, multiplied by the number of 429s seen.
    pub rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            rate_limit_wait: Duration::from_secs(60),
        }
    }
}

/// Bookkeeping for one logical request across its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub retries: u32,
    pub transient_retries: u32,
    pub rate_limit_hits: u32,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable(kind: FetchErrorKind) -> bool {
        match kind {
            FetchErrorKind::Timeout
            | FetchErrorKind::ServerError
            | FetchErrorKind::NetworkError
            | FetchErrorKind::RateLimited => true,
            FetchErrorKind::ClientError | FetchErrorKind::MalformedResponse => false,
        }
    }

    /// Returns how long to wait before the next attempt, or `None` when the
    /// failure is terminal. Updates `state` when a retry is granted.
    pub fn next_delay(&self, state: &mut RetryState, kind: FetchErrorKind) -> Option<Duration> {
        if !Self::is_retryable(kind) || state.retries >= self.max_retries {
            return None;
        }
        state.retries += 1;

        if kind == FetchErrorKind::RateLimited {
            state.rate_limit_hits += 1;
            return Some(self.rate_limit_wait.saturating_mul(state.rate_limit_hits));
        }

        let factor = 1u32 << state.transient_retries.min(16);
        state.transient_retries += 1;
        Some(self.backoff_base.saturating_mul(factor))
    }
}

pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Wraps an [`ApiClient`] with the retry schedule and the fixed delay that
/// follows every successful request.
pub struct Fetcher<C> {
    client: C,
    policy: RetryPolicy,
    request_delay: Duration,
}

impl<C: ApiClient> Fetcher<C> {
    pub fn new(client: C, policy: RetryPolicy, request_delay: Duration) -> Self {
        Self {
            client,
            policy,
            request_delay,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<ApiResponse, FetchError> {
        let mut state = RetryState::default();
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            debug!("Requesting {} (attempt {}/{})", endpoint, attempt, max_attempts);
            match self.client.get(endpoint, params).await {
                Ok(response) => {
                    pause(self.request_delay).await;
                    return Ok(response);
                }
                Err(e) => match self.policy.next_delay(&mut state, e.kind()) {
                    Some(delay) => {
                        warn!(
                            "{} for {} (attempt {}/{}), retrying in {:?}",
                            e.kind(),
                            endpoint,
                            attempt,
                            max_attempts,
                            delay
                        );
                        pause(delay).await;
                        attempt += 1;
                    }
                    None => {
                        error!(
                            "Giving up on {} after {} attempt(s) [{}]: {}",
                            endpoint,
                            attempt,
                            e.kind(),
                            e
                        );
                        return Err(e);
                    }
                },
            }
        }
    }
}
