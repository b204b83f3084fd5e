//! Deadline and retry enforcement around one logical outbound operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{RawResponse, RequestSpec};
use crate::transport::{Transport, TransportSource};
use crate::{Result, SearchError};

/// Scheduling slack granted on top of the configured total, so a call
/// dispatched just under the wire is not killed by timer jitter.
const OVERHEAD_EPSILON: Duration = Duration::from_millis(50);

/// Retry strategy for qualifying failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Acquire a fresh egress binding and re-run the entire operation,
    /// so a multi-step exchange restarts atomically on one identity.
    #[default]
    WholeOperation,
    /// Retry only the single outbound send on the same handle.
    SameTransport,
    /// Retry the single outbound send on a freshly rotated handle.
    RotatedTransport,
}

/// A shrinking time budget for one logical operation.
///
/// `remaining()` is `total - elapsed + epsilon`; once the total has
/// elapsed, any further wait fails with [`SearchError::Timeout`].
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    start: Instant,
    total: Duration,
    epsilon: Duration,
}

impl DeadlineBudget {
    /// Starts a budget of `total` from now.
    pub fn new(total: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
            epsilon: OVERHEAD_EPSILON,
        }
    }

    /// Starts a budget with a custom overhead epsilon.
    pub fn with_epsilon(total: Duration, epsilon: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
            epsilon,
        }
    }

    /// Time left, including the overhead epsilon.
    pub fn remaining(&self) -> Duration {
        (self.total + self.epsilon).saturating_sub(self.start.elapsed())
    }

    /// Whether the total has elapsed.
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.total
    }

    /// Remaining budget, optionally capped by a finer per-call override.
    ///
    /// Fails with [`SearchError::Timeout`] once the budget is exhausted,
    /// so no single call can exceed the overall deadline.
    pub fn checked_remaining(&self, cap: Option<Duration>) -> Result<Duration> {
        if self.expired() {
            return Err(SearchError::Timeout);
        }
        let remaining = self.remaining();
        Ok(cap.map_or(remaining, |cap| remaining.min(cap)))
    }
}

/// Typed outcome of evaluating one response inside the retry loop.
///
/// Soft retries carry no exception semantics: the response stays a value,
/// and the caller accepts the last one when retries run out.
#[derive(Debug)]
pub enum SendOutcome {
    /// Response is acceptable; return it.
    Accepted,
    /// Response qualifies for a soft retry (configured status).
    SoftRetry,
    /// Response is a hard failure.
    Failed(SearchError),
}

/// Options for constructing a [`ResilienceContext`].
#[derive(Debug, Clone, Default)]
pub struct ResilienceOptions {
    /// Retries on qualifying failures (total attempts = retries + 1).
    pub retries: u32,
    /// Retry strategy.
    pub policy: RetryPolicy,
    /// Statuses retried softly, last response accepted on exhaustion.
    pub soft_retry_statuses: Vec<u16>,
    /// Default per-call timeout applied on top of the remaining budget.
    pub request_timeout: Option<Duration>,
}

/// Wraps a deadline and a retry policy around one logical operation and
/// owns the live transport for it.
pub struct ResilienceContext {
    source: Arc<dyn TransportSource>,
    transport: Arc<dyn Transport>,
    deadline: DeadlineBudget,
    opts: ResilienceOptions,
    network_time: Duration,
    // 1-based whole-operation attempt, advanced by `run`.
    operation_attempt: u32,
    // Set by `send` when a soft status must re-run the whole operation.
    soft_retry_pending: bool,
}

impl ResilienceContext {
    /// Acquires the initial transport and opens the context.
    pub async fn acquire(
        source: Arc<dyn TransportSource>,
        deadline: DeadlineBudget,
        opts: ResilienceOptions,
    ) -> Result<Self> {
        let transport = source.next_transport().await?;
        Ok(Self {
            source,
            transport,
            deadline,
            opts,
            network_time: Duration::ZERO,
            operation_attempt: 1,
            soft_retry_pending: false,
        })
    }

    /// The context's deadline budget.
    pub fn deadline(&self) -> &DeadlineBudget {
        &self.deadline
    }

    /// Accumulated outbound time, for diagnostics.
    pub fn network_time(&self) -> Duration {
        self.network_time
    }

    /// Remaining budget, optionally capped by a finer per-call override.
    pub fn get_remaining(&self, cap: Option<Duration>) -> Result<Duration> {
        self.deadline
            .checked_remaining(cap.or(self.opts.request_timeout))
    }

    async fn rotate_transport(&mut self) -> Result<()> {
        self.transport = self.source.next_transport().await?;
        Ok(())
    }

    /// Runs the whole operation under the configured policy.
    ///
    /// With [`RetryPolicy::WholeOperation`], a qualifying failure — a
    /// retryable transport error or a configured soft-retry status — rotates
    /// to a fresh binding and re-runs `op` from scratch, at most
    /// `retries + 1` times. Other policies run `op` once and retry inside
    /// [`ResilienceContext::send`].
    pub async fn run<T, F>(&mut self, mut op: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        if self.opts.policy != RetryPolicy::WholeOperation {
            return op(self).await;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.operation_attempt = attempt;
            self.soft_retry_pending = false;
            match op(self).await {
                Ok(value) => return Ok(value),
                Err(e)
                    if (e.is_retryable() || self.soft_retry_pending)
                        && attempt <= self.opts.retries
                        && !self.deadline.expired() =>
                {
                    debug!(attempt, error = %e, "Retrying whole operation on fresh binding");
                    self.rotate_transport().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes one outbound send, time-boxed by the remaining budget.
    ///
    /// Under [`RetryPolicy::SameTransport`] and
    /// [`RetryPolicy::RotatedTransport`] the send itself is retried on
    /// qualifying failures, on the same or a freshly rotated handle.
    pub async fn send(
        &mut self,
        spec: &RequestSpec,
        timeout_override: Option<Duration>,
    ) -> Result<RawResponse> {
        let attempts = match self.opts.policy {
            RetryPolicy::WholeOperation => 1,
            _ => self.opts.retries + 1,
        };

        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 && self.opts.policy == RetryPolicy::RotatedTransport {
                self.rotate_transport().await?;
            }

            let timeout = self.get_remaining(timeout_override)?;
            let started = Instant::now();
            let sent = self.transport.send(spec, timeout).await;
            self.network_time += started.elapsed();

            match sent {
                Ok(response) => match self.evaluate(&response) {
                    SendOutcome::Accepted => return Ok(response),
                    SendOutcome::SoftRetry => {
                        // A soft status consumes a whole-operation attempt
                        // under WholeOperation, a send attempt otherwise.
                        let exhausted = match self.opts.policy {
                            RetryPolicy::WholeOperation => {
                                self.operation_attempt > self.opts.retries
                            }
                            _ => attempt + 1 == attempts,
                        };
                        if exhausted {
                            debug!(
                                status = response.status,
                                "Soft retries exhausted, accepting last response"
                            );
                            return Ok(response);
                        }
                        let err = SearchError::from_status(response.status);
                        if self.opts.policy == RetryPolicy::WholeOperation {
                            self.soft_retry_pending = true;
                            return Err(err);
                        }
                        last_err = Some(err);
                    }
                    SendOutcome::Failed(e) => return Err(e),
                },
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    debug!(attempt, error = %e, "Retrying send");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(SearchError::Timeout))
    }

    /// Classifies a response into the typed outcome the retry loop consumes.
    fn evaluate(&self, response: &RawResponse) -> SendOutcome {
        if self.opts.soft_retry_statuses.contains(&response.status) {
            return SendOutcome::SoftRetry;
        }
        match response.status {
            429 => SendOutcome::Failed(if response.is_captcha() {
                SearchError::Captcha
            } else {
                SearchError::RateLimited
            }),
            402 | 403 => SendOutcome::Failed(if response.is_captcha() {
                SearchError::Captcha
            } else {
                SearchError::AccessDenied {
                    status: response.status,
                }
            }),
            503 if response.is_captcha() => SendOutcome::Failed(SearchError::Captcha),
            status if status >= 300 => {
                SendOutcome::Failed(SearchError::Http { status })
            }
            _ => SendOutcome::Accepted,
        }
    }
}
