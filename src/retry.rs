//! Polling a GET endpoint until its response meets an [`Expectation`].
//!
//! # Overview
//!
//! A [`RetryLoop`] sends the same request, evaluates each response with the
//! [condition matcher](crate::matcher), and sleeps a fixed interval between
//! attempts. It ends in one of three ways:
//!
//! - **Matched**: `Ok(RetryOutcome)`.
//! - **Exhausted**: the budget ran out; [`RetryError::Exhausted`].
//! - **Hard error**: a failure no retry can fix (cancellation, a malformed
//!   request); [`RetryError::Hard`].
//!
//! Transport, timeout and body-read failures count as unmatched attempts.
//!
//! # Budget
//!
//! [`RetryBudget::Limited(n)`](RetryBudget::Limited) allows the initial attempt
//! plus `n` retries. A count of `0` maps to [`RetryBudget::Unlimited`] through
//! [`RetryBudget::from_count`]: the loop then only stops on a match or a hard
//! error.
//!
//! # Example
//!
//! ```no_run
//! use zurl_core::{Expectation, HttpClient, RetryBudget, RetryLoop};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let outcome = RetryLoop::builder("https://example.com/health")
//!     .expectation(Expectation::StatusCode(200))
//!     .budget(RetryBudget::Limited(5))
//!     .interval(Duration::from_secs(2))
//!     .build()?
//!     .run(&client)
//!     .await?;
//! println!("healthy after {} attempts", outcome.attempts());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::HttpClient;
use crate::error::{ConfigError, RequestError};
use crate::matcher::{self, Expectation, MatchReport};
use crate::request::{Method, Params, Request};

/// Default pause between attempts (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// How many retries follow the initial attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBudget {
    /// Up to `n` retries after the first attempt.
    Limited(u32),
    /// Keep going until matched or a hard error.
    #[default]
    Unlimited,
}

impl RetryBudget {
    /// Maps an operator-facing count, where `0` means "never stop".
    #[must_use]
    pub fn from_count(count: u32) -> Self {
        if count == 0 {
            Self::Unlimited
        } else {
            Self::Limited(count)
        }
    }

    /// Whether another attempt may follow `retries_done` retries.
    #[must_use]
    pub fn allows_retry(self, retries_done: u32) -> bool {
        match self {
            Self::Limited(max) => retries_done < max,
            Self::Unlimited => true,
        }
    }
}

/// A matched retry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    attempts: u32,
}

impl RetryOutcome {
    /// Number of requests sent, including the matching one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Terminal failures of a retry session.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed attempt came back unmatched.
    #[error("expectation not met after {attempts} attempts")]
    Exhausted {
        /// Number of requests sent.
        attempts: u32,
    },

    /// A failure that retrying cannot fix.
    #[error(transparent)]
    Hard(RequestError),
}

/// A configured retry session. Build one with [`RetryLoop::builder`].
#[derive(Debug, Clone)]
pub struct RetryLoop {
    request: Request,
    expectation: Expectation,
    budget: RetryBudget,
    interval: Duration,
    cancel: Option<CancellationToken>,
}

impl RetryLoop {
    /// Starts configuring a session against `url`.
    pub fn builder(url: impl Into<String>) -> RetryLoopBuilder {
        RetryLoopBuilder::new(url.into())
    }

    /// The request sent on every attempt.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The success condition.
    #[must_use]
    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// The retry budget.
    #[must_use]
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Runs attempts until matched, exhausted, or a hard error.
    ///
    /// # Errors
    ///
    /// [`RetryError::Exhausted`] when the budget runs out and
    /// [`RetryError::Hard`] for non-retryable request errors.
    #[instrument(skip(self, client), fields(url = %self.request.full_url(), expect = self.expectation.kind()))]
    pub async fn run(&self, client: &HttpClient) -> Result<RetryOutcome, RetryError> {
        if self.budget == RetryBudget::Unlimited {
            warn!("retry budget is 0: retrying until the expectation is met");
        }

        let mut attempts: u32 = 0;
        loop {
            attempts = next_attempt(attempts);
            let response = client.execute(self.request.clone()).await;
            let report = matcher::evaluate(&response, &self.expectation);
            log_report(attempts, &report);

            if report.matched() {
                info!(attempts, "expectation met");
                return Ok(RetryOutcome { attempts });
            }

            if let Some(error) = response.into_error() {
                if !error.is_retryable() {
                    return Err(RetryError::Hard(error));
                }
            }

            if !self.budget.allows_retry(attempts - 1) {
                return Err(RetryError::Exhausted { attempts });
            }

            info!(attempt = attempts + 1, interval_ms = self.interval_ms(), "retry");
            self.pause().await?;
        }
    }

    async fn pause(&self) -> Result<(), RetryError> {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(RetryError::Hard(
                        RequestError::cancelled(self.request.full_url().as_str()),
                    )),
                    () = tokio::time::sleep(self.interval) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(self.interval).await;
                Ok(())
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}

/// Attempt counter step; an unlimited budget pins the count at `u32::MAX`.
fn next_attempt(attempts: u32) -> u32 {
    attempts.saturating_add(1)
}

fn log_report(attempt: u32, report: &MatchReport) {
    match report {
        MatchReport::Failed { error } => {
            info!(attempt, error = %error, "request failed");
        }
        MatchReport::Checked(checks) => {
            for check in checks {
                if check.matched {
                    info!(attempt, key = %check.key, value = %check.actual, "matched");
                } else {
                    info!(
                        attempt,
                        key = %check.key,
                        expected = %check.expected,
                        actual = %check.actual,
                        "not matched"
                    );
                }
            }
        }
    }
}

/// Builder for [`RetryLoop`].
#[derive(Debug, Clone)]
pub struct RetryLoopBuilder {
    url: String,
    method: Method,
    query: Params,
    headers: Params,
    expectation: Option<Expectation>,
    budget: RetryBudget,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl RetryLoopBuilder {
    fn new(url: String) -> Self {
        Self {
            url,
            method: Method::Get,
            query: Params::new(),
            headers: Params::new(),
            expectation: None,
            budget: RetryBudget::default(),
            interval: DEFAULT_INTERVAL,
            timeout: None,
            cancel: None,
        }
    }

    /// Request method. Only GET passes [`build`](Self::build).
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds one query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds query parameters.
    #[must_use]
    pub fn queries(mut self, query: &Params) -> Self {
        self.query.extend(query.clone());
        self
    }

    /// Adds one header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds headers.
    #[must_use]
    pub fn headers(mut self, headers: &Params) -> Self {
        self.headers.extend(headers.clone());
        self
    }

    /// Success condition.
    #[must_use]
    pub fn expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = Some(expectation);
        self
    }

    /// Retry budget. Defaults to [`RetryBudget::Unlimited`].
    #[must_use]
    pub fn budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Operator-style retry count; `0` means unlimited.
    #[must_use]
    pub fn retries(self, count: u32) -> Self {
        self.budget(RetryBudget::from_count(count))
    }

    /// Pause between attempts. Defaults to one second.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Per-attempt timeout, overriding the client's.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stops the session (in-flight attempt or pause) when `token` fires.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing or empty expectation, a method
    /// other than GET, or an invalid URL or header.
    pub fn build(self) -> Result<RetryLoop, ConfigError> {
        let expectation = self.expectation.ok_or(ConfigError::MissingExpectation)?;
        expectation.validate()?;
        if self.method != Method::Get {
            return Err(ConfigError::UnsupportedMethod {
                method: self.method.to_string(),
            });
        }

        let mut request = Request::builder(self.method, self.url)
            .queries(&self.query)
            .headers(&self.headers);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = &self.cancel {
            request = request.cancel_token(token.clone());
        }

        Ok(RetryLoop {
            request: request.build()?,
            expectation,
            budget: self.budget,
            interval: self.interval,
            cancel: self.cancel,
        })
    }
}
