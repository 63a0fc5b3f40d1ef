use anyhow::Result;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: usize = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Bounded retries with exponential backoff for calls to external
/// collaborators.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .max(self.base_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds or the attempts run out. The closure gets
    /// the 1-based attempt number. A [`RateLimited`] error with a
    /// `retry-after` hint stretches the wait.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    let mut wait = delay;
                    if let Some(hint) = err
                        .downcast_ref::<RateLimited>()
                        .and_then(|limited| limited.retry_after)
                        && hint > wait
                    {
                        wait = hint.min(self.max_delay);
                    }
                    warn!(
                        "{} failed: {:#}; retrying in {:.1}s (attempt {}/{})",
                        label,
                        err,
                        wait.as_secs_f32(),
                        attempt,
                        attempts
                    );
                    sleep(wait).await;
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "{} failed after {} attempt(s)",
                        label, attempt
                    )));
                }
            }
        }
    }
}

/// The remote side asked us to slow down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: Option<Duration>,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after {
            Some(wait) => write!(f, "rate limited (retry after {}s)", wait.as_secs()),
            None => f.write_str("rate limited"),
        }
    }
}

impl std::error::Error for RateLimited {}

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("slowdown")
        || lower.contains("quota")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}
