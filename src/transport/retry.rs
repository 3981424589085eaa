use crate::core::error::TransportError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound of the random jitter added to every retry delay
pub const MAX_JITTER_MS: u64 = 200;

pub type RetryCallback = Arc<dyn Fn(u32, &TransportError) + Send + Sync>;

/// How and when a failed request is retried
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    pub retryable_status_codes: Vec<u16>,
    /// Called once per retry with the 1-based attempt number
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("exponential", &self.exponential)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn with_on_retry(mut self, callback: impl Fn(u32, &TransportError) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Delay before retry number `attempt` (0-based), without jitter
    ///
    /// `base_delay * 2^attempt` when exponential, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = if self.exponential {
            self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
        } else {
            self.base_delay
        };
        delay.min(self.max_delay)
    }

    pub fn is_retryable(&self, error: &TransportError) -> bool {
        match error {
            TransportError::Network(_) => true,
            TransportError::Http(e) => self.retryable_status_codes.contains(&e.status),
            TransportError::InvalidUrl(_) => false,
        }
    }
}

/// Per-request retry setting
#[derive(Debug, Clone, Default)]
pub enum Retry {
    /// Use whatever the client was built with
    #[default]
    Inherit,
    Disabled,
    /// Default policy
    Enabled,
    Policy(RetryPolicy),
}

impl From<bool> for Retry {
    fn from(enabled: bool) -> Self {
        if enabled {
            Retry::Enabled
        } else {
            Retry::Disabled
        }
    }
}

impl From<RetryPolicy> for Retry {
    fn from(policy: RetryPolicy) -> Self {
        Retry::Policy(policy)
    }
}

impl Retry {
    /// Resolve against the client default
    pub fn resolve(self, client_default: Option<&RetryPolicy>) -> Option<RetryPolicy> {
        match self {
            Retry::Inherit => client_default.cloned(),
            Retry::Disabled => None,
            Retry::Enabled => Some(RetryPolicy::default()),
            Retry::Policy(policy) => Some(policy),
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS))
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of retries. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_retries || !policy.is_retryable(&error) {
                    return Err(error);
                }

                let delay = policy.backoff_delay(attempt) + jitter();
                attempt += 1;

                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying request"
                );

                if let Some(callback) = &policy.on_retry {
                    callback(attempt, &error);
                }

                tokio::time::sleep(delay).await;
            }
        }
    }
}
