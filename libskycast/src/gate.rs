//! Posting gate: session acquisition and publishing with backoff

use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Result, SkycastError};
use crate::platforms::Platform;
use crate::shutdown::Shutdown;
use crate::types::{Message, Session};

/// Cooldown applied when the posting target rate-limits us
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// How long and how often the gate keeps trying
///
/// The default never gives up: 24 hours of cooldown after a rate limit and
/// an immediate retry after any other login failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub rate_limit_cooldown: Duration,
    /// Pause before retrying a failed login that was not rate-limited
    pub retry_delay: Duration,
    /// Give up after this many attempts (`None` = unbounded)
    pub max_attempts: Option<u32>,
    /// Give up once the next wait would take us past this much time
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            retry_delay: Duration::ZERO,
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt after `error`
    pub fn delay_for(&self, error: &SkycastError) -> Duration {
        if error.is_rate_limited() {
            self.rate_limit_cooldown
        } else {
            self.retry_delay
        }
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn allows_retry(&self, attempts: u32, elapsed: Duration, next_delay: Duration) -> bool {
        if matches!(self.max_attempts, Some(max) if attempts >= max) {
            return false;
        }
        if matches!(self.max_elapsed, Some(max) if elapsed + next_delay > max) {
            return false;
        }
        true
    }
}

/// Authenticates lazily and publishes messages
pub struct PostingGate {
    platform: Arc<dyn Platform>,
    handle: String,
    password: SecretString,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl PostingGate {
    pub fn new(
        platform: Arc<dyn Platform>,
        handle: impl Into<String>,
        password: SecretString,
        policy: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            platform,
            handle: handle.into(),
            password,
            policy,
            shutdown,
        }
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Return the run's session, logging in on first use
    pub async fn ensure_session<'s>(&self, slot: &'s mut Option<Session>) -> Result<&'s Session> {
        let session = match slot.take() {
            Some(session) => session,
            None => {
                tracing::info!("Logging in to {} as {}", self.platform.name(), self.handle);
                let session = self
                    .with_retry("login", true, || {
                        self.platform.login(&self.handle, &self.password)
                    })
                    .await?;
                tracing::info!("Logged in as {}", session.handle);
                session
            }
        };
        Ok(slot.insert(session))
    }

    /// Publish one message
    ///
    /// A rate-limited publish waits out the cooldown and tries the same
    /// message again. Any other failure is returned to the caller.
    pub async fn publish(&self, session: &Session, message: &Message) -> Result<String> {
        if message.image.is_some() {
            tracing::info!("Posting to {} with image", self.platform.name());
        } else {
            tracing::info!("Posting to {}", self.platform.name());
        }
        self.with_retry("publish", false, || self.platform.publish(session, message))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, retry_any: bool, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return Err(SkycastError::Cancelled);
            }

            attempts += 1;
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !retry_any && !error.is_rate_limited() {
                return Err(error);
            }

            let delay = self.policy.delay_for(&error);
            if !self.policy.allows_retry(attempts, started.elapsed(), delay) {
                return Err(SkycastError::RetriesExhausted(format!(
                    "{} failed after {} attempt(s): {}",
                    operation, attempts, error
                )));
            }

            if error.is_rate_limited() {
                tracing::warn!(
                    "Rate limited during {}; waiting {} before retrying",
                    operation,
                    humantime::format_duration(delay)
                );
            } else {
                tracing::warn!("{} failed (attempt {}): {}", operation, attempts, error);
            }

            self.shutdown.sleep(delay).await?;
        }
    }
}
