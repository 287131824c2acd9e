//! Retry network-bound operations with exponential backoff.
//!
//! Errors are classified through the [Retryable] hint attached to each error
//! context by the I/O boundary that produced it. Contexts that can't tell
//! return [RetryHint::Unknown], in which case the text of the whole report is
//! matched against a list of well-known transient failure messages.
use std::{future::Future, time::Duration};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable as _};
use error_stack::{AttachmentKind, Context, FrameKind, Report, Result};
use rand::Rng;
use tracing::{debug, warn};

/// Messages that usually denote a transient failure.
///
/// This list is a heuristic and is not exhaustive.
const RETRYABLE_MESSAGES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "rate limit",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "dns",
    "getaddrinfo",
    "block range",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// The operation may succeed if retried.
    Retryable,
    /// Retrying won't change the outcome.
    Fatal,
    /// Let the message heuristic decide.
    Unknown,
}

/// Implemented by error contexts produced at the I/O boundaries.
pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

#[derive(Debug, Clone)]
pub struct BackoffOptions {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: u32,
    /// Add a random delay of at most this duration on top of the computed one.
    pub jitter: Option<Duration>,
}

/// Exponential backoff executor.
#[derive(Debug, Clone)]
pub struct Backoff {
    options: BackoffOptions,
}

/// Returns true if the message looks like a transient failure.
///
/// Numeric patterns (status codes) only match as whole words, so that block
/// numbers such as `19500123` are not mistaken for a `500` status.
pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_MESSAGES.iter().any(|pattern| {
        if pattern.bytes().all(|b| b.is_ascii_digit()) {
            contains_word(&message, pattern)
        } else {
            message.contains(pattern)
        }
    })
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.map_or(false, |c| c.is_ascii_alphanumeric())
            && !after.map_or(false, |c| c.is_ascii_alphanumeric())
    })
}

/// Returns true if the operation that produced `report` should be retried.
pub fn is_retryable<C>(report: &Report<C>) -> bool
where
    C: Context + Retryable,
{
    match report.current_context().retry_hint() {
        RetryHint::Retryable => true,
        RetryHint::Fatal => false,
        RetryHint::Unknown => report.frames().any(|frame| match frame.kind() {
            FrameKind::Context(context) => is_retryable_message(&context.to_string()),
            FrameKind::Attachment(AttachmentKind::Printable(printable)) => {
                is_retryable_message(&printable.to_string())
            }
            _ => false,
        }),
    }
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BackoffOptions {
        &self.options
    }

    /// Returns a copy of this executor that adds up to `jitter` to each delay.
    pub fn with_jitter(&self, jitter: Duration) -> Self {
        let mut options = self.options.clone();
        options.jitter = Some(jitter);
        Self { options }
    }

    /// Returns a copy of this executor that never adds jitter.
    pub fn without_jitter(&self) -> Self {
        let mut options = self.options.clone();
        options.jitter = None;
        Self { options }
    }

    /// `min(base_delay * multiplier^attempt, max_delay)`, for `max_retries` retries.
    pub fn exponential_builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.options.base_delay)
            .with_factor(self.options.multiplier as f32)
            .with_max_delay(self.options.max_delay)
            .with_max_times(self.options.max_retries as usize)
    }

    /// The delays the executor sleeps for, in order, if every attempt fails.
    pub fn delays(&self) -> JitteredBackoff {
        JitteredBackoff {
            inner: self.exponential_builder().build(),
            jitter: self.options.jitter,
        }
    }

    /// Run `operation`, retrying it while it fails with a retryable error.
    ///
    /// Non-retryable errors are returned immediately. After `max_retries`
    /// retries the last error is returned.
    pub async fn retry<T, C, F, Fut>(&self, name: &str, operation: F) -> Result<T, C>
    where
        C: Context + Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, C>>,
    {
        let max_retries = self.options.max_retries;
        let mut retries = 0u32;

        debug!(operation = name, "running operation");
        let result = operation
            .retry(self.delays())
            .when(|err: &Report<C>| is_retryable(err))
            .notify(|err: &Report<C>, delay: Duration| {
                retries += 1;
                warn!(
                    operation = name,
                    attempt = retries,
                    max_retries,
                    delay = ?delay,
                    error = %err,
                    "operation failed, retrying"
                );
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if is_retryable(&err) => {
                let attempts = retries + 1;
                warn!(operation = name, attempts, "retries exhausted");
                Err(err.attach_printable(format!("{name} failed after {attempts} attempts")))
            }
            Err(err) => {
                debug!(operation = name, "operation failed with fatal error");
                Err(err)
            }
        }
    }
}

/// The exponential schedule of [ExponentialBuilder], plus a random jitter.
#[derive(Debug)]
pub struct JitteredBackoff {
    inner: ExponentialBackoff,
    jitter: Option<Duration>,
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.inner.next()?;
        match self.jitter {
            Some(jitter) if !jitter.is_zero() => {
                let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
                Some(delay + Duration::from_millis(extra))
            }
            _ => Some(delay),
        }
    }
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            jitter: None,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffOptions::default())
    }
}
