//! Bounded retry combinator
//!
//! Runs a probe up to `max_attempts` times with a fixed interval between attempts. The
//! probe decides per attempt whether it is done, should be retried or must abort.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Attempt bound and spacing
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_secs(5),
        }
    }
}

/// Result of one probe
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Retry(String),
    Abort(E),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_reason}")]
    Exhausted { attempts: u32, last_reason: String },

    #[error("aborted: {0}")]
    Aborted(E),
}

/// Run `probe` until it is done, aborts or the attempt bound is hit
///
/// `probe` receives the 1-based attempt number. `sleep_fn` is only awaited between
/// attempts, never after the last one.
pub async fn bounded<T, E, S, SF, P, PF>(
    policy: &RetryPolicy,
    sleep_fn: S,
    mut probe: P,
) -> Result<T, RetryError<E>>
where
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
    P: FnMut(u32) -> PF,
    PF: Future<Output = Attempt<T, E>>,
{
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
            Attempt::Retry(reason) => {
                debug!(
                    "Attempt {}/{} not done yet: {}",
                    attempt, policy.max_attempts, reason
                );
                last_reason = reason;
            }
        }

        if attempt < policy.max_attempts {
            sleep_fn(policy.interval).await;
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last_reason,
    })
}
