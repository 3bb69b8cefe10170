//! Bounded retry combinator.
//!
//! [`attempt`] drives an operation until it succeeds, fails permanently, or the
//! policy runs out of retries. Operations classify their own errors with
//! [`backoff::Error`]: `Permanent` stops immediately, `Transient` is retried
//! after the policy delay, or after `retry_after` when the operation asks for a
//! specific pause. The policy is consulted on every transient failure, so a
//! `retry_after` hint never buys extra attempts.

use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;

/// A fixed number of attempts with a constant pause between them.
#[derive(Debug, Clone)]
pub struct AttemptPolicy {
    max_attempts: u32,
    delay: Duration,
    retries_left: u32,
}

impl AttemptPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            delay,
            retries_left: max_attempts - 1,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Backoff for AttemptPolicy {
    fn reset(&mut self) {
        self.retries_left = self.max_attempts - 1;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        Some(self.delay)
    }
}

/// The last error seen once retrying stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `op` (given the 1-based attempt number) under `policy`.
///
/// On success returns the value with the number of attempts used. `notify`
/// is called before each pause with the error, the attempt that failed and
/// the pause length.
pub async fn attempt<T, E, B, F, Fut, N>(
    mut policy: B,
    mut op: F,
    mut notify: N,
) -> Result<(T, u32), Exhausted<E>>
where
    B: Backoff,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
    N: FnMut(&E, u32, Duration),
{
    policy.reset();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(backoff::Error::Permanent(error)) => {
                return Err(Exhausted {
                    error,
                    attempts: attempt,
                })
            }
            Err(backoff::Error::Transient { err, retry_after }) => {
                let Some(delay) = policy.next_backoff() else {
                    return Err(Exhausted {
                        error: err,
                        attempts: attempt,
                    });
                };
                let delay = retry_after.unwrap_or(delay);
                notify(&err, attempt, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
