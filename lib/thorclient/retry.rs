use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;

/// Terminal state returned by the retry runner.
#[derive(Debug)]
pub struct RetryTerminal<E> {
    pub error: E,
    pub attempts: u32,
    pub exhausted_retryable: bool,
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
///
/// `seed` spreads the jitter so concurrent callers hitting the same outage don't retry in
/// lockstep.
pub async fn run_with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    seed: u64,
    mut op: F,
    mut is_retryable: R,
) -> Result<(T, u32), RetryTerminal<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let retryable = is_retryable(&error);
                if !retryable || attempt >= max_attempts {
                    return Err(RetryTerminal {
                        error,
                        attempts: attempt,
                        exhausted_retryable: retryable,
                    });
                }

                let delay = compute_backoff_delay(policy, attempt, seed);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// `initial_backoff * 2^(attempt-1)`, capped at `max_backoff`, plus up to `jitter`.
pub fn compute_backoff_delay(policy: &RetryPolicy, attempt: u32, seed: u64) -> Duration {
    if policy.initial_backoff.is_zero() && policy.jitter.is_zero() {
        return Duration::ZERO;
    }

    let shift = attempt.saturating_sub(1).min(20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());

    let jitter_ms = deterministic_jitter(seed, attempt, policy.jitter.as_millis());
    let total_ms = capped_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
}

/// Stable seed for a request target.
pub fn seed_for(target: &str) -> u64 {
    target
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, byte| {
            (acc ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
        })
}

fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}
