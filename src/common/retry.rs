// SPDX-License-Identifier: MIT

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

const NETWORK_MARKERS: &[&str] = &[
    "fetch failed",
    "etimedout",
    "econnreset",
    "enotfound",
    "network",
    "timeout",
];

const NONCE_MARKERS: &[&str] = &["nonce", "transaction underpriced", "already known"];

/// Transport-shaped error message (RPC or quote service unreachable).
pub fn is_network_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

/// Stale-nonce error message from the chain.
pub fn is_nonce_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    NONCE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Retry an async operation with progressive backoff (`base_delay * attempt`).
///
/// Errors the predicate rejects propagate immediately; the last attempt's
/// error propagates regardless.
pub async fn retry_async<F, Fut, T, E, P>(
    mut op: F,
    attempts: usize,
    base_delay: Duration,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                let delay = base_delay.saturating_mul(attempt as u32);
                tracing::warn!(
                    target: "retry",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed; retrying"
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = retry_async(
            |_| {
                let current = counter.fetch_add(1, Ordering::Relaxed);
                async move {
                    if current < 2 {
                        Err("connection timeout".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            4,
            Duration::from_millis(1),
            |e| is_network_message(e),
        )
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_on_first_attempt() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = retry_async(
            |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                async move { Err("execution reverted".to_string()) }
            },
            4,
            Duration::from_millis(1),
            |e| is_network_message(e),
        )
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn network_predicate_matches_known_markers() {
        assert!(is_network_message("request ETIMEDOUT after 5s"));
        assert!(is_network_message("fetch failed"));
        assert!(is_network_message("Network is unreachable"));
        assert!(!is_network_message("execution reverted"));
    }

    #[test]
    fn nonce_predicate_matches_known_markers() {
        assert!(is_nonce_message("nonce too low"));
        assert!(is_nonce_message("replacement transaction underpriced"));
        assert!(is_nonce_message("already known"));
        assert!(!is_nonce_message("out of gas"));
    }
}
