// ── HTTP retry helpers ─────────────────────────────────────────────────────
// Shared by the provider adapters: exponential backoff with jitter for the
// transient status codes model APIs are fond of returning.

use std::time::{Duration, SystemTime};

/// Default maximum number of retry attempts per request.
pub const MAX_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum retry delay cap in milliseconds.
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Sleep with exponential backoff + ±25% jitter. Returns the delay slept.
pub async fn retry_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(8));
    let delay = Duration::from_millis(apply_jitter(base_ms.min(MAX_RETRY_DELAY_MS)));
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (clock_jitter() % (2 * jitter_range + 1)) - jitter_range;
    (base_ms as i64 + offset).max(100) as u64
}

/// Jitter source from system clock nanos (no extra crate needed).
fn clock_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [429u16, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s));
        }
        for s in [200u16, 400, 401, 404, 422] {
            assert!(!is_retryable_status(s));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..50 {
            let v = apply_jitter(1_000);
            assert!((750..=1_250).contains(&v));
        }
    }
}
