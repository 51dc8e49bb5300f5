use std::future::Future;
use std::time::Duration;

/// Poll an async boolean probe until it reports ready, up to `max_attempts`
/// with a fixed pause between attempts.
///
/// Returns false on exhaustion instead of an error so callers can choose to
/// proceed degraded (ingestion without search) or abort.
pub async fn wait_ready<F, Fut>(mut probe: F, max_attempts: u32, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..max_attempts {
        if probe().await {
            return true;
        }
        if attempt + 1 < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::wait_ready;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn ready_probe_returns_immediately() {
        let calls = AtomicU32::new(0);
        let ready = wait_ready(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { true }
            },
            5,
            Duration::ZERO,
        )
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_is_retried_until_it_succeeds() {
        let calls = AtomicU32::new(0);
        let ready = wait_ready(
            || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move { attempt >= 2 }
            },
            5,
            Duration::ZERO,
        )
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_false_not_an_error() {
        let calls = AtomicU32::new(0);
        let ready = wait_ready(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            4,
            Duration::ZERO,
        )
        .await;

        assert!(!ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
