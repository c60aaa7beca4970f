//! Bounded polling used by every selector-based action

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::ports::{DomPort, NodeRef};

/// Interval between polling attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Re-run `attempt` until it yields `Some` or `timeout` has elapsed.
///
/// The attempt always runs at least once; attempts continue while the elapsed
/// time is within the timeout, so a zero timeout means a single attempt.
pub async fn poll_until<T, F, Fut>(timeout: Duration, interval: Duration, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    loop {
        if let Some(found) = attempt().await {
            return Some(found);
        }
        if started.elapsed() + interval > timeout {
            return None;
        }
        sleep(interval).await;
    }
}

/// Poll `document.querySelector(selector)`. Invalid selectors and page
/// errors count as "not found yet".
pub async fn wait_for_selector(
    dom: &dyn DomPort,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<NodeRef> {
    if selector.trim().is_empty() {
        return None;
    }
    poll_until(timeout, interval, move || async move {
        match dom.query(None, selector).await {
            Ok(found) => found,
            Err(err) => {
                trace!(selector, %err, "selector query failed");
                None
            }
        }
    })
    .await
}

/// Like [`wait_for_selector`] but returns every match once at least one exists.
pub async fn wait_for_all(
    dom: &dyn DomPort,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Vec<NodeRef> {
    poll_until(timeout, interval, move || async move {
        dom.query_all(None, selector)
            .await
            .ok()
            .filter(|nodes| !nodes.is_empty())
    })
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_after_timeout() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let started = Instant::now();
        let found: Option<()> = poll_until(Duration::from_millis(500), POLL_INTERVAL, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            None
        })
        .await;
        assert!(found.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert!(started.elapsed() <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_checks_once() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let found = poll_until(Duration::ZERO, POLL_INTERVAL, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Some(7)
        })
        .await;
        assert_eq!(found, Some(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
