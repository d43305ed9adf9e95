use std::time::Duration;

use tokio::time::sleep;

/// Polls `predicate` once per tick until it holds or `timeout_ticks` checks
/// have all failed. Fixed cadence, no backoff; block production is roughly
/// one block per second, so finer polling buys nothing.
///
/// The first check runs immediately. If the chain already shows the desired
/// effect, the caller learns that without sending anything, which is what
/// makes mint and transfer retries idempotent.
pub async fn wait_until<F, Fut>(mut predicate: F, timeout_ticks: u32, tick: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for elapsed in 0..timeout_ticks {
        if predicate().await {
            return true;
        }
        if elapsed + 1 < timeout_ticks {
            sleep(tick).await;
        }
    }
    false
}
