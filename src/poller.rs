use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::info;

/// Runs `refresh` immediately, then again after every `interval`, until the
/// process exits. Runs are serialized within the task: a slow refresh delays
/// the next tick instead of racing it, so a stale cycle can never overwrite a
/// newer one.
pub fn spawn_poller<F, Fut>(label: &'static str, interval: Duration, mut refresh: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        info!("{label}: poller started, refreshing every {}s", interval.as_secs());
        loop {
            refresh().await;
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_run_is_immediate_and_ticks_repeat() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let handle = spawn_poller("test", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Immediate first run.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Two more ticks.
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        handle.abort();
    }
}
