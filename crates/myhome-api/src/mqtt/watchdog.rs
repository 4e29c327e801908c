use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::MqttLink;
use crate::error::Error;

/// Sample the link's connection state every `interval`.
///
/// Returns `Ok(())` on cancellation and `Err(MqttUnrecoverable)` once
/// `max_failures` consecutive samples saw the link down. The caller owns
/// what happens next (the daemon exits so its supervisor restarts it).
pub async fn watchdog<L: MqttLink + ?Sized>(
    link: Arc<L>,
    interval: Duration,
    max_failures: u32,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    let mut failures = 0u32;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                if link.is_connected() {
                    if failures > 0 {
                        info!(failures, "MQTT connection recovered");
                    }
                    failures = 0;
                    continue;
                }
                failures += 1;
                warn!(failures, max_failures, "MQTT broker unreachable");
                if failures >= max_failures {
                    error!(failures, "MQTT connection unrecoverable");
                    return Err(Error::MqttUnrecoverable { failures });
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mqtt::LoopbackLink;

    #[tokio::test(start_paused = true)]
    async fn three_failed_ticks_are_fatal() {
        let link = LoopbackLink::new("watchdog-test");
        link.set_connected(false);
        let start = tokio::time::Instant::now();

        let result = watchdog(
            link,
            Duration::from_secs(30),
            3,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::MqttUnrecoverable { failures: 3 })));
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_link_runs_until_cancelled() {
        let link = LoopbackLink::new("watchdog-test");
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            stopper.cancel();
        });

        let result = watchdog(link, Duration::from_secs(30), 3, cancel).await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_resets_the_counter() {
        let link = LoopbackLink::new("watchdog-test");
        link.set_connected(false);
        let flapper = Arc::clone(&link);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            // Down for two ticks, up for one, down for two, then stop.
            tokio::time::sleep(Duration::from_secs(75)).await;
            flapper.set_connected(true);
            tokio::time::sleep(Duration::from_secs(30)).await;
            flapper.set_connected(false);
            tokio::time::sleep(Duration::from_secs(70)).await;
            stopper.cancel();
        });

        let result = watchdog(link, Duration::from_secs(30), 3, cancel).await;
        assert!(result.is_ok());
    }
}
