//! Periodic lease expiry

use crate::{discoverable::DiscoveryEvent, registry::Registry};
use std::{sync::Arc, time::Duration};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sweeps expired registry entries on a fixed period
#[derive(Debug)]
pub struct Reaper {
    registry: Arc<Registry>,
    sink: flume::Sender<DiscoveryEvent>,
    lease: Duration,
    period: Duration,
}

impl Reaper {
    /// Create a reaper evicting entries silent for longer than `lease`,
    /// checking every `period`
    pub fn new(
        registry: Arc<Registry>,
        sink: flume::Sender<DiscoveryEvent>,
        lease: Duration,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            lease,
            period,
        }
    }

    /// Run one sweep now, forwarding LOST events.
    ///
    /// Returns the number of evicted entries, or `None` once the dispatch
    /// queue is gone.
    pub fn sweep(&self) -> Option<usize> {
        let lost = self.registry.sweep(std::time::Instant::now(), self.lease);
        let count = lost.len();
        for event in lost {
            self.sink.send(event).ok()?;
        }
        Some(count)
    }

    /// Tick until `cancel` fires. No sweep starts after cancellation is seen.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            "Reaper running every {:?} with lease {:?}",
            self.period, self.lease
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.sweep().is_none() {
                        debug!("Dispatch queue closed, reaper exiting");
                        break;
                    }
                }
            }
        }

        debug!("Reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discoverable::DiscoveryKind, types::AttributeRecord};

    #[test]
    fn test_sweep_forwards_lost() {
        let registry = Arc::new(Registry::new());
        let (sink, events) = flume::unbounded();
        let reaper = Reaper::new(
            Arc::clone(&registry),
            sink,
            Duration::from_secs(5),
            Duration::from_secs(1),
        );

        let stale = std::time::Instant::now() - Duration::from_secs(10);
        registry.observe_at(AttributeRecord::new("S1"), stale);
        registry.observe(AttributeRecord::new("S2"));

        assert_eq!(reaper.sweep(), Some(1));
        let lost: Vec<_> = events.try_iter().collect();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].kind(), DiscoveryKind::Lost);
        assert_eq!(lost[0].identity().as_str(), "S1");
    }

    #[tokio::test]
    async fn test_run_evicts_on_tick_and_stops() {
        let registry = Arc::new(Registry::new());
        let (sink, events) = flume::unbounded();
        let reaper = Reaper::new(
            Arc::clone(&registry),
            sink,
            Duration::ZERO,
            Duration::from_millis(20),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reaper.run(cancel.clone()));

        registry.observe_at(
            AttributeRecord::new("S1"),
            std::time::Instant::now() - Duration::from_millis(1),
        );
        let lost = tokio::time::timeout(Duration::from_secs(2), events.recv_async())
            .await
            .expect("no sweep happened")
            .unwrap();
        assert_eq!(lost.kind(), DiscoveryKind::Lost);

        cancel.cancel();
        task.await.unwrap();

        // No sweeps after the task has finished
        registry.observe_at(
            AttributeRecord::new("S2"),
            std::time::Instant::now() - Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.contains(&"S2".into()));
    }
}
