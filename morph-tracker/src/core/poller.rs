/*!
Fixed-rate timer that asks every registered world for a death scan
*/

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tracing::{debug, info};

use crate::core::config::PollingConfig;
use crate::core::dedup::KillDeduplicator;
use crate::core::domain::{DomainRegistry, ScanRequest, ScanStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub queued: usize,
    pub coalesced: usize,
    pub evicted: usize,
}

pub struct PollScheduler {
    config: PollingConfig,
    registry: Arc<DomainRegistry>,
    dedup: Arc<KillDeduplicator>,
    stats: Arc<ScanStats>,
}

impl PollScheduler {
    pub fn new(
        config: PollingConfig,
        registry: Arc<DomainRegistry>,
        dedup: Arc<KillDeduplicator>,
        stats: Arc<ScanStats>,
    ) -> Self {
        Self {
            config,
            registry,
            dedup,
            stats,
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.config.initial_delay();
        let mut interval = tokio::time::interval_at(start, self.config.interval());
        // A late tick shifts the schedule instead of firing a burst to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        info!(
            "Polling worlds every {:?} after {:?}",
            self.config.interval(),
            self.config.initial_delay()
        );

        loop {
            tokio::select! {
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Polling stopped");
    }

    /// One timer fire: request a scan from every world and age out stale markers.
    pub fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        for handle in self.registry.handles() {
            match handle.request_scan() {
                ScanRequest::Queued => summary.queued += 1,
                ScanRequest::Coalesced => {
                    summary.coalesced += 1;
                    self.stats.ticks_coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("World {} is still scanning, tick coalesced", handle.name());
                }
                ScanRequest::Closed => debug!("World {} is closed", handle.name()),
            }
        }

        let processed = self.dedup.processed();
        if processed.is_empty() {
            return summary;
        }
        summary.evicted = processed.evict_stale(Instant::now());
        if summary.evicted > 0 {
            debug!("Evicted {} stale death markers", summary.evicted);
        }
        summary
    }
}
