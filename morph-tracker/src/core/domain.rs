/*!
Per-world workers and the registry of polled worlds.

Each registered world gets one worker task. Everything that touches that world
(death scans, commands, page selections, delayed skin refreshes) is queued to
its worker and runs there one job at a time, so worlds never block each other
and no job races another inside the same world. Host calls run on the blocking
pool; a panicking job is logged and the worker carries on.
*/

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::dedup::KillDeduplicator;
use crate::core::error::ServiceError;
use crate::core::host::{World, WorldId};
use crate::core::notifications::{NoticeFanout, UnlockNotice};

type WorldJob = Box<dyn FnOnce(&dyn World) + Send + 'static>;

enum Job {
    Scan,
    Run(WorldJob),
}

/// Counters shared by every worker.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub scans_completed: AtomicU64,
    pub scans_failed: AtomicU64,
    pub ticks_coalesced: AtomicU64,
    pub unlocks_credited: AtomicU64,
}

/// What every worker needs to run a scan.
pub struct ScanContext {
    pub dedup: Arc<KillDeduplicator>,
    pub notices: Arc<NoticeFanout>,
    pub stats: Arc<ScanStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRequest {
    Queued,
    /// A scan for this world is already waiting; the tick was folded into it.
    Coalesced,
    Closed,
}

/// Cloneable handle onto one world's worker.
#[derive(Clone)]
pub struct DomainHandle {
    id: WorldId,
    name: String,
    jobs: mpsc::UnboundedSender<Job>,
    scan_pending: Arc<AtomicBool>,
    runtime: Handle,
}

impl DomainHandle {
    fn spawn(
        world: Arc<dyn World>,
        ctx: Arc<ScanContext>,
        stop: watch::Receiver<bool>,
        runtime: &Handle,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let scan_pending = Arc::new(AtomicBool::new(false));
        let handle = Self {
            id: world.id(),
            name: world.name(),
            jobs,
            scan_pending: scan_pending.clone(),
            runtime: runtime.clone(),
        };
        let worker = runtime.spawn(run_worker(world, receiver, scan_pending, ctx, stop));
        (handle, worker)
    }

    pub fn id(&self) -> &WorldId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a death scan unless one is already waiting.
    pub fn request_scan(&self) -> ScanRequest {
        if self.scan_pending.swap(true, Ordering::AcqRel) {
            return ScanRequest::Coalesced;
        }
        if self.jobs.send(Job::Scan).is_err() {
            self.scan_pending.store(false, Ordering::Release);
            return ScanRequest::Closed;
        }
        ScanRequest::Queued
    }

    /// Run `f` on this world's worker and wait for its result.
    pub fn execute<F, R>(&self, f: F) -> impl Future<Output = Result<R, ServiceError>> + Send + 'static
    where
        F: FnOnce(&dyn World) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: WorldJob = Box::new(move |world: &dyn World| {
            let _ = tx.send(f(world));
        });
        let sent = self.jobs.send(Job::Run(job)).is_ok();
        let id = self.id.clone();

        async move {
            if !sent {
                return Err(ServiceError::DomainClosed(id));
            }
            rx.await.map_err(|_| ServiceError::JobFailed(id))
        }
    }

    /// Queue `f` on this world's worker after `delay`, without waiting for it.
    pub fn execute_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(&dyn World) + Send + 'static,
    {
        let jobs = self.jobs.clone();
        let id = self.id.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if jobs.send(Job::Run(Box::new(f))).is_err() {
                debug!("World {} stopped before a delayed job could run", id);
            }
        });
    }
}

async fn run_worker(
    world: Arc<dyn World>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    scan_pending: Arc<AtomicBool>,
    ctx: Arc<ScanContext>,
    mut stop: watch::Receiver<bool>,
) {
    let id = world.id();
    loop {
        // Queued jobs win over the stop signal so work accepted before shutdown still runs.
        let job = tokio::select! {
            biased;
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = stop.changed() => break,
        };

        match job {
            Job::Scan => {
                scan_pending.store(false, Ordering::Release);
                run_scan(&world, &id, &ctx).await;
            }
            Job::Run(f) => {
                let world = world.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || f(world.as_ref())).await {
                    error!("Job on world {} panicked: {}", id, e);
                }
            }
        }
    }
    debug!("Worker for world {} stopped", id);
}

async fn run_scan(world: &Arc<dyn World>, id: &WorldId, ctx: &ScanContext) {
    let scan_world = world.clone();
    let dedup = ctx.dedup.clone();

    match tokio::task::spawn_blocking(move || dedup.scan(scan_world.as_ref())).await {
        Ok(Ok(report)) => {
            ctx.stats.scans_completed.fetch_add(1, Ordering::Relaxed);
            if report.credits.is_empty() {
                return;
            }
            ctx.stats
                .unlocks_credited
                .fetch_add(report.credits.len() as u64, Ordering::Relaxed);

            let world_name = world.name();
            for credit in report.credits {
                info!("🔓 {} unlocked {} in {}", credit.killer, credit.model, world_name);
                ctx.notices
                    .publish(UnlockNotice::new(credit.killer, credit.model, world_name.clone()));
            }
        }
        Ok(Err(e)) => {
            ctx.stats.scans_failed.fetch_add(1, Ordering::Relaxed);
            warn!("Death scan of world {} failed: {}", id, e);
        }
        Err(e) => {
            ctx.stats.scans_failed.fetch_add(1, Ordering::Relaxed);
            error!("Death scan of world {} panicked: {}", id, e);
        }
    }
}

/// The set of worlds being polled. Worlds are added on first sight and stay until
/// shutdown.
pub struct DomainRegistry {
    domains: Mutex<HashMap<WorldId, DomainHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ctx: Arc<ScanContext>,
    stop: watch::Sender<bool>,
    runtime: Handle,
}

impl DomainRegistry {
    pub fn new(ctx: Arc<ScanContext>, runtime: Handle) -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            ctx,
            stop: watch::Sender::new(false),
            runtime,
        }
    }

    /// Handle for `world`, starting its worker on first registration. The flag is
    /// `true` when this call registered it.
    pub fn register(&self, world: Arc<dyn World>) -> (DomainHandle, bool) {
        let id = world.id();
        let mut domains = self.domains.lock();
        if let Some(handle) = domains.get(&id) {
            return (handle.clone(), false);
        }

        let (handle, worker) =
            DomainHandle::spawn(world, self.ctx.clone(), self.stop.subscribe(), &self.runtime);
        info!("Started polling for world: {}", handle.name());
        domains.insert(id, handle.clone());
        self.workers.lock().push(worker);
        (handle, true)
    }

    pub fn handles(&self) -> Vec<DomainHandle> {
        self.domains.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.domains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.lock().is_empty()
    }

    /// Stop every worker once its queue is empty and wait (bounded) for them to exit.
    pub async fn shutdown(&self, grace: Duration) {
        self.domains.lock().clear();
        self.stop.send_replace(true);
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();

        if tokio::time::timeout(grace, join_all(workers)).await.is_err() {
            warn!("Timed out waiting for {} world workers to stop", count);
        } else {
            debug!("Stopped {} world workers", count);
        }
    }
}
