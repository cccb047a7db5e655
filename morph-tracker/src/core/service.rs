/*!
Main coordinator that owns the ledger, the world registry and the poll loop
*/

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use morph_ledger::{LedgerStore, ModelId, UnlockLedger};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::{
    commands::{CommandDispatcher, FollowUp, MorphCommand},
    config::{MorphConfig, StorageConfig, load_config},
    dedup::KillDeduplicator,
    domain::{DomainHandle, DomainRegistry, ScanContext, ScanStats},
    error::ServiceError,
    host::{CommandSender, Host, Message, World},
    morph::MorphApplier,
    notifications::{NoticeDispatcher, NoticeFanout},
    poller::PollScheduler,
    selection::SelectionAction,
};

const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const NOTICE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// The morph tracker. Construct once at startup, feed it host events, and call
/// [`MorphService::shutdown`] on the way out.
pub struct MorphService {
    config: MorphConfig,
    host: Arc<dyn Host>,
    ledger: Arc<UnlockLedger>,
    dedup: Arc<KillDeduplicator>,
    registry: Arc<DomainRegistry>,
    applier: Arc<MorphApplier>,
    commands: Arc<CommandDispatcher>,
    notices: Arc<NoticeFanout>,
    stats: Arc<ScanStats>,
    shutdown_tx: watch::Sender<bool>,
    poller: Option<JoinHandle<()>>,
}

impl MorphService {
    /// Build the service. Must be called from inside a Tokio runtime; world workers are
    /// spawned onto it.
    pub async fn new(config: MorphConfig, host: Arc<dyn Host>) -> Result<Self, ServiceError> {
        config.validate()?;
        info!("Initializing morph tracker...");

        let ledger = Arc::new(Self::open_ledger(&config.storage)?);
        let dedup = Arc::new(KillDeduplicator::new(ledger.clone(), config.dedup.retention()));

        let mut notices = NoticeDispatcher::new(&config.notifications, host.clone());
        notices.initialize().await;
        let notices = Arc::new(notices.start());

        let stats = Arc::new(ScanStats::default());
        let registry = Arc::new(DomainRegistry::new(
            Arc::new(ScanContext {
                dedup: dedup.clone(),
                notices: notices.clone(),
                stats: stats.clone(),
            }),
            Handle::current(),
        ));

        let applier = Arc::new(MorphApplier::new(
            host.clone(),
            ModelId::new(config.morph.default_model.clone()),
            config.morph.skin_refresh_delay(),
        ));
        let commands = Arc::new(CommandDispatcher::new(
            ledger.clone(),
            applier.clone(),
            host.clone(),
            config.morph.unlock_permission.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            host,
            ledger,
            dedup,
            registry,
            applier,
            commands,
            notices,
            stats,
            shutdown_tx,
            poller: None,
        })
    }

    /// Open the ledger described by `storage`. If the data directory cannot be
    /// prepared the ledger stays in memory only, unless persistence is required.
    pub fn open_ledger(storage: &StorageConfig) -> Result<UnlockLedger, ServiceError> {
        match LedgerStore::prepare(&storage.data_dir, &storage.file_name) {
            Ok(store) => Ok(UnlockLedger::load(store)),
            Err(e) if storage.require_persistence => Err(e.into()),
            Err(e) => {
                error!("Ledger storage unavailable, unlocks will not be persisted: {}", e);
                Ok(UnlockLedger::in_memory())
            }
        }
    }

    /// Start the poll loop. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.poller.is_some() {
            return;
        }

        info!("🚀 Starting morph tracker");
        match self.ledger.store() {
            Some(store) => info!("💾 Ledger: {:?}", store.path()),
            None => info!("💾 Ledger: in-memory only"),
        }

        let scheduler = PollScheduler::new(
            self.config.polling.clone(),
            self.registry.clone(),
            self.dedup.clone(),
            self.stats.clone(),
        );
        self.poller = Some(scheduler.spawn(self.shutdown_tx.subscribe()));
    }

    /// A player became active in `world`. Returns whether the world is new to the poller.
    pub fn on_player_connect(&self, world: Arc<dyn World>) -> bool {
        self.registry.register(world).1
    }

    /// Run a `/morph` command for `sender` and return the replies to show them.
    pub async fn handle_command(&self, sender: &CommandSender, input: &str) -> Vec<Message> {
        let (domain, added) = self.registry.register(sender.world.clone());
        if added {
            info!("Added world via command: {}", domain.name());
        }

        let command = MorphCommand::parse(input);
        let commands = self.commands.clone();
        let (player, entity) = (sender.player, sender.entity);

        match domain
            .execute(move |world| commands.execute(world, player, entity, command))
            .await
        {
            Ok(response) => {
                self.schedule(&domain, response.follow_up);
                response.replies
            }
            Err(e) => {
                warn!("Command {:?} from {} failed: {}", input, player, e);
                vec![Message::raw("Command failed.")]
            }
        }
    }

    /// The player picked an entry on their selection page.
    pub async fn handle_selection(&self, sender: &CommandSender, action: SelectionAction) {
        let (domain, _) = self.registry.register(sender.world.clone());
        let commands = self.commands.clone();
        let (player, entity) = (sender.player, sender.entity);

        match domain
            .execute(move |world| commands.select(world, player, entity, action))
            .await
        {
            Ok(response) => {
                for reply in &response.replies {
                    self.host.send_message(&player, reply);
                }
                self.schedule(&domain, response.follow_up);
            }
            Err(e) => {
                warn!("Selection from {} failed: {}", player, e);
                self.host.close_page(&player);
            }
        }
    }

    fn schedule(&self, domain: &DomainHandle, follow_up: Option<FollowUp>) {
        let Some(FollowUp::FinishUnmorph(entity)) = follow_up else {
            return;
        };
        let applier = self.applier.clone();
        domain.execute_after(applier.refresh_delay(), move |world| {
            if let Err(e) = applier.finish_unmorph(world, entity) {
                warn!("Skin refresh for {} in {} failed: {}", entity, world.id(), e);
            }
        });
    }

    pub fn ledger(&self) -> &Arc<UnlockLedger> {
        &self.ledger
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            domains: self.registry.len(),
            processed_markers: self.dedup.processed().len(),
            unlocks_credited: self.stats.unlocks_credited.load(Ordering::Relaxed),
            scans_completed: self.stats.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.stats.scans_failed.load(Ordering::Relaxed),
            ticks_coalesced: self.stats.ticks_coalesced.load(Ordering::Relaxed),
            ledger_players: self.ledger.players().len(),
        }
    }

    /// Stop polling, drain the world workers, finalize sinks and write the ledger one
    /// last time.
    pub async fn shutdown(mut self) -> Result<(), ServiceError> {
        info!("🛑 Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        if let Some(poller) = self.poller.take() {
            if let Err(e) = poller.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
        }

        self.registry.shutdown(WORKER_SHUTDOWN_GRACE).await;
        self.notices.finalize(NOTICE_DRAIN_GRACE).await;

        let ledger = self.ledger.clone();
        match tokio::task::spawn_blocking(move || ledger.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Final ledger flush failed: {}", e);
                return Err(e.into());
            }
            Err(e) => error!("Final ledger flush panicked: {}", e),
        }

        info!("✅ Shutdown completed successfully");
        Ok(())
    }
}

/// Counters describing the service's operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    pub domains: usize,
    pub processed_markers: usize,
    pub unlocks_credited: u64,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub ticks_coalesced: u64,
    pub ledger_players: usize,
}

/// Build a service from a TOML config file
pub async fn create_service_from_config_file<P: AsRef<Path>>(
    config_path: P,
    host: Arc<dyn Host>,
) -> Result<MorphService, ServiceError> {
    let config = load_config(config_path).await?;
    MorphService::new(config, host).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use morph_ledger::PlayerId;

    use crate::core::host::{DeathMarker, EntityRef};
    use crate::core::memory_host::{MemoryHost, MemoryWorld};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn temp_dir() -> PathBuf {
        let n = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("morph_service_{}_{n}", std::process::id()))
    }

    fn fast_config(data_dir: PathBuf) -> MorphConfig {
        let mut config = MorphConfig::default();
        config.storage.data_dir = data_dir;
        config.polling.initial_delay_ms = 5;
        config.polling.interval_ms = 5;
        config.morph.skin_refresh_delay_ms = 5;
        config.notifications.clear();
        config
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn kill_is_credited_persisted_and_announced() {
        let dir = temp_dir();
        let host = Arc::new(MemoryHost::with_assets(["wolf", "player"]));
        let mut service = MorphService::new(fast_config(dir.clone()), host.clone()).await.unwrap();
        service.start();

        let world = Arc::new(MemoryWorld::new("overworld"));
        let u2 = PlayerId::random();
        world.add_player(EntityRef(2), u2);
        assert!(service.on_player_connect(world.clone()));
        assert!(!service.on_player_connect(world.clone()));

        world.push_marker(DeathMarker {
            entity: EntityRef(7),
            killer: Some(EntityRef(2)),
            victim_model: Some(ModelId::from("wolf")),
        });
        let ledger = service.ledger().clone();
        eventually(|| ledger.is_unlocked(&u2, &ModelId::from("wolf"))).await;
        eventually(|| !host.messages_for(&u2).is_empty()).await;

        // The marker lingers for many more cycles without further credit.
        eventually(|| world.scan_count() > 5).await;
        assert_eq!(host.messages_for(&u2), vec!["Unlocked: wolf".to_string()]);
        let stats = service.stats();
        assert_eq!(stats.unlocks_credited, 1);
        assert_eq!(stats.domains, 1);
        assert_eq!(stats.processed_markers, 1);

        service.shutdown().await.unwrap();
        let reloaded = UnlockLedger::load(LedgerStore::new(dir.join("morphs.json")));
        assert!(reloaded.is_unlocked(&u2, &ModelId::from("wolf")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn command_registers_world_and_lists_nothing_for_new_player() {
        let dir = temp_dir();
        let host = Arc::new(MemoryHost::default());
        let service = MorphService::new(fast_config(dir.clone()), host).await.unwrap();
        let sender = CommandSender {
            player: PlayerId::random(),
            entity: EntityRef(1),
            world: Arc::new(MemoryWorld::new("overworld")),
        };

        let replies = service.handle_command(&sender, "morph list").await;
        assert_eq!(replies, vec![Message::raw("Morphs: ")]);
        assert_eq!(service.stats().domains, 1);

        service.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unmorph_refreshes_skin_after_delay() {
        let dir = temp_dir();
        let host = Arc::new(MemoryHost::with_assets(["wolf", "player"]));
        let service = MorphService::new(fast_config(dir.clone()), host).await.unwrap();
        let world = Arc::new(MemoryWorld::new("overworld"));
        let sender = CommandSender {
            player: PlayerId::random(),
            entity: EntityRef(1),
            world: world.clone(),
        };
        service.ledger().unlock(sender.player, ModelId::from("wolf"));

        assert_eq!(
            service.handle_command(&sender, "wolf").await,
            vec![Message::raw("Morphed into wolf")]
        );
        assert_eq!(
            service.handle_command(&sender, "unmorph").await,
            vec![Message::raw("Unmorphing...")]
        );
        eventually(|| world.skin_outdated(EntityRef(1))).await;
        assert_eq!(world.model_override(EntityRef(1)), None);

        service.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn selection_unmorph_messages_player_and_closes_page() {
        let dir = temp_dir();
        let host = Arc::new(MemoryHost::with_assets(["wolf"]));
        let service = MorphService::new(fast_config(dir.clone()), host.clone()).await.unwrap();
        let world = Arc::new(MemoryWorld::new("overworld"));
        let sender = CommandSender {
            player: PlayerId::random(),
            entity: EntityRef(1),
            world: world.clone(),
        };

        assert!(service.handle_command(&sender, "").await.is_empty());
        assert!(host.open_page_for(&sender.player).is_some());

        service.handle_selection(&sender, SelectionAction::Unmorph).await;
        // No "player" asset: the fallback path runs.
        assert_eq!(host.messages_for(&sender.player), vec!["Unmorphed (Fallback).".to_string()]);
        assert!(host.open_page_for(&sender.player).is_none());

        service.shutdown().await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unusable_data_dir_degrades_to_memory() {
        let blocker = temp_dir();
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut storage = StorageConfig {
            data_dir: blocker.join("nested"),
            ..StorageConfig::default()
        };
        let ledger = MorphService::open_ledger(&storage).unwrap();
        assert!(!ledger.is_persistent());

        storage.require_persistence = true;
        assert!(matches!(
            MorphService::open_ledger(&storage),
            Err(ServiceError::Storage(_))
        ));
        std::fs::remove_file(&blocker).ok();
    }
}
