/*!
In-memory unlock ledger with write-through persistence
*/

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::identity::{ModelId, PlayerId};
use crate::snapshot::LedgerSnapshot;
use crate::store::LedgerStore;

/// Per-player sets of unlocked models.
///
/// All mutation goes through [`UnlockLedger::unlock`], which performs the
/// check-then-insert and the resulting flush under one write lock. Concurrent callers
/// therefore observe exactly one `true` for a given `(player, model)` pair, and
/// snapshots reach the disk in the order the mutations happened.
#[derive(Debug)]
pub struct UnlockLedger {
    entries: RwLock<HashMap<PlayerId, HashSet<ModelId>>>,
    store: Option<LedgerStore>,
}

impl UnlockLedger {
    /// A ledger that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Load the ledger backed by `store`. A missing file yields an empty ledger, and so
    /// does an unreadable or corrupt one (logged, not fatal). A corrupt file is moved
    /// aside first so the next write does not replace it.
    pub fn load(store: LedgerStore) -> Self {
        let entries = match store.load() {
            Ok(Some(snapshot)) => snapshot.into_entries(),
            Ok(None) => {
                info!("Starting with an empty ledger at {:?}", store.path());
                HashMap::new()
            }
            Err(e @ (LedgerError::Malformed(_) | LedgerError::UnsupportedVersion { .. })) => {
                match store.quarantine() {
                    Ok(moved) => warn!(
                        "Ledger at {:?} is unreadable ({}), moved it to {:?} and starting empty",
                        store.path(),
                        e,
                        moved
                    ),
                    Err(q) => warn!(
                        "Ledger at {:?} is unreadable ({}) and could not be moved aside ({}), starting empty",
                        store.path(),
                        e,
                        q
                    ),
                }
                HashMap::new()
            }
            Err(e) => {
                warn!("Could not load ledger from {:?}, starting empty: {}", store.path(), e);
                HashMap::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            store: Some(store),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&LedgerStore> {
        self.store.as_ref()
    }

    /// Grant `model` to `player`. Returns whether the player's set changed; the ledger
    /// is flushed only in that case.
    pub fn unlock(&self, player: PlayerId, model: ModelId) -> bool {
        let mut entries = self.entries.write();
        let changed = entries.entry(player).or_default().insert(model.clone());

        if changed {
            debug!("Unlocked {} for {}", model, player);
            if let Err(e) = self.write_snapshot(&entries) {
                warn!("Ledger flush after unlocking {} for {} failed: {}", model, player, e);
            }
        }
        changed
    }

    /// Unlocked models for `player`, sorted. Empty if the player has none.
    pub fn list_unlocked(&self, player: &PlayerId) -> BTreeSet<ModelId> {
        self.entries
            .read()
            .get(player)
            .map(|models| models.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_unlocked(&self, player: &PlayerId, model: &ModelId) -> bool {
        self.entries
            .read()
            .get(player)
            .is_some_and(|models| models.contains(model))
    }

    /// Every player with their unlock count, ordered by player id.
    pub fn players(&self) -> Vec<(PlayerId, usize)> {
        let mut players: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(player, models)| (*player, models.len()))
            .collect();
        players.sort();
        players
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot::capture(&self.entries.read())
    }

    /// Rewrite the whole mapping to storage. A no-op for in-memory ledgers.
    pub fn flush(&self) -> LedgerResult<()> {
        let entries = self.entries.read();
        self.write_snapshot(&entries)
    }

    fn write_snapshot(&self, entries: &HashMap<PlayerId, HashSet<ModelId>>) -> LedgerResult<()> {
        match &self.store {
            Some(store) => store.save(&LedgerSnapshot::capture(entries)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn temp_store() -> (PathBuf, LedgerStore) {
        let n = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("morph_ledger_{}_{n}", std::process::id()));
        let store = LedgerStore::prepare(&dir, "morphs.json").unwrap();
        (dir, store)
    }

    #[test]
    fn unlock_is_idempotent() {
        let ledger = UnlockLedger::in_memory();
        let u1 = PlayerId::random();

        assert!(ledger.unlock(u1, ModelId::from("wolf")));
        assert_eq!(ledger.list_unlocked(&u1), BTreeSet::from([ModelId::from("wolf")]));
        assert!(!ledger.unlock(u1, ModelId::from("wolf")));
        assert_eq!(ledger.list_unlocked(&u1).len(), 1);
    }

    #[test]
    fn unknown_player_lists_empty() {
        let ledger = UnlockLedger::in_memory();
        assert!(ledger.list_unlocked(&PlayerId::random()).is_empty());
        assert!(ledger.players().is_empty());
    }

    #[test]
    fn flush_then_load_reproduces_mapping() {
        let (dir, store) = temp_store();
        let (a, b) = (PlayerId::random(), PlayerId::random());

        let ledger = UnlockLedger::load(store.clone());
        ledger.unlock(a, ModelId::from("wolf"));
        ledger.unlock(a, ModelId::from("bear"));
        ledger.unlock(b, ModelId::from("skeleton"));
        ledger.flush().unwrap();

        let reloaded = UnlockLedger::load(store);
        assert_eq!(reloaded.list_unlocked(&a), ledger.list_unlocked(&a));
        assert_eq!(reloaded.list_unlocked(&b), ledger.list_unlocked(&b));
        assert_eq!(reloaded.players().len(), 2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unlock_writes_through_only_on_change() {
        let (dir, store) = temp_store();
        let player = PlayerId::random();
        let ledger = UnlockLedger::load(store.clone());

        assert!(ledger.unlock(player, ModelId::from("wolf")));
        assert!(store.path().exists());

        fs::remove_file(store.path()).unwrap();
        assert!(!ledger.unlock(player, ModelId::from("wolf")));
        assert!(!store.path().exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_file_yields_empty_ledger() {
        let (dir, store) = temp_store();
        fs::write(store.path(), "{ not json").unwrap();

        let ledger = UnlockLedger::load(store);
        assert!(ledger.players().is_empty());
        assert!(ledger.is_persistent());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_file_survives_later_unlocks() {
        let (dir, store) = temp_store();
        fs::write(store.path(), "{ not json").unwrap();

        let ledger = UnlockLedger::load(store.clone());
        assert!(ledger.unlock(PlayerId::random(), ModelId::from("wolf")));

        assert_eq!(fs::read_to_string(dir.join("morphs.json.corrupt")).unwrap(), "{ not json");
        assert_eq!(store.load().unwrap().unwrap().player_count(), 1);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_write_keeps_state_until_next_flush() {
        let (dir, store) = temp_store();
        let player = PlayerId::random();
        let ledger = UnlockLedger::load(store.clone());

        // A plain file where the data directory was makes every save fail.
        fs::remove_dir_all(&dir).unwrap();
        fs::write(&dir, b"blocked").unwrap();

        assert!(ledger.unlock(player, ModelId::from("wolf")));
        assert!(ledger.is_unlocked(&player, &ModelId::from("wolf")));
        assert!(ledger.flush().is_err());

        fs::remove_file(&dir).unwrap();
        fs::create_dir_all(&dir).unwrap();
        ledger.flush().unwrap();

        let reloaded = UnlockLedger::load(store);
        assert_eq!(reloaded.list_unlocked(&player), BTreeSet::from([ModelId::from("wolf")]));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn racing_unlocks_have_one_winner() {
        let ledger = Arc::new(UnlockLedger::in_memory());
        let player = PlayerId::random();

        for round in 0..50 {
            let model = ModelId::new(format!("model-{round}"));
            let barrier = Barrier::new(2);
            let wins = std::thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            ledger.unlock(player, model.clone())
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|changed| *changed)
                    .count()
            });
            assert_eq!(wins, 1);
        }
        assert_eq!(ledger.list_unlocked(&player).len(), 50);
    }
}
