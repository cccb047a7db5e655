/*!
At-most-once crediting of death markers.

A marker is claimed before anything else is resolved about it. If the killer has
already disconnected or the victim wore no model, that death is simply spent; it
is never retried on a later scan.
*/

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use morph_ledger::{ModelId, PlayerId, UnlockLedger};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::HostError;
use crate::core::host::{DeathMarker, EntityRef, World, WorldId};

/// Identity of one death occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    pub world: WorldId,
    pub entity: EntityRef,
}

/// Markers already handled, with the last time each was seen on its entity.
///
/// An entry is only evicted once its marker has been absent for longer than the
/// retention window, so a marker that stays on a corpse is never credited twice.
pub struct ProcessedMarkers {
    seen: Mutex<HashMap<MarkerKey, Instant>>,
    retention: Option<Duration>,
}

impl ProcessedMarkers {
    /// `retention = None` never forgets a marker.
    pub fn new(retention: Option<Duration>) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Claim `key`. Exactly one caller gets `true`; later calls refresh the last-seen
    /// time and get `false`.
    pub fn claim(&self, key: MarkerKey, now: Instant) -> bool {
        match self.seen.lock().entry(key) {
            Entry::Occupied(mut seen) => {
                *seen.get_mut() = now;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn contains(&self, key: &MarkerKey) -> bool {
        self.seen.lock().contains_key(key)
    }

    /// Forget markers not seen within the retention window. Returns how many were dropped.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= retention);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// A kill that added a model to the killer's ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub killer: PlayerId,
    pub model: ModelId,
}

/// What happened to a single marker during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    AlreadyProcessed,
    /// Environmental death, or the killer is not a player.
    NoKiller,
    /// The killer could not be resolved to a player identity.
    KillerUnresolved,
    /// The victim was not wearing a model.
    NoModel,
    AlreadyUnlocked(Credit),
    Unlocked(Credit),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub markers_seen: usize,
    pub newly_claimed: usize,
    pub forfeited: usize,
    pub credits: Vec<Credit>,
}

/// Turns death markers into ledger unlocks.
pub struct KillDeduplicator {
    ledger: Arc<UnlockLedger>,
    processed: ProcessedMarkers,
}

impl KillDeduplicator {
    pub fn new(ledger: Arc<UnlockLedger>, retention: Option<Duration>) -> Self {
        Self {
            ledger,
            processed: ProcessedMarkers::new(retention),
        }
    }

    pub fn processed(&self) -> &ProcessedMarkers {
        &self.processed
    }

    /// Scan every death marker currently in `world`.
    pub fn scan(&self, world: &dyn World) -> Result<ScanReport, HostError> {
        let world_id = world.id();
        let markers = world.death_markers()?;
        let now = Instant::now();

        let mut report = ScanReport {
            markers_seen: markers.len(),
            ..ScanReport::default()
        };

        for marker in &markers {
            match self.process_marker(world, &world_id, marker, now) {
                MarkerOutcome::AlreadyProcessed => {}
                MarkerOutcome::Unlocked(credit) => {
                    report.newly_claimed += 1;
                    report.credits.push(credit);
                }
                MarkerOutcome::AlreadyUnlocked(_) => report.newly_claimed += 1,
                MarkerOutcome::NoKiller | MarkerOutcome::KillerUnresolved | MarkerOutcome::NoModel => {
                    report.newly_claimed += 1;
                    report.forfeited += 1;
                }
            }
        }

        Ok(report)
    }

    pub fn process_marker(
        &self,
        world: &dyn World,
        world_id: &WorldId,
        marker: &DeathMarker,
        now: Instant,
    ) -> MarkerOutcome {
        let key = MarkerKey {
            world: world_id.clone(),
            entity: marker.entity,
        };
        if !self.processed.claim(key, now) {
            return MarkerOutcome::AlreadyProcessed;
        }

        let Some(killer_entity) = marker.killer else {
            debug!("Death of {} in {} has no killer", marker.entity, world_id);
            return MarkerOutcome::NoKiller;
        };
        let Some(killer) = world.player_identity(killer_entity) else {
            debug!(
                "Killer {} of {} in {} is not a resolvable player",
                killer_entity, marker.entity, world_id
            );
            return MarkerOutcome::KillerUnresolved;
        };
        let Some(model) = marker.victim_model.clone() else {
            debug!("Victim {} in {} wore no model", marker.entity, world_id);
            return MarkerOutcome::NoModel;
        };

        let credit = Credit {
            killer,
            model: model.clone(),
        };
        if self.ledger.unlock(killer, model) {
            MarkerOutcome::Unlocked(credit)
        } else {
            MarkerOutcome::AlreadyUnlocked(credit)
        }
    }
}
