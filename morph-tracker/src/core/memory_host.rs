/*!
In-memory host implementation for tests and local tooling
*/

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use morph_ledger::{ModelId, PlayerId};
use parking_lot::Mutex;

use crate::core::error::HostError;
use crate::core::host::{DeathMarker, EntityRef, Host, Message, ModelAsset, World, WorldId};
use crate::core::selection::SelectionPage;

#[derive(Default)]
struct WorldState {
    markers: Vec<DeathMarker>,
    players: HashMap<EntityRef, PlayerId>,
    overrides: HashMap<EntityRef, ModelId>,
    outdated_skins: HashSet<EntityRef>,
    scan_failure: Option<HostError>,
    reject_overrides: bool,
    scans: usize,
}

/// A world whose entities are plain maps.
pub struct MemoryWorld {
    id: WorldId,
    name: String,
    state: Mutex<WorldState>,
}

impl MemoryWorld {
    pub fn new(id: &str) -> Self {
        Self {
            id: WorldId::from(id),
            name: id.to_string(),
            state: Mutex::new(WorldState::default()),
        }
    }

    pub fn add_player(&self, entity: EntityRef, player: PlayerId) {
        self.state.lock().players.insert(entity, player);
    }

    /// Simulate a disconnect: the entity no longer resolves to a player.
    pub fn remove_player(&self, entity: EntityRef) {
        self.state.lock().players.remove(&entity);
    }

    pub fn push_marker(&self, marker: DeathMarker) {
        self.state.lock().markers.push(marker);
    }

    /// Simulate respawn/despawn: the host drops every death marker.
    pub fn clear_markers(&self) {
        self.state.lock().markers.clear();
    }

    pub fn fail_scans_with(&self, error: Option<HostError>) {
        self.state.lock().scan_failure = error;
    }

    pub fn reject_overrides(&self, reject: bool) {
        self.state.lock().reject_overrides = reject;
    }

    pub fn model_override(&self, entity: EntityRef) -> Option<ModelId> {
        self.state.lock().overrides.get(&entity).cloned()
    }

    pub fn skin_outdated(&self, entity: EntityRef) -> bool {
        self.state.lock().outdated_skins.contains(&entity)
    }

    pub fn scan_count(&self) -> usize {
        self.state.lock().scans
    }
}

impl World for MemoryWorld {
    fn id(&self) -> WorldId {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn death_markers(&self) -> Result<Vec<DeathMarker>, HostError> {
        let mut state = self.state.lock();
        state.scans += 1;
        if let Some(error) = &state.scan_failure {
            return Err(error.clone());
        }
        Ok(state.markers.clone())
    }

    fn player_identity(&self, entity: EntityRef) -> Option<PlayerId> {
        self.state.lock().players.get(&entity).copied()
    }

    fn set_model_override(&self, entity: EntityRef, model: &ModelAsset) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.reject_overrides {
            return Err(HostError::Store("model component rejected".into()));
        }
        state.overrides.insert(entity, model.id.clone());
        Ok(())
    }

    fn clear_model_override(&self, entity: EntityRef) -> Result<bool, HostError> {
        Ok(self.state.lock().overrides.remove(&entity).is_some())
    }

    fn mark_skin_outdated(&self, entity: EntityRef) -> Result<(), HostError> {
        self.state.lock().outdated_skins.insert(entity);
        Ok(())
    }
}

/// Host services backed by in-memory tables; records everything it is asked to show.
#[derive(Default)]
pub struct MemoryHost {
    assets: Mutex<HashSet<ModelId>>,
    permissions: Mutex<HashMap<PlayerId, HashSet<String>>>,
    messages: Mutex<Vec<(PlayerId, Message)>>,
    pages: Mutex<HashMap<PlayerId, SelectionPage>>,
    pages_unavailable: AtomicBool,
}

impl MemoryHost {
    pub fn with_assets<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let host = Self::default();
        host.assets
            .lock()
            .extend(ids.into_iter().map(ModelId::new));
        host
    }

    pub fn grant_permission(&self, player: PlayerId, node: &str) {
        self.permissions
            .lock()
            .entry(player)
            .or_default()
            .insert(node.to_string());
    }

    pub fn set_pages_unavailable(&self, unavailable: bool) {
        self.pages_unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Plain text of every message sent to `player`, oldest first.
    pub fn messages_for(&self, player: &PlayerId) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to == player)
            .map(|(_, message)| message.plain_text())
            .collect()
    }

    pub fn open_page_for(&self, player: &PlayerId) -> Option<SelectionPage> {
        self.pages.lock().get(player).cloned()
    }
}

impl Host for MemoryHost {
    fn model_asset(&self, id: &ModelId) -> Option<ModelAsset> {
        self.assets
            .lock()
            .contains(id)
            .then(|| ModelAsset::unit_scale(id.clone()))
    }

    fn has_permission(&self, player: &PlayerId, node: &str) -> bool {
        self.permissions
            .lock()
            .get(player)
            .is_some_and(|nodes| nodes.contains(node))
    }

    fn send_message(&self, player: &PlayerId, message: &Message) {
        self.messages.lock().push((*player, message.clone()));
    }

    fn open_page(&self, player: &PlayerId, page: &SelectionPage) -> Result<(), HostError> {
        if self.pages_unavailable.load(Ordering::Relaxed) {
            return Err(HostError::Unavailable("page manager".into()));
        }
        self.pages.lock().insert(*player, page.clone());
        Ok(())
    }

    fn close_page(&self, player: &PlayerId) {
        self.pages.lock().remove(player);
    }
}
