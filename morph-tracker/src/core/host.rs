/*!
Capability interfaces onto the game host.

The tracker never sees the host's component store, asset registry, or page
system directly. A [`World`] is one scan domain: it can list the death markers
currently present, resolve which player owns an entity, and change the model an
entity is rendered with. [`Host`] covers the process-wide services: the asset
catalog, permissions, chat and the interactive page surface.
*/

use std::fmt;
use std::sync::Arc;

use morph_ledger::{ModelId, PlayerId};
use serde::{Deserialize, Serialize};

use crate::core::error::HostError;
use crate::core::selection::SelectionPage;

/// Identity of a scan domain (one loaded world).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub String);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque handle to an entity inside one world. Stable for the lifetime of that entity
/// instance; the host may hand the same value to a later entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef(pub u64);

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A "this entity died" fact as read from the host. Present until the host clears it
/// (respawn or despawn).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathMarker {
    pub entity: EntityRef,
    /// Entity credited with the kill; `None` for environmental deaths.
    pub killer: Option<EntityRef>,
    /// Model the victim was wearing when it died.
    pub victim_model: Option<ModelId>,
}

/// A model asset resolved from the host catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAsset {
    pub id: ModelId,
    pub scale: f32,
}

impl ModelAsset {
    pub fn unit_scale(id: ModelId) -> Self {
        Self { id, scale: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSegment {
    pub text: String,
    pub color: Option<String>,
}

/// Chat text sent to a player, made of optionally colored segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Message {
    pub segments: Vec<MessageSegment>,
}

impl Message {
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            segments: vec![MessageSegment {
                text: text.into(),
                color: None,
            }],
        }
    }

    pub fn colored(mut self, text: impl Into<String>, color: impl Into<String>) -> Self {
        self.segments.push(MessageSegment {
            text: text.into(),
            color: Some(color.into()),
        });
        self
    }

    pub fn plain_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plain_text())
    }
}

/// One loaded world. Implementations are called from that world's worker only, never
/// concurrently with themselves.
pub trait World: Send + Sync {
    fn id(&self) -> WorldId;

    fn name(&self) -> String;

    /// Every entity currently carrying a death marker.
    fn death_markers(&self) -> Result<Vec<DeathMarker>, HostError>;

    /// Stable identity of the player controlling `entity`, if it is a player.
    fn player_identity(&self, entity: EntityRef) -> Option<PlayerId>;

    /// Render `entity` with `model` instead of its own appearance.
    fn set_model_override(&self, entity: EntityRef, model: &ModelAsset) -> Result<(), HostError>;

    /// Drop any model override. Returns whether one was present.
    fn clear_model_override(&self, entity: EntityRef) -> Result<bool, HostError>;

    /// Force the entity's own skin to be resent to clients.
    fn mark_skin_outdated(&self, entity: EntityRef) -> Result<(), HostError>;
}

/// Process-wide host services.
pub trait Host: Send + Sync {
    fn model_asset(&self, id: &ModelId) -> Option<ModelAsset>;

    fn has_permission(&self, player: &PlayerId, node: &str) -> bool;

    fn send_message(&self, player: &PlayerId, message: &Message);

    fn open_page(&self, player: &PlayerId, page: &SelectionPage) -> Result<(), HostError>;

    fn close_page(&self, player: &PlayerId);
}

/// The player issuing a command or page selection.
#[derive(Clone)]
pub struct CommandSender {
    pub player: PlayerId,
    pub entity: EntityRef,
    pub world: Arc<dyn World>,
}

impl fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSender")
            .field("player", &self.player)
            .field("entity", &self.entity)
            .field("world", &self.world.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_plain_text_joins_segments() {
        let message = Message::raw("Unlocked: ").colored("wolf", "aqua");
        assert_eq!(message.plain_text(), "Unlocked: wolf");
        assert_eq!(message.segments[1].color.as_deref(), Some("aqua"));
    }
}
