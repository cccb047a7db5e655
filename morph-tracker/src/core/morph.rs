/*!
Applying and removing model overrides
*/

use std::sync::Arc;
use std::time::Duration;

use morph_ledger::ModelId;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::error::HostError;
use crate::core::host::{EntityRef, Host, World};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("no model asset named {0}")]
    UnknownModel(ModelId),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result of the first half of an unmorph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmorphOutcome {
    /// The default model was applied; the override must be dropped and the skin
    /// refreshed after the refresh delay.
    Refreshing,
    /// The default model could not be applied, so the override was removed directly.
    /// No skin refresh follows.
    Fallback,
    Failed(String),
}

pub struct MorphApplier {
    host: Arc<dyn Host>,
    default_model: ModelId,
    refresh_delay: Duration,
}

impl MorphApplier {
    pub fn new(host: Arc<dyn Host>, default_model: ModelId, refresh_delay: Duration) -> Self {
        Self {
            host,
            default_model,
            refresh_delay,
        }
    }

    pub fn refresh_delay(&self) -> Duration {
        self.refresh_delay
    }

    /// Render `entity` as `model` at unit scale.
    pub fn apply(&self, world: &dyn World, entity: EntityRef, model: &ModelId) -> Result<(), ApplyError> {
        let asset = self
            .host
            .model_asset(model)
            .ok_or_else(|| ApplyError::UnknownModel(model.clone()))?;
        world.set_model_override(entity, &asset)?;
        debug!("Applied model {} to {} in {}", model, entity, world.id());
        Ok(())
    }

    // TODO: the fallback path mirrors a host timing quirk (override removal racing the
    // skin resend); re-check it against current host builds before relying on it.
    pub fn begin_unmorph(&self, world: &dyn World, entity: EntityRef) -> UnmorphOutcome {
        match self.apply(world, entity, &self.default_model) {
            Ok(()) => UnmorphOutcome::Refreshing,
            Err(e) => {
                debug!("Default model unavailable for {}: {}, removing override directly", entity, e);
                match world.clear_model_override(entity) {
                    Ok(_) => UnmorphOutcome::Fallback,
                    Err(e) => {
                        warn!("Unmorph of {} in {} failed: {}", entity, world.id(), e);
                        UnmorphOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }

    /// Second half of a refreshing unmorph: drop the override and resend the skin.
    pub fn finish_unmorph(&self, world: &dyn World, entity: EntityRef) -> Result<(), HostError> {
        world.clear_model_override(entity)?;
        world.mark_skin_outdated(entity)
    }
}
