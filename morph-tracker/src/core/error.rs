/*!
Error types for the tracker components
*/

use std::path::PathBuf;
use thiserror::Error;

use morph_ledger::LedgerError;

use crate::core::host::{EntityRef, WorldId};

/// Failures reported by the host's entity and asset systems.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The entity was removed before the host could act on it.
    #[error("entity {0} no longer exists")]
    EntityGone(EntityRef),

    /// The host component store rejected the operation.
    #[error("entity store error: {0}")]
    Store(String),

    /// The capability is not available right now (world unloading, page system busy...).
    #[error("host capability unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persistence was required but the ledger storage could not be prepared.
    #[error("ledger storage unavailable: {0}")]
    Storage(#[from] LedgerError),

    /// The worker for this world has stopped accepting jobs.
    #[error("world {0} is no longer being served")]
    DomainClosed(WorldId),

    /// A job dropped its result, usually because it panicked.
    #[error("job on world {0} did not complete")]
    JobFailed(WorldId),
}
