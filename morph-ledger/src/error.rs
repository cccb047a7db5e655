/*!
Errors raised while reading or writing the ledger file
*/

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Reading, writing or renaming the snapshot file failed.
    #[error("ledger I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON for the expected layout.
    #[error("ledger snapshot is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The snapshot was written by a newer or unknown format revision.
    #[error("unsupported ledger snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
