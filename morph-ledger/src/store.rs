/*!
File-backed persistence for ledger snapshots
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::snapshot::LedgerSnapshot;

/// Reads and writes the snapshot file. Writes go to a sibling temp file that is
/// renamed over the target, so a crash mid-write never leaves a truncated ledger.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create `data_dir` if needed and return a store for `data_dir/file_name`.
    pub fn prepare(data_dir: &Path, file_name: &str) -> LedgerResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| LedgerError::io(data_dir, e))?;
        Ok(Self::new(data_dir.join(file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. `Ok(None)` means the file does not exist yet.
    pub fn load(&self) -> LedgerResult<Option<LedgerSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No ledger file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };

        let snapshot = LedgerSnapshot::from_json(&bytes)?;
        info!(
            "Loaded ledger with {} players from {:?}",
            snapshot.player_count(),
            self.path
        );
        Ok(Some(snapshot))
    }

    /// Overwrite the file with `snapshot`.
    pub fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        let bytes = snapshot.to_json()?;
        let tmp_path = self.tmp_path();

        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| LedgerError::io(&tmp_path, e))?;
            file.write_all(&bytes)
                .and_then(|_| file.sync_all())
                .map_err(|e| LedgerError::io(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| LedgerError::io(&self.path, e))?;

        debug!(
            "Saved ledger with {} players to {:?}",
            snapshot.player_count(),
            self.path
        );
        Ok(())
    }

    /// Move an unreadable snapshot aside to `<name>.corrupt`, replacing any earlier
    /// one, and return where it went.
    pub fn quarantine(&self) -> LedgerResult<PathBuf> {
        let target = self.sibling(".corrupt");
        fs::rename(&self.path, &target).map_err(|e| LedgerError::io(&self.path, e))?;
        Ok(target)
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }
}
