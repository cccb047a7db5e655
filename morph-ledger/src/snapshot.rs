/*!
Versioned, human-readable snapshot of the whole ledger.

```json
{
  "version": 1,
  "saved_at": "2026-01-01T12:00:00Z",
  "players": {
    "6f1c1e2a-3b4d-4c5e-8f90-a1b2c3d4e5f6": ["bear", "wolf"]
  }
}
```
*/

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::identity::{ModelId, PlayerId};

/// Current on-disk format revision.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full ledger contents as written to disk. Ordered collections keep the file stable
/// between writes so it diffs cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, BTreeSet<ModelId>>,
}

impl LedgerSnapshot {
    /// Capture the in-memory mapping.
    pub fn capture(entries: &HashMap<PlayerId, HashSet<ModelId>>) -> Self {
        let players = entries
            .iter()
            .filter(|(_, models)| !models.is_empty())
            .map(|(player, models)| (*player, models.iter().cloned().collect()))
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            players,
        }
    }

    /// Parse and validate a snapshot document.
    pub fn from_json(bytes: &[u8]) -> LedgerResult<Self> {
        let snapshot: LedgerSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> LedgerResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Rebuild the in-memory mapping. Players with an empty set are dropped so that
    /// presence in the map always implies at least one unlock.
    pub fn into_entries(self) -> HashMap<PlayerId, HashSet<ModelId>> {
        self.players
            .into_iter()
            .filter(|(_, models)| !models.is_empty())
            .map(|(player, models)| (player, models.into_iter().collect()))
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_future_version() {
        let doc = br#"{"version": 7, "saved_at": "2026-01-01T00:00:00Z", "players": {}}"#;
        match LedgerSnapshot::from_json(doc) {
            Err(LedgerError::UnsupportedVersion { found: 7, expected }) => {
                assert_eq!(expected, SNAPSHOT_VERSION)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn drops_players_with_empty_sets() {
        let doc = br#"{
            "version": 1,
            "saved_at": "2026-01-01T00:00:00Z",
            "players": {
                "6f1c1e2a-3b4d-4c5e-8f90-a1b2c3d4e5f6": [],
                "0d4f3b5e-9a1c-4e2f-b7d8-112233445566": ["wolf"]
            }
        }"#;
        let entries = LedgerSnapshot::from_json(doc).unwrap().into_entries();
        assert_eq!(entries.len(), 1);
        let player: PlayerId = "0d4f3b5e-9a1c-4e2f-b7d8-112233445566".parse().unwrap();
        assert!(entries[&player].contains(&ModelId::from("wolf")));
    }

    #[test]
    fn written_document_is_sorted_and_versioned() {
        let player = PlayerId::random();
        let mut entries = HashMap::new();
        entries.insert(
            player,
            HashSet::from([ModelId::from("wolf"), ModelId::from("bear")]),
        );

        let json = String::from_utf8(LedgerSnapshot::capture(&entries).to_json().unwrap()).unwrap();
        assert!(json.contains("\"version\": 1"));
        let bear = json.find("bear").unwrap();
        let wolf = json.find("wolf").unwrap();
        assert!(bear < wolf);
    }
}
