//! Serializable queue state for best-effort restarts.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persistence::{KeyValueStore, QUEUE_SNAPSHOT_KEY};

use super::error::QueueError;
use super::item::DownloadJob;

/// Every job the queue knows about, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs in submission order.
    pub jobs: Vec<DownloadJob>,
}

impl QueueSnapshot {
    /// Writes the snapshot under [`QUEUE_SNAPSHOT_KEY`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if encoding or the store write fails.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), QueueError> {
        let json = serde_json::to_string(self)?;
        store.set(QUEUE_SNAPSHOT_KEY, &json)?;
        Ok(())
    }

    /// Reads the stored snapshot. A missing or corrupt value yields an empty
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Persistence`] only when the store itself fails.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, QueueError> {
        let Some(json) = store.get(QUEUE_SNAPSHOT_KEY)? else {
            return Ok(Self::default());
        };
        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(error = %e, "discarding corrupt queue snapshot");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn test_missing_snapshot_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(QueueSnapshot::load(&store).unwrap(), QueueSnapshot::default());
    }

    #[test]
    fn test_corrupt_snapshot_is_empty() {
        let store = MemoryStore::new();
        store.set(QUEUE_SNAPSHOT_KEY, "{not json").unwrap();
        assert!(QueueSnapshot::load(&store).unwrap().jobs.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let snapshot = QueueSnapshot {
            jobs: vec![DownloadJob::new("a", "movie", "https://a.test/a.mp4", "a.mp4")],
        };
        snapshot.save(&store).unwrap();
        assert_eq!(QueueSnapshot::load(&store).unwrap(), snapshot);
    }
}
