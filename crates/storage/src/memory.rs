//! In-memory progress store, used for tests and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use journey_core::{CheckpointId, CheckpointKey, CheckpointState, JourneyId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use super::{prepare_write, ProgressStore, Result};

/// Process-local store backed by a hash map.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<CheckpointKey, CheckpointState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been written yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get_checkpoint_state(&self, key: &CheckpointKey) -> Result<Option<CheckpointState>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set_checkpoint_state(
        &self,
        key: &CheckpointKey,
        state: CheckpointState,
        expected_revision: Option<u64>,
    ) -> Result<CheckpointState> {
        // The write lock spans compare and write.
        let mut records = self.records.write().await;
        let stored = prepare_write(key, records.get(key), state, expected_revision)?;
        records.insert(key.clone(), stored.clone());
        debug!(key = %key, revision = stored.revision, "stored checkpoint state");
        Ok(stored)
    }

    async fn list_checkpoint_states(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
    ) -> Result<HashMap<CheckpointId, CheckpointState>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|(k, _)| &k.user_id == user_id && &k.journey_id == journey_id)
            .map(|(k, v)| (k.checkpoint_id.clone(), v.clone()))
            .collect())
    }
}
