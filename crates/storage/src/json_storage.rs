//! JSON file storage implementation.
//!
//! Stores one JSON file per checkpoint record under
//! `<root>/users/<user>/<journey>/<checkpoint>.json`. Writes go through a
//! temp file and a rename so readers never see a partial record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use journey_core::{CheckpointId, CheckpointKey, CheckpointState, JourneyId, UserId};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::{prepare_write, KeyedLocks, ProgressStore, Result};

/// On-disk record: the state plus the checkpoint it belongs to.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    checkpoint_id: CheckpointId,
    #[serde(flatten)]
    state: CheckpointState,
}

/// File-based JSON progress store.
pub struct JsonStore {
    root: PathBuf,
    locks: KeyedLocks<CheckpointKey>,
}

impl JsonStore {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("users")).await?;
        Ok(Self {
            root,
            locks: KeyedLocks::new(),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn journey_dir(&self, user_id: &UserId, journey_id: &JourneyId) -> PathBuf {
        self.root
            .join("users")
            .join(encode_component(user_id.as_str()))
            .join(encode_component(journey_id.as_str()))
    }

    fn record_path(&self, key: &CheckpointKey) -> PathBuf {
        self.journey_dir(&key.user_id, &key.journey_id)
            .join(format!("{}.json", encode_component(key.checkpoint_id.as_str())))
    }
}

#[async_trait]
impl ProgressStore for JsonStore {
    async fn get_checkpoint_state(&self, key: &CheckpointKey) -> Result<Option<CheckpointState>> {
        let record: Option<StoredRecord> = read_json(&self.record_path(key)).await?;
        Ok(record.map(|r| r.state))
    }

    async fn set_checkpoint_state(
        &self,
        key: &CheckpointKey,
        state: CheckpointState,
        expected_revision: Option<u64>,
    ) -> Result<CheckpointState> {
        let _guard = self.locks.lock(key).await;

        let path = self.record_path(key);
        let current: Option<StoredRecord> = read_json(&path).await?;
        let stored = prepare_write(key, current.as_ref().map(|r| &r.state), state, expected_revision)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let record = StoredRecord {
            checkpoint_id: key.checkpoint_id.clone(),
            state: stored,
        };
        let json = serde_json::to_string_pretty(&record)?;
        let tmp = path.with_extension(format!("json.{}.tmp", record.state.revision));
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;

        debug!(key = %key, revision = record.state.revision, "stored checkpoint state");
        Ok(record.state)
    }

    async fn list_checkpoint_states(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
    ) -> Result<HashMap<CheckpointId, CheckpointState>> {
        let records: Vec<StoredRecord> = list_dir(&self.journey_dir(user_id, journey_id)).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.checkpoint_id, r.state))
            .collect())
    }
}

/// Percent-encode anything outside `[A-Za-z0-9_-]` so ids are safe path
/// components (no separators, no `.`/`..`).
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    out
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable record");
                return Err(e);
            }
        }
    }
    Ok(items)
}
