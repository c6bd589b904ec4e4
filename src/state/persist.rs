//! Durable snapshot of the derived dashboard state.
//!
//! The state lives in seven independent slots of a key-value store so that a
//! damaged slot only loses its own data. Older stores that never wrote the
//! total-rounds slot are still readable.

use super::history::{HistoryStore, HistoryTable, RoundMappings, RoundRecord};
use super::key;
use super::sequencer::MultiRoundConfig;
use crate::types::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Slot names in the key-value store
pub mod slots {
    pub const VOTE_RESULTS: &str = "undercover_vote_results";
    pub const DESCRIPTIONS: &str = "undercover_descriptions";
    pub const ROUND_MAPPINGS: &str = "undercover_round_mappings";
    pub const MULTI_ROUND_CONFIG: &str = "undercover_multi_round_config";
    pub const CURRENT_ROUND_INDEX: &str = "undercover_current_round_index";
    pub const TOTAL_ROUNDS: &str = "undercover_total_rounds";
    pub const ADVANCE_PENDING: &str = "undercover_advance_pending";

    pub const SEQUENCE: [&str; 4] = [
        MULTI_ROUND_CONFIG,
        CURRENT_ROUND_INDEX,
        TOTAL_ROUNDS,
        ADVANCE_PENDING,
    ];
    pub const ALL: [&str; 7] = [
        VOTE_RESULTS,
        DESCRIPTIONS,
        ROUND_MAPPINGS,
        MULTI_ROUND_CONFIG,
        CURRENT_ROUND_INDEX,
        TOTAL_ROUNDS,
        ADVANCE_PENDING,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on slot '{slot}': {source}")]
    Io {
        slot: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode slot '{slot}': {source}")]
    Encode {
        slot: String,
        #[source]
        source: serde_json::Error,
    },
}

/// String key-value storage with independent slots
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a slot; a missing slot is `Ok(None)`
    async fn get(&self, slot: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, slot: &str, value: String) -> Result<(), StoreError>;

    async fn remove(&self, slot: &str) -> Result<(), StoreError>;

    /// Remove every slot this store holds
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, slot: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.read().await.get(slot).cloned())
    }

    async fn set(&self, slot: &str, value: String) -> Result<(), StoreError> {
        self.slots.write().await.insert(slot.to_string(), value);
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<(), StoreError> {
        self.slots.write().await.remove(slot);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.slots.write().await.clear();
        Ok(())
    }
}

/// One JSON file per slot inside a state directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slot))
    }

    fn io_error(slot: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            slot: slot.to_string(),
            source,
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, slot: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path(slot)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(slot, e)),
        }
    }

    async fn set(&self, slot: &str, value: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(slot, e))?;

        // Write-then-rename so a crash never leaves a half-written slot
        let tmp = self.dir.join(format!("{}.json.tmp", slot));
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| Self::io_error(slot, e))?;
        tokio::fs::rename(&tmp, self.path(slot))
            .await
            .map_err(|e| Self::io_error(slot, e))
    }

    async fn remove(&self, slot: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(slot)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(slot, e)),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Self::io_error("*", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error("*", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| Self::io_error(&path.display().to_string(), e))?;
            }
        }
        Ok(())
    }
}

/// What the dashboard restores at startup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PersistedState {
    pub history: HistoryStore,
    pub sequence: Option<MultiRoundConfig>,
    /// The current game of `sequence` ended and its successor was not started yet
    pub advance_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    /// History, mappings and sequence state (soft reset)
    GameData,
    /// Everything in the store (hard clear)
    Everything,
}

/// Reads and writes [`PersistedState`] through a [`KeyValueStore`]
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write history, mappings and sequence state. Sequence slots are removed
    /// when no sequence is configured.
    pub async fn save(
        &self,
        history: &HistoryStore,
        sequence: Option<&MultiRoundConfig>,
        advance_pending: bool,
    ) -> Result<(), StoreError> {
        self.write_json(slots::VOTE_RESULTS, &table_to_map(&history.votes))
            .await?;
        self.write_json(slots::DESCRIPTIONS, &table_to_map(&history.descriptions))
            .await?;
        self.write_json(slots::ROUND_MAPPINGS, &history.mappings)
            .await?;

        match sequence {
            Some(config) => {
                self.write_json(slots::MULTI_ROUND_CONFIG, &config.rounds)
                    .await?;
                self.store
                    .set(
                        slots::CURRENT_ROUND_INDEX,
                        config.current_round_index.to_string(),
                    )
                    .await?;
                self.store
                    .set(slots::TOTAL_ROUNDS, config.total_rounds.to_string())
                    .await?;
                self.store
                    .set(slots::ADVANCE_PENDING, advance_pending.to_string())
                    .await?;
            }
            None => {
                for slot in slots::SEQUENCE {
                    self.store.remove(slot).await?;
                }
            }
        }

        Ok(())
    }

    /// Restore everything that can be restored. Unreadable slots fall back to
    /// their empty default and are logged; this never fails.
    pub async fn load(&self) -> PersistedState {
        let mut history = HistoryStore::new();

        if let Some(raw) = self.read_json::<BTreeMap<String, VoteResult>>(slots::VOTE_RESULTS).await {
            history.votes = map_to_table(raw);
        }
        if let Some(raw) = self
            .read_json::<BTreeMap<String, Vec<DescriptionEntry>>>(slots::DESCRIPTIONS)
            .await
        {
            history.descriptions = map_to_table(raw);
        }
        if let Some(mappings) = self.read_json::<RoundMappings>(slots::ROUND_MAPPINGS).await {
            history.mappings = mappings;
        }

        let sequence = self.load_sequence().await;
        let advance_pending = match sequence {
            Some(_) => self.read_flag(slots::ADVANCE_PENDING).await,
            None => false,
        };

        tracing::info!(
            votes = history.votes.len(),
            descriptions = history.descriptions.len(),
            sequence = sequence.is_some(),
            advance_pending,
            "Restored dashboard state"
        );

        PersistedState {
            history,
            sequence,
            advance_pending,
        }
    }

    async fn load_sequence(&self) -> Option<MultiRoundConfig> {
        let rounds = self.read_json::<Vec<WordPair>>(slots::MULTI_ROUND_CONFIG).await?;

        let current_round_index = self
            .read_number(slots::CURRENT_ROUND_INDEX)
            .await
            .unwrap_or(0);
        // Stores written before the total was tracked only have the rounds
        let total_rounds = self
            .read_number(slots::TOTAL_ROUNDS)
            .await
            .unwrap_or(rounds.len());

        let config = MultiRoundConfig {
            rounds,
            current_round_index,
            total_rounds,
        };

        if !config.is_consistent() {
            tracing::warn!(
                index = config.current_round_index,
                total = config.total_rounds,
                configured = config.rounds.len(),
                "Discarding inconsistent persisted sequence"
            );
            return None;
        }

        Some(config)
    }

    /// Remove persisted state for the given scope
    pub async fn clear(&self, scope: ClearScope) -> Result<(), StoreError> {
        match scope {
            ClearScope::GameData => {
                for slot in slots::ALL {
                    self.store.remove(slot).await?;
                }
                tracing::info!("Cleared persisted game data");
            }
            ClearScope::Everything => {
                self.store.clear().await?;
                tracing::info!("Cleared all persisted state");
            }
        }
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, slot: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            slot: slot.to_string(),
            source,
        })?;
        self.store.set(slot, json).await
    }

    async fn read_raw(&self, slot: &str) -> Option<String> {
        match self.store.get(slot).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(slot, error = %e, "Failed to read persisted slot");
                None
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, slot: &str) -> Option<T> {
        let raw = self.read_raw(slot).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(slot, error = %e, "Unreadable persisted slot, using default");
                None
            }
        }
    }

    async fn read_flag(&self, slot: &str) -> bool {
        match self.read_raw(slot).await.as_deref().map(str::trim) {
            Some("true") => true,
            Some("false") | None => false,
            Some(other) => {
                tracing::warn!(slot, value = other, "Ignoring non-boolean slot");
                false
            }
        }
    }

    async fn read_number(&self, slot: &str) -> Option<usize> {
        let raw = self.read_raw(slot).await?;
        match raw.trim().parse() {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(slot, error = %e, "Unreadable persisted number, using default");
                None
            }
        }
    }
}

fn table_to_map<V: RoundRecord>(table: &HistoryTable<V>) -> BTreeMap<String, &V> {
    table.iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn map_to_table<V: RoundRecord>(raw: BTreeMap<String, V>) -> HistoryTable<V> {
    let mut table = HistoryTable::default();
    for (raw_key, value) in raw {
        if let Some(key) = key::parse(&raw_key).key() {
            table.upsert(key, value);
        }
    }
    table
}
