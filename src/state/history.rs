//! Append-only history of per-round description sets and vote results.

use super::key::{self, StorageKey};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Records that can sit in a history table
pub trait RoundRecord: Clone {
    /// Game number stamped on the record itself, used when neither the key
    /// nor the round mappings can tell which game a legacy record belongs to
    fn recorded_game_number(&self) -> Option<GameNumber> {
        None
    }
}

impl RoundRecord for Vec<DescriptionEntry> {}

impl RoundRecord for VoteResult {
    fn recorded_game_number(&self) -> Option<GameNumber> {
        self.game_number
    }
}

/// One history row ready for display
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry<V> {
    pub key: String,
    pub round: RoundNumber,
    /// `None` when the game could not be resolved; such rows sort last
    pub game_number: Option<GameNumber>,
    pub value: V,
}

/// Keyed upsert table. Values are always replaced whole, never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTable<V> {
    entries: BTreeMap<StorageKey, V>,
}

impl<V> Default for HistoryTable<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: RoundRecord> HistoryTable<V> {
    pub fn upsert(&mut self, key: StorageKey, value: V) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &StorageKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorageKey, &V)> {
        self.entries.iter()
    }

    /// Whether any composite key is present; legacy keys are then hidden
    pub fn has_composite_keys(&self) -> bool {
        self.entries.keys().any(StorageKey::is_composite)
    }

    /// Entries for display: newest game first, newest round first within a game.
    ///
    /// Legacy keys are left out as soon as one composite key exists. Legacy rows
    /// get their game number from `backfill`, then from the record itself.
    pub fn all(&self, backfill: impl Fn(RoundNumber) -> Option<GameNumber>) -> Vec<HistoryEntry<V>> {
        let composite_only = self.has_composite_keys();

        let mut rows: Vec<HistoryEntry<V>> = self
            .entries
            .iter()
            .filter(|(key, _)| !composite_only || key.is_composite())
            .map(|(key, value)| HistoryEntry {
                key: key.to_string(),
                round: key.round(),
                game_number: key
                    .game_number()
                    .or_else(|| backfill(key.round()))
                    .or_else(|| value.recorded_game_number()),
                value: value.clone(),
            })
            .collect();

        rows.sort_by(display_order);
        rows
    }
}

fn display_order<V>(a: &HistoryEntry<V>, b: &HistoryEntry<V>) -> Ordering {
    let by_game = match (a.game_number, b.game_number) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_game
        .then_with(|| b.round.cmp(&a.round))
        .then_with(|| a.key.cmp(&b.key))
}

/// `round -> game number` lookups for records stored under legacy keys
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoundMappings {
    #[serde(default)]
    pub game: BTreeMap<RoundNumber, GameNumber>,
    #[serde(default)]
    pub descriptions: BTreeMap<RoundNumber, GameNumber>,
    #[serde(default)]
    pub votes: BTreeMap<RoundNumber, GameNumber>,
}

impl RoundMappings {
    pub fn is_empty(&self) -> bool {
        self.game.is_empty() && self.descriptions.is_empty() && self.votes.is_empty()
    }

    pub fn clear(&mut self) {
        self.game.clear();
        self.descriptions.clear();
        self.votes.clear();
    }

    /// Seed the description and vote mappings for a freshly started game,
    /// keeping any mapping that already exists for the round
    pub fn seed(&mut self, round: RoundNumber, game_number: GameNumber) {
        self.descriptions.entry(round).or_insert(game_number);
        self.votes.entry(round).or_insert(game_number);
    }
}

/// Both history tables plus their round mappings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryStore {
    pub descriptions: HistoryTable<Vec<DescriptionEntry>>,
    pub votes: HistoryTable<VoteResult>,
    pub mappings: RoundMappings,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the description set of a round. Empty sets are ignored.
    pub fn record_descriptions(
        &mut self,
        round: RoundNumber,
        game_number: Option<GameNumber>,
        entries: Vec<DescriptionEntry>,
    ) -> Option<StorageKey> {
        if entries.is_empty() {
            return None;
        }

        let key = key::resolve(round, game_number);
        self.descriptions.upsert(key, entries);
        if let Some(game_number) = game_number {
            self.mappings.descriptions.insert(round, game_number);
        }
        Some(key)
    }

    /// Store the vote result of a round, stamped with the current game number
    pub fn record_vote(
        &mut self,
        round: RoundNumber,
        game_number: Option<GameNumber>,
        mut result: VoteResult,
    ) -> StorageKey {
        let key = key::resolve(round, game_number);
        result.round = Some(round);
        result.game_number = game_number;
        self.votes.upsert(key, result);
        if let Some(game_number) = game_number {
            self.mappings.game.insert(round, game_number);
            self.mappings.votes.insert(round, game_number);
        }
        key
    }

    pub fn description_history(&self) -> Vec<HistoryEntry<Vec<DescriptionEntry>>> {
        self.descriptions.all(|round| {
            self.mappings
                .descriptions
                .get(&round)
                .or_else(|| self.mappings.game.get(&round))
                .copied()
        })
    }

    pub fn vote_history(&self) -> Vec<HistoryEntry<VoteResult>> {
        self.votes.all(|round| {
            self.mappings
                .votes
                .get(&round)
                .or_else(|| self.mappings.game.get(&round))
                .copied()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty() && self.votes.is_empty() && self.mappings.is_empty()
    }

    pub fn clear(&mut self) {
        self.descriptions.clear();
        self.votes.clear();
        self.mappings.clear();
    }
}
