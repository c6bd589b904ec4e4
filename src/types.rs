use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque name types for readability
pub type GroupName = String;
pub type RoundNumber = u32;
pub type GameNumber = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Waiting,
    Registered,
    WordAssigned,
    Describing,
    Voting,
    RoundEnd,
    GameEnd,
    /// Any status string this dashboard does not know about
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// Statuses that mark a freshly prepared game, before the first round starts
    pub fn is_preparing(&self) -> bool {
        matches!(self, GameStatus::WordAssigned | GameStatus::Registered)
    }
}

/// The authoritative live game state as delivered by push or poll.
///
/// Only the fields the reconciliation layer reads are typed; everything else
/// the server sends is kept verbatim in `extra` for the display layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GameSnapshot {
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub current_round: RoundNumber,
    /// Server-assigned monotonic version, when the server provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_counter: Option<u32>,
    #[serde(default)]
    pub scores: BTreeMap<GroupName, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_remaining_seconds: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Countdown-only push payload. Any non-countdown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimerUpdate {
    #[serde(default)]
    pub remaining_seconds: Option<u32>,
    #[serde(default)]
    pub speaker_remaining_seconds: Option<u32>,
}

/// Public status broadcast (subset of the snapshot visible to everyone)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublicStatus {
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub current_round: Option<RoundNumber>,
    #[serde(default)]
    pub current_speaker: Option<GroupName>,
    #[serde(default)]
    pub remaining_seconds: Option<u32>,
    #[serde(default)]
    pub speaker_remaining_seconds: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PublicStatus {
    pub fn timers(&self) -> TimerUpdate {
        TimerUpdate {
            remaining_seconds: self.remaining_seconds,
            speaker_remaining_seconds: self.speaker_remaining_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescriptionEntry {
    pub group: GroupName,
    pub description: String,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Civilian,
    Undercover,
}

/// Outcome of one voting round as reported by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VoteResult {
    #[serde(default)]
    pub round: Option<RoundNumber>,
    #[serde(default)]
    pub vote_count: BTreeMap<GroupName, u32>,
    /// voter -> target
    #[serde(default)]
    pub vote_details: BTreeMap<GroupName, GroupName>,
    #[serde(default)]
    pub max_voted_groups: Vec<GroupName>,
    #[serde(default)]
    pub max_votes: u32,
    #[serde(default)]
    pub eliminated: Vec<GroupName>,
    #[serde(default)]
    pub game_ended: bool,
    #[serde(default)]
    pub winner: Option<Winner>,
    #[serde(default)]
    pub undercover_group: Option<GroupName>,
    #[serde(default)]
    pub round_scores: BTreeMap<GroupName, i64>,
    #[serde(default)]
    pub total_scores: BTreeMap<GroupName, i64>,
    /// Sequence position that was current when this result arrived
    #[serde(default)]
    pub game_number: Option<GameNumber>,
}

/// Word assignment for one game of a sequence.
///
/// Empty words are allowed: the game server then draws a pair from its word bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WordPair {
    #[serde(default)]
    pub undercover_word: String,
    #[serde(default)]
    pub civilian_word: String,
}

impl WordPair {
    pub fn new(undercover_word: impl Into<String>, civilian_word: impl Into<String>) -> Self {
        Self {
            undercover_word: undercover_word.into(),
            civilian_word: civilian_word.into(),
        }
    }

    /// Strip surrounding whitespace; a blank word becomes empty and is left to
    /// the game server to pick
    pub fn trimmed(self) -> Self {
        Self::new(self.undercover_word.trim(), self.civilian_word.trim())
    }
}
