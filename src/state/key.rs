//! Storage keys for per-round history records.
//!
//! A record is keyed `"<gameNumber>_<round>"` while a multi-round sequence is
//! running and `"<round>"` otherwise. This module is the only place that
//! formats or parses those strings.

use crate::types::{GameNumber, RoundNumber};
use std::fmt;

const SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    Composite {
        game_number: GameNumber,
        round: RoundNumber,
    },
    Legacy {
        round: RoundNumber,
    },
}

impl StorageKey {
    pub fn round(&self) -> RoundNumber {
        match self {
            StorageKey::Composite { round, .. } | StorageKey::Legacy { round } => *round,
        }
    }

    pub fn game_number(&self) -> Option<GameNumber> {
        match self {
            StorageKey::Composite { game_number, .. } => Some(*game_number),
            StorageKey::Legacy { .. } => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, StorageKey::Composite { .. })
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKey::Composite { game_number, round } => {
                write!(f, "{}{}{}", game_number, SEPARATOR, round)
            }
            StorageKey::Legacy { round } => write!(f, "{}", round),
        }
    }
}

/// Result of parsing a stored key. `round == None` marks a malformed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey {
    pub round: Option<RoundNumber>,
    pub game_number: Option<GameNumber>,
}

impl ParsedKey {
    const MALFORMED: ParsedKey = ParsedKey {
        round: None,
        game_number: None,
    };

    /// Convert back into a key, or `None` for malformed input
    pub fn key(&self) -> Option<StorageKey> {
        let round = self.round?;
        Some(match self.game_number {
            Some(game_number) => StorageKey::Composite { game_number, round },
            None => StorageKey::Legacy { round },
        })
    }
}

/// Build the storage key for a round, composite when a game number is known
pub fn resolve(round: RoundNumber, game_number: Option<GameNumber>) -> StorageKey {
    match game_number {
        Some(game_number) => StorageKey::Composite { game_number, round },
        None => StorageKey::Legacy { round },
    }
}

/// Parse a stored key string. Never fails; malformed keys come back with
/// `round == None` and are logged.
pub fn parse(raw: &str) -> ParsedKey {
    let parts: Vec<&str> = raw.split(SEPARATOR).collect();

    let parsed = match parts.as_slice() {
        [game, round] => match (positive(game), positive(round)) {
            (Some(game_number), Some(round)) => ParsedKey {
                round: Some(round),
                game_number: Some(game_number),
            },
            _ => ParsedKey::MALFORMED,
        },
        [round] => ParsedKey {
            round: positive(round),
            game_number: None,
        },
        _ => ParsedKey::MALFORMED,
    };

    if parsed.round.is_none() {
        tracing::warn!(key = raw, "Discarding malformed history key");
    }

    parsed
}

fn positive(part: &str) -> Option<u32> {
    part.trim().parse::<u32>().ok().filter(|n| *n > 0)
}
