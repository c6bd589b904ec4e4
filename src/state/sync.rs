//! Reconciles push and poll deliveries into one current snapshot.

use super::sequencer::MultiRoundConfig;
use crate::types::*;
use serde::Serialize;

/// Where a full snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Push,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    /// False when the snapshot was older than the one already applied
    pub applied: bool,
    /// A game-ended status was followed by a freshly prepared game at round 1
    pub fresh_game_started: bool,
}

/// Headline numbers for the display layer
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct GameStats {
    pub games_played: u32,
    pub current_round: RoundNumber,
    pub highest_score: i64,
}

#[derive(Debug, Default)]
pub struct SnapshotSync {
    snapshot: Option<GameSnapshot>,
    live_status: Option<PublicStatus>,
    last_status: Option<GameStatus>,
}

impl SnapshotSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn live_status(&self) -> Option<&PublicStatus> {
        self.live_status.as_ref()
    }

    /// Install a full snapshot from the push channel
    pub fn apply_push(&mut self, snapshot: GameSnapshot) -> ApplyOutcome {
        self.install(snapshot, SnapshotSource::Push)
    }

    /// Install a full snapshot from the poll endpoint
    pub fn apply_poll(&mut self, snapshot: GameSnapshot) -> ApplyOutcome {
        self.install(snapshot, SnapshotSource::Poll)
    }

    fn install(&mut self, snapshot: GameSnapshot, source: SnapshotSource) -> ApplyOutcome {
        // Versions are optional; without them the latest delivery wins
        if let (Some(current), Some(incoming)) = (
            self.snapshot.as_ref().and_then(|s| s.version),
            snapshot.version,
        ) {
            if incoming < current {
                tracing::warn!(
                    ?source,
                    current,
                    incoming,
                    "Rejecting snapshot older than the applied one"
                );
                return ApplyOutcome::default();
            }
        }

        let fresh_game_started = self.last_status == Some(GameStatus::GameEnd)
            && snapshot.status.is_preparing()
            && snapshot.current_round == 1;

        if fresh_game_started {
            tracing::debug!(?source, "Detected start of a fresh game");
        }

        self.last_status = Some(snapshot.status);
        self.snapshot = Some(snapshot);

        ApplyOutcome {
            applied: true,
            fresh_game_started,
        }
    }

    /// Apply a countdown-only push. Nothing but the countdown fields change.
    /// Returns false when there is no snapshot to update yet.
    pub fn apply_timer(&mut self, timers: TimerUpdate) -> bool {
        match self.snapshot.as_mut() {
            Some(snapshot) => {
                snapshot.remaining_seconds = timers.remaining_seconds;
                snapshot.speaker_remaining_seconds = timers.speaker_remaining_seconds;
                true
            }
            None => false,
        }
    }

    /// Keep the latest public status and take over its countdowns
    pub fn apply_status(&mut self, status: PublicStatus) {
        self.apply_timer(status.timers());
        self.live_status = Some(status);
    }

    pub fn stats(&self) -> GameStats {
        match &self.snapshot {
            Some(snapshot) => GameStats {
                games_played: snapshot.game_counter.unwrap_or(0),
                current_round: snapshot.current_round,
                highest_score: snapshot.scores.values().copied().max().unwrap_or(0),
            },
            None => GameStats::default(),
        }
    }
}

/// Game number for the moment: `current_round_index + 1` while a sequence is
/// configured, `None` otherwise
pub fn derive_game_number(config: Option<&MultiRoundConfig>) -> Option<GameNumber> {
    config
        .filter(|c| c.total_rounds > 0)
        .map(MultiRoundConfig::game_number)
}
