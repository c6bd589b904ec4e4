//! Automatic progression through an operator-configured sequence of games.
//!
//! Phases:
//! - `Idle`: no sequence configured (`total_rounds == 0`)
//! - `RoundActive`: a game of the sequence is being played
//! - `AdvancePending`: the game ended, the next one starts after a short delay
//! - `Completed`: every configured game finished; the configuration is cleared
//!
//! A scheduled advance is a tokio task that sleeps and then sends its
//! [`AdvanceTicket`] back to the event loop. The sequencer keeps the task's
//! cancellation token and cancels it on every exit from `AdvancePending`
//! other than the timer firing.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pause between the end of one game and the start of the next
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on the number of games in one sequence
pub const MAX_SEQUENCE_ROUNDS: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("A sequence needs at least one round")]
    EmptySequence,

    #[error("A sequence can have at most {max} rounds, got {requested}")]
    TooManyRounds { requested: usize, max: usize },
}

/// Word assignments of a sequence plus the position within it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiRoundConfig {
    pub rounds: Vec<WordPair>,
    /// 0-based index of the game being played
    pub current_round_index: usize,
    pub total_rounds: usize,
}

impl MultiRoundConfig {
    pub fn new(rounds: Vec<WordPair>) -> Self {
        let total_rounds = rounds.len();
        Self {
            rounds,
            current_round_index: 0,
            total_rounds,
        }
    }

    /// 1-based game number shown to spectators and used in storage keys
    pub fn game_number(&self) -> GameNumber {
        (self.current_round_index + 1) as GameNumber
    }

    pub fn current_words(&self) -> Option<&WordPair> {
        self.rounds.get(self.current_round_index)
    }

    pub fn is_last(&self) -> bool {
        self.current_round_index + 1 >= self.total_rounds
    }

    /// `0 <= current_round_index < total_rounds <= rounds.len()`
    pub fn is_consistent(&self) -> bool {
        self.total_rounds > 0
            && self.current_round_index < self.total_rounds
            && self.total_rounds <= self.rounds.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SequencerPhase {
    Idle,
    RoundActive,
    AdvancePending,
    Completed,
}

/// Identifies one scheduled advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceTicket(u64);

/// Command for the game-control collaborator to start a game
#[derive(Debug, Clone, PartialEq)]
pub struct StartRound {
    pub words: WordPair,
    /// Game number within the sequence, `None` in single-game mode
    pub game_number: Option<GameNumber>,
    /// History and round mappings must be cleared before the game starts
    pub is_first_round_of_sequence: bool,
}

/// What happened when a vote result reached the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEndOutcome {
    /// No sequence is running
    Ignored,
    /// The game goes on with another voting round
    Continue,
    /// An advance is already scheduled for this outcome
    AlreadyPending,
    AdvanceScheduled { next_game_number: GameNumber },
    SequenceFinished { total_rounds: usize },
}

struct PendingAdvance {
    ticket: AdvanceTicket,
    cancel: CancellationToken,
}

pub struct RoundSequencer {
    config: Option<MultiRoundConfig>,
    phase: SequencerPhase,
    pending: Option<PendingAdvance>,
    next_ticket: u64,
    advance_delay: Duration,
    advance_tx: mpsc::UnboundedSender<AdvanceTicket>,
}

impl RoundSequencer {
    /// Create an idle sequencer. Due advances are delivered on `advance_tx`.
    pub fn new(advance_delay: Duration, advance_tx: mpsc::UnboundedSender<AdvanceTicket>) -> Self {
        Self {
            config: None,
            phase: SequencerPhase::Idle,
            pending: None,
            next_ticket: 0,
            advance_delay,
            advance_tx,
        }
    }

    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    pub fn config(&self) -> Option<&MultiRoundConfig> {
        self.config.as_ref()
    }

    /// Current game number, `None` when no sequence is configured
    pub fn game_number(&self) -> Option<GameNumber> {
        super::sync::derive_game_number(self.config.as_ref())
    }

    pub fn total_rounds(&self) -> usize {
        self.config.as_ref().map_or(0, |c| c.total_rounds)
    }

    pub fn current_round_index(&self) -> usize {
        self.config.as_ref().map_or(0, |c| c.current_round_index)
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a new sequence at its first game
    pub fn configure(&mut self, rounds: Vec<WordPair>) -> Result<StartRound, SequencerError> {
        if rounds.is_empty() {
            return Err(SequencerError::EmptySequence);
        }
        if rounds.len() > MAX_SEQUENCE_ROUNDS {
            return Err(SequencerError::TooManyRounds {
                requested: rounds.len(),
                max: MAX_SEQUENCE_ROUNDS,
            });
        }

        self.cancel_pending();
        let rounds: Vec<WordPair> = rounds.into_iter().map(WordPair::trimmed).collect();

        let config = MultiRoundConfig::new(rounds);
        let command = StartRound {
            words: config.rounds[0].clone(),
            game_number: Some(config.game_number()),
            is_first_round_of_sequence: true,
        };

        tracing::info!(total_rounds = config.total_rounds, "Sequence configured");
        self.config = Some(config);
        self.phase = SequencerPhase::RoundActive;
        Ok(command)
    }

    /// Drop any sequence and start one stand-alone game
    pub fn start_single(&mut self, words: WordPair) -> StartRound {
        self.clear();
        StartRound {
            words: words.trimmed(),
            game_number: None,
            is_first_round_of_sequence: true,
        }
    }

    /// Resume a sequence restored from storage without starting a game. When
    /// the store recorded a scheduled advance, it is re-armed with a full delay.
    pub fn restore(&mut self, config: MultiRoundConfig, advance_pending: bool) {
        self.cancel_pending();

        if !config.is_consistent() {
            tracing::warn!(
                index = config.current_round_index,
                total = config.total_rounds,
                "Ignoring inconsistent sequence state"
            );
            self.clear();
            return;
        }

        tracing::info!(
            game_number = config.game_number(),
            total_rounds = config.total_rounds,
            advance_pending,
            "Resuming sequence"
        );
        let rearm = advance_pending && !config.is_last();
        self.config = Some(config);
        self.phase = SequencerPhase::RoundActive;
        if rearm {
            self.schedule_advance();
        }
    }

    /// Feed the outcome of a vote into the sequencer
    pub fn on_round_ended(&mut self, game_ended: bool) -> RoundEndOutcome {
        let Some(config) = self.config.as_ref() else {
            return RoundEndOutcome::Ignored;
        };

        match self.phase {
            SequencerPhase::AdvancePending => return RoundEndOutcome::AlreadyPending,
            SequencerPhase::RoundActive => {}
            SequencerPhase::Idle | SequencerPhase::Completed => return RoundEndOutcome::Ignored,
        }

        if !game_ended {
            return RoundEndOutcome::Continue;
        }

        if config.is_last() {
            let total_rounds = config.total_rounds;
            tracing::info!(total_rounds, "Sequence completed");
            self.config = None;
            self.phase = SequencerPhase::Completed;
            return RoundEndOutcome::SequenceFinished { total_rounds };
        }

        let next_game_number = config.game_number() + 1;
        self.schedule_advance();
        RoundEndOutcome::AdvanceScheduled { next_game_number }
    }

    /// Handle a due advance. Stale or unexpected tickets are no-ops.
    pub fn on_advance_due(&mut self, ticket: AdvanceTicket) -> Option<StartRound> {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {}
            _ => {
                tracing::warn!(?ticket, "Ignoring advance that is no longer scheduled");
                return None;
            }
        }
        self.pending = None;

        let Some(config) = self.config.as_mut() else {
            tracing::warn!(?ticket, "Advance fired without a configured sequence");
            self.phase = SequencerPhase::Idle;
            return None;
        };

        config.current_round_index += 1;
        let Some(words) = config.current_words().cloned() else {
            tracing::warn!(
                index = config.current_round_index,
                "Advance ran past the configured rounds"
            );
            self.clear();
            return None;
        };

        let game_number = config.game_number();
        tracing::info!(game_number, "Advancing to next game of the sequence");
        self.phase = SequencerPhase::RoundActive;
        Some(StartRound {
            words,
            game_number: Some(game_number),
            is_first_round_of_sequence: false,
        })
    }

    /// Operator reset or clear-all: cancel any scheduled advance and go idle
    pub fn reset(&mut self) {
        self.clear();
    }

    /// Cancel a scheduled advance but stay in the sequence. The phase remains
    /// `AdvancePending` until [`resume_advance`](Self::resume_advance) or
    /// [`reset`](Self::reset).
    pub fn suspend_advance(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.cancel.cancel();
                tracing::info!(ticket = ?pending.ticket, "Advance suspended");
                true
            }
            None => false,
        }
    }

    /// Re-arm an advance stopped by [`suspend_advance`](Self::suspend_advance)
    pub fn resume_advance(&mut self) -> bool {
        if self.phase != SequencerPhase::AdvancePending
            || self.pending.is_some()
            || self.config.is_none()
        {
            return false;
        }
        self.schedule_advance();
        true
    }

    /// Whether the current game ended and the next one is due (scheduled or suspended)
    pub fn is_advance_pending(&self) -> bool {
        self.phase == SequencerPhase::AdvancePending
    }

    fn clear(&mut self) {
        self.cancel_pending();
        self.config = None;
        self.phase = SequencerPhase::Idle;
    }

    fn schedule_advance(&mut self) {
        self.cancel_pending();

        self.next_ticket += 1;
        let ticket = AdvanceTicket(self.next_ticket);
        let cancel = CancellationToken::new();

        let cancelled = cancel.clone();
        let tx = self.advance_tx.clone();
        let delay = self.advance_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    tracing::debug!(?ticket, "Scheduled advance cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if tx.send(ticket).is_err() {
                        tracing::debug!(?ticket, "Event loop gone, dropping advance");
                    }
                }
            }
        });

        tracing::info!(?ticket, delay_ms = delay.as_millis() as u64, "Advance scheduled");
        self.pending = Some(PendingAdvance { ticket, cancel });
        self.phase = SequencerPhase::AdvancePending;
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
    }
}

impl Drop for RoundSequencer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
