pub mod history;
pub mod key;
pub mod persist;
pub mod sequencer;
pub mod sync;

use crate::client::ControlResult;
use crate::protocol::*;
use crate::types::*;
use history::HistoryStore;
use persist::{ClearScope, Persistence};
use sequencer::{AdvanceTicket, RoundEndOutcome, RoundSequencer, SequencerError, StartRound};
use std::collections::VecDeque;
use sync::SnapshotSync;

/// Number of operator notices kept for the view
pub const MAX_NOTICES: usize = 50;

/// The dashboard's derived state. Owned by the event loop and mutated only by
/// its handlers, one event at a time; every mutation is persisted.
pub struct Dashboard {
    history: HistoryStore,
    sequencer: RoundSequencer,
    sync: SnapshotSync,
    persistence: Persistence,
    connection: ConnectionStatus,
    notices: VecDeque<Notice>,
}

impl Dashboard {
    pub fn new(persistence: Persistence, sequencer: RoundSequencer) -> Self {
        Self {
            history: HistoryStore::new(),
            sequencer,
            sync: SnapshotSync::new(),
            persistence,
            connection: ConnectionStatus::default(),
            notices: VecDeque::new(),
        }
    }

    /// Build the dashboard from whatever the store holds, resuming a sequence
    /// that was in progress
    pub async fn load(persistence: Persistence, sequencer: RoundSequencer) -> Self {
        let restored = persistence.load().await;
        let mut dashboard = Self::new(persistence, sequencer);
        dashboard.history = restored.history;
        if let Some(config) = restored.sequence {
            dashboard
                .sequencer
                .restore(config, restored.advance_pending);
        }
        dashboard
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn sequencer(&self) -> &RoundSequencer {
        &self.sequencer
    }

    pub fn sync(&self) -> &SnapshotSync {
        &self.sync
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    // ========== Inbound events ==========

    pub async fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::GameStateUpdate(snapshot) => self.on_snapshot(snapshot, true).await,
            PushEvent::TimerUpdate(timers) => {
                self.sync.apply_timer(timers);
            }
            PushEvent::StatusUpdate(status) => self.sync.apply_status(status),
            PushEvent::DescriptionsUpdate(update) => self.on_descriptions(update).await,
            PushEvent::VoteResult(result) => self.on_vote_result(result).await,
        }
    }

    pub async fn on_poll_result(&mut self, result: ControlResult<GameSnapshot>) {
        match result {
            Ok(snapshot) => {
                if !self.connection.last_poll_ok {
                    tracing::info!("State polling recovered");
                }
                self.connection.last_poll_ok = true;
                self.on_snapshot(snapshot, false).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "State poll failed");
                if self.connection.last_poll_ok {
                    self.notify(NoticeLevel::Warning, format!("Could not fetch game state: {}", e));
                }
                self.connection.last_poll_ok = false;
                self.connection.last_error = Some(e.to_string());
            }
        }
    }

    pub fn on_push_connection(&mut self, connected: bool, error: Option<String>) {
        let was_connected = self.connection.push_connected;
        self.connection.push_connected = connected;

        if connected {
            if !was_connected {
                self.notify(NoticeLevel::Success, "Connected to game server");
            }
        } else {
            if was_connected {
                self.notify(NoticeLevel::Danger, "Lost connection to game server");
            }
            self.connection.last_error = error;
        }
    }

    async fn on_snapshot(&mut self, snapshot: GameSnapshot, pushed: bool) {
        let outcome = if pushed {
            self.sync.apply_push(snapshot)
        } else {
            self.sync.apply_poll(snapshot)
        };

        if !outcome.fresh_game_started {
            return;
        }

        if let Some(game_number) = self.sequencer.game_number() {
            let before = self.history.mappings.clone();
            self.history.mappings.seed(1, game_number);
            if self.history.mappings != before {
                tracing::debug!(game_number, "Seeded round mapping for fresh game");
                self.persist().await;
            }
        }
    }

    async fn on_descriptions(&mut self, update: DescriptionsUpdate) {
        let Some(round) = update.round.filter(|r| *r > 0) else {
            tracing::debug!("Dropping descriptions without a round");
            return;
        };

        let game_number = self.sequencer.game_number();
        if let Some(key) =
            self.history
                .record_descriptions(round, game_number, update.descriptions)
        {
            tracing::debug!(%key, "Stored descriptions");
            self.persist().await;
        }
    }

    async fn on_vote_result(&mut self, result: VoteResult) {
        let Some(round) = result.round.filter(|r| *r > 0) else {
            tracing::debug!("Dropping vote result without a round");
            return;
        };

        let game_ended = result.game_ended;
        let winner = result.winner;
        let game_number = self.sequencer.game_number();
        let key = self.history.record_vote(round, game_number, result);
        tracing::info!(%key, game_ended, "Stored vote result");

        match self.sequencer.on_round_ended(game_ended) {
            RoundEndOutcome::AdvanceScheduled { next_game_number } => {
                let total = self.sequencer.total_rounds();
                self.notify(
                    NoticeLevel::Info,
                    format!(
                        "Game {} finished{}, game {} of {} starts shortly",
                        next_game_number - 1,
                        winner_suffix(winner),
                        next_game_number,
                        total
                    ),
                );
            }
            RoundEndOutcome::SequenceFinished { total_rounds } => {
                self.notify(
                    NoticeLevel::Success,
                    format!("All {} games of the sequence are finished", total_rounds),
                );
            }
            RoundEndOutcome::Ignored
            | RoundEndOutcome::Continue
            | RoundEndOutcome::AlreadyPending => {}
        }

        self.persist().await;
    }

    // ========== Operator actions ==========

    /// Configure a sequence. The returned command must be sent to the game server.
    pub async fn configure_sequence(
        &mut self,
        rounds: Vec<WordPair>,
    ) -> Result<StartRound, SequencerError> {
        let start = self.sequencer.configure(rounds)?;
        self.prepare_start(&start).await;
        Ok(start)
    }

    /// Start one game outside of any sequence
    pub async fn start_single(&mut self, words: WordPair) -> StartRound {
        let start = self.sequencer.start_single(words);
        self.prepare_start(&start).await;
        start
    }

    /// A scheduled advance is due. Returns the next game to start, if any.
    pub async fn on_advance_due(&mut self, ticket: AdvanceTicket) -> Option<StartRound> {
        let start = self.sequencer.on_advance_due(ticket)?;
        self.prepare_start(&start).await;
        Some(start)
    }

    async fn prepare_start(&mut self, start: &StartRound) {
        if start.is_first_round_of_sequence {
            tracing::info!("Clearing history for a new sequence");
            self.history.clear();
        }
        self.persist().await;
    }

    pub fn on_start_result(&mut self, start: &StartRound, result: &ControlResult<StartGameAck>) {
        match (result, start.game_number) {
            (Ok(_), Some(game_number)) => {
                let total = self.sequencer.total_rounds();
                self.notify(
                    NoticeLevel::Success,
                    format!("Game {} of {} started", game_number, total),
                );
            }
            (Ok(_), None) => self.notify(NoticeLevel::Success, "Game started"),
            (Err(e), _) => {
                tracing::error!(error = %e, game_number = ?start.game_number, "Failed to start game");
                self.notify(NoticeLevel::Danger, format!("Failed to start game: {}", e));
            }
        }
    }

    /// A reset or clear-all was requested. No game may be advanced to while
    /// the game server handles it.
    pub fn begin_reset(&mut self, scope: ClearScope) {
        if self.sequencer.suspend_advance() {
            tracing::info!(?scope, "Holding scheduled advance until reset completes");
        }
    }

    /// The game server answered a reset or clear-all request. Local state is
    /// only wiped when the server succeeded; a refused reset resumes an advance
    /// held by [`begin_reset`](Self::begin_reset).
    pub async fn on_reset_result(&mut self, scope: ClearScope, result: &ControlResult<()>) {
        if let Err(e) = result {
            tracing::error!(error = %e, ?scope, "Game server refused reset");
            self.notify(NoticeLevel::Danger, format!("Reset failed: {}", e));
            if self.sequencer.resume_advance() {
                tracing::info!("Resumed scheduled advance after refused reset");
            }
            return;
        }

        self.sequencer.reset();
        self.history.clear();

        if let Err(e) = self.persistence.clear(scope).await {
            tracing::error!(error = %e, "Failed to clear persisted state");
            self.notify(NoticeLevel::Warning, format!("Could not clear saved state: {}", e));
        }

        let message = match scope {
            ClearScope::GameData => "Game reset",
            ClearScope::Everything => "All data cleared",
        };
        self.notify(NoticeLevel::Success, message);
    }

    pub fn on_round_start_result(&mut self, result: &ControlResult<()>) {
        match result {
            Ok(()) => self.notify(NoticeLevel::Success, "Round started"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start round");
                self.notify(NoticeLevel::Danger, format!("Failed to start round: {}", e));
            }
        }
    }

    // ========== View and bookkeeping ==========

    pub fn view(&self) -> DashboardView {
        DashboardView {
            snapshot: self.sync.snapshot().cloned(),
            live_status: self.sync.live_status().cloned(),
            descriptions: self.history.description_history(),
            votes: self.history.vote_history(),
            sequence: SequenceView {
                phase: self.sequencer.phase(),
                game_number: self.sequencer.game_number(),
                current_round_index: self.sequencer.current_round_index(),
                total_rounds: self.sequencer.total_rounds(),
                advance_pending: self.sequencer.has_pending_advance(),
            },
            stats: self.sync.stats(),
            connection: self.connection.clone(),
            notices: self.notices.iter().cloned().collect(),
        }
    }

    pub fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice::new(level, message));
    }

    async fn persist(&mut self) {
        if let Err(e) = self
            .persistence
            .save(
                &self.history,
                self.sequencer.config(),
                self.sequencer.is_advance_pending(),
            )
            .await
        {
            tracing::error!(error = %e, "Failed to persist dashboard state");
            self.notify(NoticeLevel::Warning, format!("Could not save state: {}", e));
        }
    }
}

fn winner_suffix(winner: Option<Winner>) -> &'static str {
    match winner {
        Some(Winner::Civilian) => " (civilians win)",
        Some(Winner::Undercover) => " (undercover wins)",
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ControlError;
    use persist::MemoryStore;
    use sequencer::{SequencerPhase, DEFAULT_ADVANCE_DELAY};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn dashboard() -> (Dashboard, mpsc::UnboundedReceiver<AdvanceTicket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let persistence = Persistence::new(Arc::new(MemoryStore::new()));
        let sequencer = RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx);
        (Dashboard::new(persistence, sequencer), rx)
    }

    fn words(n: usize) -> Vec<WordPair> {
        (1..=n)
            .map(|i| WordPair::new(format!("u{}", i), format!("c{}", i)))
            .collect()
    }

    fn vote(round: u32, game_ended: bool) -> PushEvent {
        PushEvent::VoteResult(VoteResult {
            round: Some(round),
            game_ended,
            ..Default::default()
        })
    }

    fn descriptions(round: Option<u32>) -> PushEvent {
        PushEvent::DescriptionsUpdate(DescriptionsUpdate {
            round,
            descriptions: vec![DescriptionEntry {
                group: "red".to_string(),
                description: "round".to_string(),
                time: String::new(),
            }],
            total: Some(1),
        })
    }

    #[tokio::test]
    async fn test_events_without_round_are_dropped() {
        let (mut dash, _rx) = dashboard();
        dash.handle_push(descriptions(None)).await;
        dash.handle_push(descriptions(Some(0))).await;
        dash.handle_push(PushEvent::VoteResult(VoteResult::default()))
            .await;

        assert!(dash.history().is_empty());
    }

    #[tokio::test]
    async fn test_vote_without_sequence_uses_legacy_key() {
        let (mut dash, _rx) = dashboard();
        dash.handle_push(vote(1, true)).await;

        let view = dash.view();
        assert_eq!(view.votes.len(), 1);
        assert_eq!(view.votes[0].key, "1");
        assert_eq!(view.sequence.phase, SequencerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_keys_and_notices() {
        let (mut dash, mut rx) = dashboard();
        let start = dash.configure_sequence(words(2)).await.unwrap();
        assert_eq!(start.game_number, Some(1));

        dash.handle_push(descriptions(Some(1))).await;
        dash.handle_push(vote(1, true)).await;
        assert_eq!(dash.sequencer().phase(), SequencerPhase::AdvancePending);
        assert!(dash
            .notices()
            .any(|n| n.message.contains("game 2 of 2 starts shortly")));

        let ticket = rx.recv().await.unwrap();
        let next = dash.on_advance_due(ticket).await.unwrap();
        assert_eq!(next.game_number, Some(2));
        assert!(!next.is_first_round_of_sequence);

        dash.handle_push(descriptions(Some(1))).await;
        let keys: Vec<String> = dash.view().descriptions.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["2_1", "1_1"]);
    }

    #[tokio::test]
    async fn test_new_sequence_clears_history() {
        let (mut dash, _rx) = dashboard();
        dash.handle_push(vote(1, true)).await;
        dash.history.mappings.game.insert(1, 1);

        dash.configure_sequence(words(2)).await.unwrap();
        assert!(dash.history().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_game_seeds_mapping() {
        let (mut dash, _rx) = dashboard();
        dash.configure_sequence(words(2)).await.unwrap();

        let snapshot = |status, round| GameSnapshot {
            status,
            current_round: round,
            ..Default::default()
        };
        dash.on_poll_result(Ok(snapshot(GameStatus::GameEnd, 3))).await;
        dash.handle_push(PushEvent::GameStateUpdate(snapshot(GameStatus::WordAssigned, 1)))
            .await;

        assert_eq!(dash.history().mappings.descriptions.get(&1), Some(&1));
        assert_eq!(dash.history().mappings.votes.get(&1), Some(&1));
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_state() {
        let (mut dash, _rx) = dashboard();
        dash.configure_sequence(words(3)).await.unwrap();
        dash.handle_push(vote(1, false)).await;

        let refused = Err(ControlError::Rejected {
            code: 403,
            message: "forbidden".to_string(),
        });
        dash.on_reset_result(ClearScope::GameData, &refused).await;
        assert_eq!(dash.sequencer().total_rounds(), 3);
        assert!(!dash.history().is_empty());

        dash.on_reset_result(ClearScope::GameData, &Ok(())).await;
        assert_eq!(dash.sequencer().phase(), SequencerPhase::Idle);
        assert!(dash.history().is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_notifies_once() {
        let (mut dash, _rx) = dashboard();
        dash.on_poll_result(Ok(GameSnapshot::default())).await;
        for _ in 0..3 {
            dash.on_poll_result(Err(ControlError::Transport("refused".to_string())))
                .await;
        }

        assert!(!dash.connection().last_poll_ok);
        assert_eq!(dash.notices().count(), 1);
        // Last good snapshot stays on display
        assert!(dash.sync().snapshot().is_some());
    }

    #[tokio::test]
    async fn test_push_connection_status() {
        let (mut dash, _rx) = dashboard();
        dash.on_push_connection(true, None);
        dash.on_push_connection(false, Some("Stream ended".to_string()));

        let view = dash.view();
        assert!(!view.connection.push_connected);
        assert_eq!(view.connection.last_error.as_deref(), Some("Stream ended"));
        assert_eq!(view.notices.len(), 2);
    }

    #[tokio::test]
    async fn test_notices_are_bounded() {
        let (mut dash, _rx) = dashboard();
        for i in 0..(MAX_NOTICES + 5) {
            dash.notify(NoticeLevel::Info, format!("notice {}", i));
        }

        let view = dash.view();
        assert_eq!(view.notices.len(), MAX_NOTICES);
        assert_eq!(view.notices[0].message, "notice 5");
    }

    #[tokio::test]
    async fn test_load_resumes_sequence() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let persistence = Persistence::new(Arc::new(MemoryStore::new()));
        let mut dash = Dashboard::new(
            persistence.clone(),
            RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx.clone()),
        );
        dash.configure_sequence(words(2)).await.unwrap();
        dash.handle_push(vote(1, false)).await;
        drop(dash);

        let restored =
            Dashboard::load(persistence, RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx)).await;
        assert_eq!(restored.sequencer().phase(), SequencerPhase::RoundActive);
        assert_eq!(restored.sequencer().game_number(), Some(1));
        assert_eq!(restored.view().votes[0].key, "1_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_reset_holds_advance() {
        let (mut dash, mut rx) = dashboard();
        dash.configure_sequence(words(2)).await.unwrap();
        dash.handle_push(vote(1, true)).await;

        dash.begin_reset(ClearScope::GameData);
        assert_eq!(dash.sequencer().phase(), SequencerPhase::AdvancePending);
        let fired = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(fired.is_err(), "advance must wait for the reset outcome");

        let refused = Err(ControlError::Timeout(Duration::from_secs(10)));
        dash.on_reset_result(ClearScope::GameData, &refused).await;
        let ticket = rx.recv().await.unwrap();
        let next = dash.on_advance_due(ticket).await.unwrap();
        assert_eq!(next.game_number, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_rearms_pending_advance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let persistence = Persistence::new(Arc::new(MemoryStore::new()));
        let mut dash = Dashboard::new(
            persistence.clone(),
            RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx.clone()),
        );
        dash.configure_sequence(words(2)).await.unwrap();
        dash.handle_push(vote(1, true)).await;
        drop(dash);

        let mut restored =
            Dashboard::load(persistence, RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx)).await;
        assert_eq!(restored.sequencer().phase(), SequencerPhase::AdvancePending);
        assert!(restored.view().sequence.advance_pending);

        let ticket = rx.recv().await.unwrap();
        let next = restored.on_advance_due(ticket).await.unwrap();
        assert_eq!(next.game_number, Some(2));
        assert_eq!(next.words.undercover_word, "u2");
    }
}
